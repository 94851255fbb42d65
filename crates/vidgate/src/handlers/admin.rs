//! POST /admin/shutdown

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Serialize;
use tracing::{info, warn};

use super::api_auth;
use super::problem_details::ProblemDetails;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub status: &'static str,
    /// Uploads whose finalization the server will wait for.
    pub pending_uploads: usize,
}

/// Begin a graceful shutdown.
///
/// With `server.admin_token` set the caller must send it as a bearer token;
/// without one only loopback callers are accepted.
pub async fn shutdown(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<ShutdownResponse>, ProblemDetails> {
    if !api_auth::is_authorized(&state.admin_token, &addr, &headers) {
        warn!(peer = %addr, "Rejected shutdown request");
        return Err(ProblemDetails::new(StatusCode::FORBIDDEN, "admin access denied"));
    }

    let Some(tx) = state.shutdown_tx.lock().await.take() else {
        return Err(ProblemDetails::new(
            StatusCode::CONFLICT,
            "shutdown already in progress",
        ));
    };
    // The receiver only goes away once the server is already stopping.
    let _ = tx.send(());

    let pending_uploads = state.background_tasks.pending_count();
    info!(peer = %addr, pending_uploads, "Shutdown requested");
    Ok(Json(ShutdownResponse {
        status: "stopping",
        pending_uploads,
    }))
}
