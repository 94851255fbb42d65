use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tokio::sync::{Mutex, oneshot};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;

use crate::account::Authenticator;
use crate::background::BackgroundTasks;
use crate::handlers;
use crate::listing::Lister;
use crate::media::{RangeStreamer, UploadReassembler};
use crate::session::SessionRegistry;
use crate::store::CatalogStore;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionRegistry,
    pub streamer: RangeStreamer,
    pub uploads: UploadReassembler,
    pub lister: Lister,
    pub authenticator: Authenticator,
    pub catalog: Arc<dyn CatalogStore>,
    pub background_tasks: BackgroundTasks,
    pub admin_token: Option<String>,
    pub max_connections: usize,
    /// Largest accepted upload chunk body.
    pub max_chunk_bytes: usize,
    pub shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

// ============================================================================
// Server Setup
// ============================================================================

/// Create a shutdown channel pair.
///
/// Returns (sender for AppState, receiver for shutdown_signal).
pub fn shutdown_channel() -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
    oneshot::channel()
}

pub fn build_app(state: AppState, request_timeout_seconds: u64) -> Router {
    let max_connections = state.max_connections;

    // Transfer and interactive routes: no request timeout. Each bounds its
    // own waits, and login state polling may wait on a human.
    let transfer_routes = Router::new()
        .route("/video", get(handlers::get_video))
        .route(
            "/upload",
            post(handlers::upload_chunk).layer(DefaultBodyLimit::max(state.max_chunk_bytes)),
        )
        .route("/auth/get_state", get(handlers::get_state))
        .route("/logout", get(handlers::logout))
        .with_state(state.clone());

    // Regular API routes - with request timeout
    let api_routes = Router::new()
        .route("/get_chats", get(handlers::get_chats))
        .route("/get_files", get(handlers::get_files))
        .route("/me", get(handlers::me))
        .route("/auth", post(handlers::auth))
        .route("/set_video_data", post(handlers::set_video_data))
        .route("/get_videos_data", post(handlers::get_videos_data))
        .with_state(state.clone())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(request_timeout_seconds),
        ));

    let api = Router::new()
        .merge(transfer_routes)
        .merge(api_routes)
        .layer(ConcurrencyLimitLayer::new(max_connections));

    // Admin routes (no timeout, state required for shutdown)
    let admin_routes = Router::new()
        .route("/shutdown", post(handlers::shutdown))
        .with_state(state.clone());

    Router::new()
        .route("/livez", get(handlers::livez))
        .route("/readyz", get(handlers::readyz))
        .route("/version", get(handlers::version))
        .with_state(state)
        .merge(api)
        .nest("/admin", admin_routes)
        .layer(CorsLayer::permissive())
}
