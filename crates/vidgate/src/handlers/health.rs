use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::background::TaskStats;
use crate::server::AppState;

pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[derive(Serialize)]
pub struct ReadyzResponse {
    pub status: String,
    pub sessions: usize,
    pub uploads: usize,
    pub tasks: TaskStats,
}

pub async fn readyz(State(state): State<AppState>) -> Json<ReadyzResponse> {
    Json(ReadyzResponse {
        status: "ok".to_string(),
        sessions: state.sessions.len(),
        uploads: state.uploads.active_jobs(),
        tasks: state.background_tasks.stats(),
    })
}
