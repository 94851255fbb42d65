//! Chat, video, and profile listings.

use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;
use vidgate_protocol::User;

use super::params;
use super::problem_details::ProblemDetails;
use crate::listing::{ChatSummary, VideoDescriptor};
use crate::server::AppState;
use crate::session::SessionId;

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    session_id: Option<String>,
    chat_id: Option<String>,
}

/// GET /get_chats
pub async fn get_chats(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<ChatSummary>>, ProblemDetails> {
    let session_id: SessionId = params::required("session_id", query.session_id.as_deref())?;
    let session = state.sessions.get_or_create(session_id).await?;
    Ok(Json(state.lister.chats(&session).await?))
}

/// GET /get_files
pub async fn get_files(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Vec<VideoDescriptor>>, ProblemDetails> {
    let session_id: SessionId = params::required("session_id", query.session_id.as_deref())?;
    let chat_id: i64 = params::required("chat_id", query.chat_id.as_deref())?;
    let session = state.sessions.get_or_create(session_id).await?;
    Ok(Json(state.lister.chat_videos(&session, chat_id).await?))
}

/// GET /me
pub async fn me(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<User>, ProblemDetails> {
    let session_id: SessionId = params::required("session_id", query.session_id.as_deref())?;
    let session = state.sessions.get_or_create(session_id).await?;
    Ok(Json(state.lister.me(&session).await?))
}
