//! POST /upload

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use serde::Serialize;

use super::params;
use super::problem_details::ProblemDetails;
use crate::media::{ChunkReceipt, ChunkUpload, parse_content_range};
use crate::session::SessionId;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub receipt: ChunkReceipt,
}

/// Receive one chunk of a file. The file is posted to the chat once every
/// byte has arrived; that happens after this response.
pub async fn upload_chunk(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadResponse>, ProblemDetails> {
    let content_range: String = params::header(&headers, header::CONTENT_RANGE.as_str())?;
    let session_id: SessionId = params::header(&headers, "session_id")?;
    let chat_id: i64 = params::header(&headers, "chat_id")?;
    let file_name: String = params::header(&headers, "file_name")?;

    let range = parse_content_range(&content_range)?;
    let receipt = state
        .uploads
        .receive_chunk(ChunkUpload {
            file_name,
            session_id,
            chat_id,
            range,
            body,
        })
        .await?;

    Ok(Json(UploadResponse {
        status: "success",
        receipt,
    }))
}
