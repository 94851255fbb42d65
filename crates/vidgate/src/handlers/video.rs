//! GET /video

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::params;
use super::problem_details::{self, ProblemDetails};
use crate::media::parse_range;
use crate::session::SessionId;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    file_id: Option<String>,
    session_id: Option<String>,
}

/// Serve one byte range of a remote video, downloading it on demand.
pub async fn get_video(
    State(state): State<AppState>,
    Query(query): Query<VideoQuery>,
    headers: HeaderMap,
) -> Result<Response, ProblemDetails> {
    let file_id: i32 = params::required("file_id", query.file_id.as_deref())?;
    let session_id: SessionId = params::required("session_id", query.session_id.as_deref())?;

    let range_header = headers
        .get(header::RANGE)
        .map(HeaderValue::to_str)
        .transpose()
        .map_err(|_| problem_details::range_not_satisfiable("Range header is not valid text"))?;
    let range = parse_range(range_header, state.streamer.chunk_size())?;

    let session = state.sessions.get_or_create(session_id).await?;
    let content = state.streamer.stream(&session, file_id, range).await?;

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CONTENT_RANGE, content.content_range()),
            (header::CONTENT_LENGTH, content.body.len().to_string()),
        ],
        content.body,
    )
        .into_response())
}
