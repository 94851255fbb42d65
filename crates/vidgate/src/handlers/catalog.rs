//! Catalog metadata for posted videos.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::params::{self, IdParam};
use super::problem_details::{self, ProblemDetails};
use crate::server::AppState;
use crate::store::CatalogEntry;

#[derive(Debug, Deserialize)]
pub struct SetVideoDataRequest {
    chat_id: Option<IdParam>,
    message_id: Option<IdParam>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    uploader: String,
}

/// POST /set_video_data
pub async fn set_video_data(
    State(state): State<AppState>,
    body: Result<Json<SetVideoDataRequest>, JsonRejection>,
) -> Result<Json<CatalogEntry>, ProblemDetails> {
    let Json(request) = body.map_err(|e| problem_details::bad_request(e.body_text()))?;
    let chat_id: i64 = params::required_id("chat_id", request.chat_id.as_ref())?;
    let message_id: i64 = params::required_id("message_id", request.message_id.as_ref())?;
    if request.title.is_empty() {
        return Err(problem_details::bad_request("missing parameter 'title'"));
    }

    let stored = state
        .catalog
        .upsert(CatalogEntry {
            title: request.title,
            description: request.description,
            uploader: request.uploader,
            ..CatalogEntry::new(chat_id, message_id)
        })
        .await?;
    Ok(Json(stored))
}

#[derive(Debug, Deserialize)]
pub struct GetVideosDataRequest {
    chat_id: Option<IdParam>,
    videos: Option<Vec<Value>>,
}

/// POST /get_videos_data
///
/// Takes a video list as returned by `/get_files`. Videos with a catalog
/// entry come back as that entry plus the original under `telegram_data`;
/// the rest are returned unchanged.
pub async fn get_videos_data(
    State(state): State<AppState>,
    body: Result<Json<GetVideosDataRequest>, JsonRejection>,
) -> Result<Json<Vec<Value>>, ProblemDetails> {
    let Json(request) = body.map_err(|e| problem_details::bad_request(e.body_text()))?;
    let chat_id: i64 = params::required_id("chat_id", request.chat_id.as_ref())?;
    let videos = request
        .videos
        .ok_or_else(|| problem_details::bad_request("missing parameter 'videos'"))?;

    let mut merged = Vec::with_capacity(videos.len());
    for video in videos {
        let message_id = video
            .get("message_id")
            .cloned()
            .and_then(|v| serde_json::from_value::<IdParam>(v).ok())
            .map(|id| id.parse::<i64>("message_id"))
            .transpose()?;

        let entry = match message_id {
            Some(message_id) => state.catalog.find(chat_id, message_id).await?,
            None => None,
        };
        merged.push(match entry {
            Some(entry) => with_telegram_data(&entry, video),
            None => video,
        });
    }
    Ok(Json(merged))
}

fn with_telegram_data(entry: &CatalogEntry, video: Value) -> Value {
    let mut object = match serde_json::to_value(entry) {
        Ok(Value::Object(object)) => object,
        _ => Map::new(),
    };
    object.insert("telegram_data".to_string(), video);
    Value::Object(object)
}
