//! Integration tests for range streaming.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;
use vidgate::client::Responder;
use vidgate::session::SessionId;
use vidgate_protocol::Command;

mod common;

use common::{CHUNK, test_app_with, write_video};

/// A client that reports the requested range as downloaded into `path`.
fn downloading_responder(path: &Path, size: u64) -> Responder {
    let path = path.display().to_string();
    Arc::new(move |_: SessionId, command: &Command| match command {
        Command::DownloadFile {
            file_id, offset, ..
        } => {
            let prefix = size.saturating_sub(*offset);
            vec![
                r#"{"@type":"updateUserStatus"}"#.to_string(),
                format!(
                    r#"{{"@type":"updateFile","file":{{"id":{file_id},"size":{size},"local":{{"path":"{path}","is_downloading_active":true,"download_offset":{offset},"downloaded_prefix_size":0}}}}}}"#
                ),
                format!(
                    r#"{{"@type":"updateFile","file":{{"id":{file_id},"size":{size},"local":{{"path":"{path}","is_downloading_active":false,"download_offset":{offset},"downloaded_prefix_size":{prefix}}}}}}}"#
                ),
            ]
        }
        _ => Vec::new(),
    })
}

fn video_request(uri: &str, range: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(range) = range {
        builder = builder.header(header::RANGE, range);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_range_is_served_as_partial_content() {
    let files = TempDir::new().unwrap();
    let (path, data) = write_video(files.path(), "clip.mp4", 5000);
    let app = test_app_with(Some(downloading_responder(&path, 5000))).await;

    let response = app
        .router()
        .oneshot(video_request(
            "/video?file_id=7&session_id=1",
            Some("bytes=1000-1999"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(headers.get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(
        headers.get(header::CONTENT_RANGE).unwrap(),
        "bytes 1000-1999/5000"
    );
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "1000");

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], &data[1000..2000]);

    let sent = app.factory.client(SessionId::new(1)).unwrap().sent();
    assert!(sent.iter().any(|c| matches!(
        c,
        Command::DownloadFile {
            file_id: 7,
            offset: 1000,
            ..
        }
    )));
}

#[tokio::test]
async fn test_missing_range_serves_first_chunk() {
    let files = TempDir::new().unwrap();
    let (path, data) = write_video(files.path(), "clip.mp4", 5000);
    let app = test_app_with(Some(downloading_responder(&path, 5000))).await;

    let response = app
        .router()
        .oneshot(video_request("/video?file_id=7&session_id=1", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        &format!("bytes 0-{}/5000", CHUNK - 1)
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], &data[..CHUNK as usize]);
}

#[tokio::test]
async fn test_range_past_end_is_clamped() {
    let files = TempDir::new().unwrap();
    let (path, data) = write_video(files.path(), "clip.mp4", 5000);
    let app = test_app_with(Some(downloading_responder(&path, 5000))).await;

    let response = app
        .router()
        .oneshot(video_request(
            "/video?file_id=7&session_id=1",
            Some("bytes=4900-"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 4900-4999/5000"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], &data[4900..]);
}

#[tokio::test]
async fn test_range_beyond_file_is_not_satisfiable() {
    let files = TempDir::new().unwrap();
    let (path, _) = write_video(files.path(), "clip.mp4", 5000);
    let app = test_app_with(Some(downloading_responder(&path, 5000))).await;

    let response = app
        .router()
        .oneshot(video_request(
            "/video?file_id=7&session_id=1",
            Some("bytes=6000-6999"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_malformed_range_is_rejected_before_any_download() {
    let app = test_app_with(None).await;

    for range in ["bytes=-500", "bytes=10-5", "items=0-1", "bytes=0-1,4-5"] {
        let response = app
            .router()
            .oneshot(video_request("/video?file_id=7&session_id=1", Some(range)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{range}");
    }

    assert!(app.factory.client(SessionId::new(1)).is_none());
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let app = test_app_with(None).await;

    let response = app
        .router()
        .oneshot(video_request(
            "/video?file_id=7&session_id=1",
            Some("bytes=0-99"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
}
