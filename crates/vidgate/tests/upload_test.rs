//! Integration tests for chunked upload and finalization.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;
use vidgate::client::Responder;
use vidgate::session::SessionId;
use vidgate_protocol::{Command, InputFile, InputMessageContent};

mod common;

use common::{TestApp, test_app_with};

const CHAT: i64 = -100;

/// A client that posts any sent video and records its bytes.
fn posting_responder(seen: Arc<Mutex<Option<Vec<u8>>>>) -> Responder {
    Arc::new(move |_: SessionId, command: &Command| {
        let Command::SendMessage {
            input_message_content:
                InputMessageContent::InputMessageVideo {
                    video: InputFile::InputFileLocal { path },
                    ..
                },
            ..
        } = command
        else {
            return Vec::new();
        };
        *seen.lock().unwrap() = std::fs::read(path).ok();

        let content = format!(
            r#""content":{{"@type":"messageVideo","video":{{"video":{{"id":9,"local":{{"path":"{path}"}}}}}}}}"#
        );
        vec![
            format!(
                r#"{{"@type":"updateNewMessage","message":{{"id":1,"chat_id":{CHAT},"sending_state":{{"@type":"messageSendingStatePending"}},{content}}}}}"#
            ),
            format!(
                r#"{{"@type":"updateFile","file":{{"id":9,"size":10,"local":{{"path":"{path}"}},"remote":{{"is_uploading_completed":true}}}}}}"#
            ),
            format!(
                r#"{{"@type":"updateMessageSendSucceeded","old_message_id":1,"message":{{"id":2048,"chat_id":{CHAT},{content}}}}}"#
            ),
        ]
    })
}

fn chunk(file_name: &str, content_range: &str, body: &[u8]) -> Request<Body> {
    Request::post("/upload")
        .header(header::CONTENT_RANGE, content_range)
        .header("session_id", "3")
        .header("chat_id", CHAT.to_string())
        .header("file_name", file_name)
        .body(Body::from(body.to_vec()))
        .unwrap()
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_parallel_chunks_are_assembled_and_posted() {
    let seen = Arc::new(Mutex::new(None));
    let app = test_app_with(Some(posting_responder(seen.clone()))).await;
    let data = b"0123456789";

    let (a, b, c) = tokio::join!(
        send(&app, chunk("clip.mp4", "bytes 4-7/10", &data[4..8])),
        send(&app, chunk("clip.mp4", "bytes 0-3/10", &data[0..4])),
        send(&app, chunk("clip.mp4", "bytes 8-9/10", &data[8..10])),
    );
    for (status, json) in [&a, &b, &c] {
        assert_eq!(*status, StatusCode::OK);
        assert_eq!(json["status"], "success");
        assert_eq!(json["total"], 10);
    }
    let completed = [&a, &b, &c]
        .iter()
        .filter(|(_, json)| json["complete"] == true)
        .count();
    assert_eq!(completed, 1);

    app.state.background_tasks.shutdown().await;

    assert_eq!(seen.lock().unwrap().as_deref(), Some(&data[..]));
    let entry = app.state.catalog.find(CHAT, 2048).await.unwrap();
    assert!(entry.is_some());
    assert!(!app.root.join("uploads").join("clip.mp4").exists());
    assert_eq!(app.state.uploads.active_jobs(), 0);

    let sends = app
        .factory
        .client(SessionId::new(3))
        .unwrap()
        .sent()
        .into_iter()
        .filter(|c| matches!(c, Command::SendMessage { chat_id: CHAT, .. }))
        .count();
    assert_eq!(sends, 1);
}

#[tokio::test]
async fn test_resubmitted_chunk_is_not_counted_twice() {
    let app = test_app_with(None).await;

    let (_, first) = send(&app, chunk("a.mp4", "bytes 0-4/10", b"abcde")).await;
    let (status, again) = send(&app, chunk("a.mp4", "bytes 0-4/10", b"abcde")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["received"], 5);
    assert_eq!(again["received"], 5);
    assert_eq!(again["complete"], false);
    assert_eq!(app.state.uploads.active_jobs(), 1);
}

#[tokio::test]
async fn test_inconsistent_chunks_are_rejected() {
    let app = test_app_with(None).await;

    send(&app, chunk("b.mp4", "bytes 0-4/10", b"abcde")).await;

    let (status, json) = send(&app, chunk("b.mp4", "bytes 5-9/20", b"fghij")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(json["status"], 416);

    let (status, _) = send(&app, chunk("b.mp4", "bytes 5-9/10", b"fg")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);

    let (status, _) = send(&app, chunk("b.mp4", "bytes 9-5/10", b"fghij")).await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn test_chunk_for_finalizing_upload_is_a_conflict() {
    // Without a responder the post is never confirmed, so finalization
    // stays in flight for the rest of the test.
    let app = test_app_with(None).await;

    let (status, done) = send(&app, chunk("d.mp4", "bytes 0-4/5", b"abcde")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["complete"], true);

    let (status, json) = send(&app, chunk("d.mp4", "bytes 0-4/5", b"zzzzz")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["status"], 409);

    let staged = std::fs::read(app.root.join("uploads").join("d.mp4")).unwrap();
    assert_eq!(staged, b"abcde");
}

#[tokio::test]
async fn test_bad_headers_are_rejected() {
    let app = test_app_with(None).await;

    let (status, _) = send(&app, chunk("../escape.mp4", "bytes 0-1/2", b"ab")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/upload")
        .header("session_id", "3")
        .header("chat_id", "1")
        .header("file_name", "c.mp4")
        .body(Body::from("ab"))
        .unwrap();
    let (status, json) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["detail"].as_str().unwrap().contains("content-range"));

    assert_eq!(app.state.uploads.active_jobs(), 0);
}
