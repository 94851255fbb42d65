//! Common test utilities.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::connect_info::MockConnectInfo;
use tempfile::TempDir;
use tokio::sync::Mutex;

use vidgate::account::Authenticator;
use vidgate::background::BackgroundTasks;
use vidgate::client::{MemoryClientFactory, Responder};
use vidgate::listing::Lister;
use vidgate::media::{NoopProbe, RangeStreamer, RetryPolicy, SessionFinalizer, UploadReassembler};
use vidgate::server::{self, AppState};
use vidgate::session::SessionRegistry;
use vidgate::store::CatalogStore;
use vidgate::store::file::FileCatalogStore;

/// Streaming chunk size used by test apps.
pub const CHUNK: u64 = 1024;

/// A test app together with the state behind it.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub factory: MemoryClientFactory,
    pub root: PathBuf,
}

impl TestApp {
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Create a test app whose clients never answer.
pub async fn test_app() -> Router {
    test_app_with(None).await.router
}

/// Create a test app whose clients answer through `responder`.
pub async fn test_app_with(responder: Option<Responder>) -> TestApp {
    let tmp = TempDir::new().unwrap();
    // Leak the TempDir so it doesn't get cleaned up during the test.
    let tmp = Box::leak(Box::new(tmp));
    let root = tmp.path().to_path_buf();

    let factory = MemoryClientFactory::new(responder);
    let sessions = SessionRegistry::new(
        Arc::new(factory.clone()),
        root.join("sessions"),
        Duration::from_millis(5),
    );
    let catalog: Arc<dyn CatalogStore> =
        Arc::new(FileCatalogStore::new(root.join("catalog.yaml")));
    let background_tasks = BackgroundTasks::new();

    let finalizer = SessionFinalizer::new(
        sessions.clone(),
        Arc::new(NoopProbe),
        catalog.clone(),
        Duration::from_secs(2),
    );
    let uploads = UploadReassembler::new(
        root.join("uploads"),
        Arc::new(finalizer),
        background_tasks.clone(),
        RetryPolicy {
            attempts: 1,
            initial_backoff: Duration::from_millis(10),
        },
    );

    let (shutdown_tx, _shutdown_rx) = server::shutdown_channel();
    let state = AppState {
        sessions,
        streamer: RangeStreamer::new(CHUNK, Duration::from_millis(500)),
        uploads,
        lister: Lister::new(2, Duration::from_millis(500)),
        authenticator: Authenticator::new(1, "hash", Duration::from_millis(500)),
        catalog,
        background_tasks,
        admin_token: None,
        max_connections: 64,
        max_chunk_bytes: 1024 * 1024,
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let router = server::build_app(state.clone(), 300).layer(MockConnectInfo(SocketAddr::from((
        [127, 0, 0, 1],
        40000,
    ))));

    TestApp {
        router,
        state,
        factory,
        root,
    }
}

/// Write a video file with a recognizable byte pattern.
pub fn write_video(dir: &Path, name: &str, size: usize) -> (PathBuf, Vec<u8>) {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &data).unwrap();
    (path, data)
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
