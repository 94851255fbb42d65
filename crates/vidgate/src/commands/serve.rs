//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{info, warn};

use vidgate::account::Authenticator;
use vidgate::background::BackgroundTasks;
use vidgate::client::{ClientFactory, SubprocessClientFactory};
use vidgate::config::{self, Config};
use vidgate::listing::Lister;
use vidgate::media::{
    FfprobeProbe, MediaProbe, NoopProbe, RangeStreamer, RetryPolicy, SessionFinalizer,
    UploadReassembler,
};
use vidgate::server::{self, AppState};
use vidgate::session::SessionRegistry;
use vidgate::store::CatalogStore;
use vidgate::store::file::FileCatalogStore;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load {config_path}"))?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    // Resolve workspace root, then derive paths from it when not explicitly set.
    // Paths handed to the client must be absolute: its working directory is
    // the session directory.
    let config_path_ref = Path::new(config_path);
    let workspace_raw = config
        .workspace
        .as_deref()
        .unwrap_or(Path::new(config::DEFAULT_WORKSPACE));
    let workspace = absolute(config::resolve_path(config_path_ref, workspace_raw))?;
    let resolve = |path: Option<&PathBuf>, default: &str| -> Result<PathBuf> {
        absolute(
            path.map(|p| config::resolve_path(config_path_ref, p))
                .unwrap_or_else(|| workspace.join(default)),
        )
    };
    let sessions_path = resolve(config.sessions.path.as_ref(), config::DEFAULT_SESSIONS_DIR)?;
    let upload_path = resolve(config.upload.path.as_ref(), config::DEFAULT_UPLOAD_DIR)?;
    let catalog_path = resolve(config.catalog.path.as_ref(), config::DEFAULT_CATALOG_FILE)?;

    // Resolve the bridge executable relative to the config file when it is a path
    if config.client.command.contains(std::path::MAIN_SEPARATOR) {
        let command = config::resolve_path(config_path_ref, Path::new(&config.client.command));
        config.client.command = command.to_string_lossy().to_string();
    }
    let factory: Arc<dyn ClientFactory> = Arc::new(
        SubprocessClientFactory::new(&config.client).context("Invalid client configuration")?,
    );

    let sessions = SessionRegistry::new(
        factory,
        &sessions_path,
        config.client.poll_interval(),
    );
    if config.sessions.sweep_interval_seconds > 0 {
        sessions.clone().spawn_sweeper(
            Duration::from_secs(config.sessions.sweep_interval_seconds),
            config.sessions.retain_events,
        );
    }
    info!(path = %sessions_path.display(), "Session registry ready");

    let catalog: Arc<dyn CatalogStore> = Arc::new(FileCatalogStore::new(&catalog_path));
    let probe: Arc<dyn MediaProbe> = if config.probe.enabled {
        Arc::new(FfprobeProbe::new(config.probe.command.clone()))
    } else {
        Arc::new(NoopProbe)
    };

    let background_tasks = BackgroundTasks::new();
    let finalizer = SessionFinalizer::new(
        sessions.clone(),
        probe,
        catalog.clone(),
        Duration::from_secs(config.upload.finalize_timeout_seconds),
    );
    let uploads = UploadReassembler::new(
        &upload_path,
        Arc::new(finalizer),
        background_tasks.clone(),
        RetryPolicy {
            attempts: config.upload.finalize_attempts,
            ..RetryPolicy::default()
        },
    );
    info!(path = %upload_path.display(), "Upload staging ready");

    // Create shutdown channel for HTTP-triggered shutdown
    let (shutdown_tx, shutdown_rx) = server::shutdown_channel();

    let state = AppState {
        sessions: sessions.clone(),
        streamer: RangeStreamer::new(
            config.streaming.chunk_size,
            Duration::from_secs(config.streaming.wait_timeout_seconds),
        ),
        uploads,
        lister: Lister::new(
            config.listing.page_size,
            Duration::from_secs(config.listing.page_timeout_seconds),
        ),
        authenticator: Authenticator::new(
            config.client.api_id,
            config.client.api_hash.clone(),
            Duration::from_secs(config.auth.state_timeout_seconds),
        ),
        catalog,
        background_tasks: background_tasks.clone(),
        admin_token: config.server.admin_token.clone(),
        max_connections: config.server.max_connections,
        max_chunk_bytes: config.upload.max_chunk_bytes,
        shutdown_tx: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(addr = %addr, "Starting server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown_rx))
    .await?;

    // Stop receivers and release client processes
    sessions.shutdown().await;

    // Wait for in-flight upload finalization before exiting
    background_tasks.shutdown().await;

    info!("Server stopped");
    Ok(())
}

fn absolute(path: PathBuf) -> Result<PathBuf> {
    std::path::absolute(&path).with_context(|| format!("Failed to resolve {}", path.display()))
}

async fn shutdown_signal(http_shutdown: tokio::sync::oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = http_shutdown => info!("Received shutdown request via HTTP, shutting down..."),
    }
}
