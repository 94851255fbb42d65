//! Bridge process speaking JSON Lines over stdio.
//!
//! One child per session. Commands are written to its stdin, one JSON object
//! per line; its stdout is drained by a reader task into a channel that
//! [`SubprocessClient::receive`] pulls from. EOF on stdout disconnects the
//! client.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command as ProcessCommand};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};
use vidgate_protocol::Command;

use super::{ClientError, ClientFactory, ProtocolClient};
use crate::config::ClientConfig;
use crate::session::SessionId;

/// Lines buffered between the reader task and the session's receiver.
const EVENT_BUFFER: usize = 1024;

// ============================================================================
// Factory
// ============================================================================

/// Spawns one bridge process per session.
///
/// The child receives `VIDGATE_SESSION_ID` and `VIDGATE_DATA_DIR` in its
/// environment and runs with the session's data directory as its cwd.
#[derive(Debug, Clone)]
pub struct SubprocessClientFactory {
    command: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl SubprocessClientFactory {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        if config.command.is_empty() {
            return Err(ClientError::NotConfigured(
                "client.command must name the bridge executable".to_string(),
            ));
        }
        Ok(Self {
            command: PathBuf::from(&config.command),
            args: config.args.clone(),
            env: config.env.clone(),
        })
    }

    fn spawn_child(&self, session_id: SessionId, data_dir: &Path) -> std::io::Result<Child> {
        let mut cmd = ProcessCommand::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .env("VIDGATE_SESSION_ID", session_id.to_string())
            .env("VIDGATE_DATA_DIR", data_dir)
            .current_dir(data_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // Make sure the bridge dies with us.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.spawn()
    }
}

#[async_trait]
impl ClientFactory for SubprocessClientFactory {
    async fn connect(
        &self,
        session_id: SessionId,
        data_dir: &Path,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        let mut child =
            self.spawn_child(session_id, data_dir)
                .map_err(|source| ClientError::Spawn {
                    command: self.command.display().to_string(),
                    source,
                })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(ClientError::Disconnected);
        };

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            debug!(session_id = %session_id, "Event channel closed");
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(session_id = %session_id, "Bridge stdout closed");
                        break;
                    }
                    Err(e) => {
                        error!(session_id = %session_id, error = %e, "Error reading bridge stdout");
                        break;
                    }
                }
            }
        });

        info!(
            session_id = %session_id,
            command = %self.command.display(),
            pid = child.id().unwrap_or_default(),
            "Protocol client started"
        );

        Ok(Arc::new(SubprocessClient {
            session_id,
            stdin: Mutex::new(stdin),
            events: Mutex::new(rx),
            _child: child,
        }))
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct SubprocessClient {
    session_id: SessionId,
    stdin: Mutex<ChildStdin>,
    events: Mutex<mpsc::Receiver<String>>,
    // Held for kill_on_drop.
    _child: Child,
}

#[async_trait]
impl ProtocolClient for SubprocessClient {
    async fn send(&self, command: &Command) -> Result<(), ClientError> {
        let mut line = serde_json::to_string(command)?;
        line.push('\n');

        let mut stdin = self.stdin.lock().await;
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!(session_id = %self.session_id, command = command.kind(), error = %e, "Failed to write command");
            return Err(e.into());
        }
        stdin.flush().await?;
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<String>, ClientError> {
        let mut events = self.events.lock().await;
        match tokio::time::timeout(timeout, events.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => Err(ClientError::Disconnected),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
