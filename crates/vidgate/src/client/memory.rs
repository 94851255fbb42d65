//! In-process protocol client driven by a scripted responder.
//!
//! Useful wherever a real bridge is unavailable: every sent command is
//! recorded, the optional [`Responder`] turns it into raw event lines, and
//! [`MemoryClient::push`] injects unsolicited events.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use vidgate_protocol::Command;

use super::{ClientError, ClientFactory, ProtocolClient};
use crate::session::SessionId;

/// Maps a command to the raw event lines the client emits in reply.
pub type Responder = Arc<dyn Fn(SessionId, &Command) -> Vec<String> + Send + Sync>;

pub struct MemoryClient {
    session_id: SessionId,
    sent: StdMutex<Vec<Command>>,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    responder: Option<Responder>,
}

impl MemoryClient {
    #[must_use]
    pub fn new(session_id: SessionId, responder: Option<Responder>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            session_id,
            sent: StdMutex::new(Vec::new()),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            responder,
        }
    }

    /// Inject a raw event line.
    pub fn push(&self, raw: impl Into<String>) {
        // The receiver lives as long as `self`.
        let _ = self.inbox_tx.send(raw.into());
    }

    /// Commands sent so far, oldest first.
    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().expect("mutex poisoned").clone()
    }
}

#[async_trait]
impl ProtocolClient for MemoryClient {
    async fn send(&self, command: &Command) -> Result<(), ClientError> {
        self.sent
            .lock()
            .expect("mutex poisoned")
            .push(command.clone());
        if let Some(responder) = &self.responder {
            for line in responder(self.session_id, command) {
                self.push(line);
            }
        }
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<String>, ClientError> {
        let mut inbox = self.inbox_rx.lock().await;
        match tokio::time::timeout(timeout, inbox.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) => Err(ClientError::Disconnected),
        }
    }
}

/// Hands out [`MemoryClient`]s and keeps them reachable by session id.
#[derive(Clone, Default)]
pub struct MemoryClientFactory {
    responder: Option<Responder>,
    clients: Arc<DashMap<SessionId, Arc<MemoryClient>>>,
}

impl MemoryClientFactory {
    #[must_use]
    pub fn new(responder: Option<Responder>) -> Self {
        Self {
            responder,
            clients: Arc::new(DashMap::new()),
        }
    }

    /// The most recent client created for `session_id`.
    pub fn client(&self, session_id: SessionId) -> Option<Arc<MemoryClient>> {
        self.clients.get(&session_id).map(|c| Arc::clone(c.value()))
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn connect(
        &self,
        session_id: SessionId,
        _data_dir: &Path,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        let client = Arc::new(MemoryClient::new(session_id, self.responder.clone()));
        self.clients.insert(session_id, Arc::clone(&client));
        Ok(client)
    }
}
