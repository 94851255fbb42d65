use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use vidgate_protocol::Command;

use super::{EventLog, LogEntry, SessionError, SessionId};
use crate::client::ProtocolClient;

/// An open session: exactly one protocol client and one event log.
pub struct Session {
    id: SessionId,
    client: Arc<dyn ProtocolClient>,
    events: Arc<EventLog>,
    data_dir: PathBuf,
    closed: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: SessionId, client: Arc<dyn ProtocolClient>, data_dir: PathBuf) -> Self {
        Self {
            id,
            client,
            events: Arc::new(EventLog::new()),
            data_dir,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn events_arc(&self) -> Arc<EventLog> {
        Arc::clone(&self.events)
    }

    pub(crate) fn client(&self) -> Arc<dyn ProtocolClient> {
        Arc::clone(&self.client)
    }

    /// The session's private state directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Hand `command` to the protocol client.
    pub async fn send(&self, command: Command) -> Result<(), SessionError> {
        debug!(session_id = %self.id, command = command.kind(), "Sending command");
        self.client.send(&command).await?;
        Ok(())
    }

    /// Entries appended after `cursor`.
    pub fn events_since(&self, cursor: u64) -> Vec<LogEntry> {
        self.events.read_since(cursor)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled once the session terminates.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}
