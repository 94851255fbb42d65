//! Protocol client seam.
//!
//! vidgate never links the messaging client itself. Each session owns one
//! [`ProtocolClient`] obtained from a [`ClientFactory`]; the shipped factory
//! spawns a bridge process per session ([`SubprocessClientFactory`]).

mod error;
mod memory;
mod subprocess;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vidgate_protocol::Command;

use crate::session::SessionId;

pub use error::ClientError;
pub use memory::{MemoryClient, MemoryClientFactory, Responder};
pub use subprocess::{SubprocessClient, SubprocessClientFactory};

/// One connected protocol client.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Hand a command to the client. Replies arrive later as events.
    async fn send(&self, command: &Command) -> Result<(), ClientError>;

    /// Wait up to `timeout` for the next raw event line.
    ///
    /// `Ok(None)` means nothing arrived in time. [`ClientError::Disconnected`]
    /// means no further events will ever arrive.
    async fn receive(&self, timeout: Duration) -> Result<Option<String>, ClientError>;
}

/// Creates the client for a newly opened session.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// `data_dir` is the session's private state directory and already exists.
    async fn connect(
        &self,
        session_id: SessionId,
        data_dir: &Path,
    ) -> Result<Arc<dyn ProtocolClient>, ClientError>;
}
