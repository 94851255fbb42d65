//! Posting a reassembled upload through its session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use vidgate_protocol::{Command, Event, InputFile, InputMessageContent};

use super::probe::MediaProbe;
use super::upload::{FinalizeError, Finalizer, UploadJob};
use crate::correlator::{CorrelationKey, Cursor, Timeout};
use crate::session::SessionRegistry;
use crate::store::{CatalogEntry, CatalogStore};

/// Sends the file as a video message, waits until the client reports both the
/// finished upload and the created message, then records the message in the
/// catalog.
pub struct SessionFinalizer {
    sessions: SessionRegistry,
    probe: Arc<dyn MediaProbe>,
    catalog: Arc<dyn CatalogStore>,
    timeout: Duration,
}

impl SessionFinalizer {
    #[must_use]
    pub fn new(
        sessions: SessionRegistry,
        probe: Arc<dyn MediaProbe>,
        catalog: Arc<dyn CatalogStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            probe,
            catalog,
            timeout,
        }
    }
}

#[derive(Default)]
struct Progress {
    uploaded: bool,
    message_id: Option<i64>,
}

impl Progress {
    /// Fold one event in. Returns the message id once both halves are seen.
    fn observe(&mut self, event: &Event, path: &str) -> Option<i64> {
        match event {
            Event::FileStatus(status)
                if status.upload_complete && status.local_path.as_deref() == Some(path) =>
            {
                self.uploaded = true;
            }
            Event::MessageSendSucceeded { message, .. }
                if message.video_local_path() == Some(path) =>
            {
                self.message_id = Some(message.id);
            }
            Event::NewMessage(message)
                if !message.is_pending() && message.video_local_path() == Some(path) =>
            {
                self.message_id = Some(message.id);
            }
            _ => {}
        }
        if self.uploaded { self.message_id } else { None }
    }
}

#[async_trait]
impl Finalizer for SessionFinalizer {
    async fn finalize(&self, job: &UploadJob) -> Result<i64, FinalizeError> {
        let session = self.sessions.get_or_create(job.session_id).await?;
        let metadata = self.probe.probe(&job.path).await;
        let path = job.path.display().to_string();

        let mut cursor = Cursor::anchor(&session, CorrelationKey::Upload(job.path.clone()));
        session
            .send(Command::SendMessage {
                chat_id: job.chat_id,
                input_message_content: InputMessageContent::InputMessageVideo {
                    video: InputFile::InputFileLocal { path: path.clone() },
                    duration: metadata.map(|m| m.duration),
                    width: metadata.map(|m| m.width),
                    height: metadata.map(|m| m.height),
                    supports_streaming: true,
                },
            })
            .await?;
        debug!(session_id = %session.id(), chat_id = job.chat_id, path = %path, "Upload sent");

        let mut progress = Progress::default();
        let message_id = cursor
            .wait_for(Timeout::After(self.timeout), |event| progress.observe(event, &path))
            .await?;

        let inserted = self
            .catalog
            .attach(CatalogEntry::new(job.chat_id, message_id))
            .await?;
        info!(
            session_id = %session.id(),
            chat_id = job.chat_id,
            message_id,
            inserted,
            "Upload attached to catalog"
        );
        Ok(message_id)
    }
}
