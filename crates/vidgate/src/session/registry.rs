//! Process-wide map from session id to open session.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Session, SessionError, SessionId, receiver};
use crate::client::ClientFactory;
use crate::store::StorageError;
use crate::sync::KeyedLocks;

// ============================================================================
// SessionRegistry
// ============================================================================

/// Lazily creates sessions and keeps them for the life of the process.
///
/// Creation is serialized per id, so a session never gets two clients or two
/// receivers. A session whose client has terminated is replaced on the next
/// `get_or_create`.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    creation_locks: KeyedLocks<SessionId>,
    factory: Arc<dyn ClientFactory>,
    sessions_dir: PathBuf,
    poll_interval: Duration,
    receivers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        sessions_dir: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            creation_locks: KeyedLocks::new(),
            factory,
            sessions_dir: sessions_dir.into(),
            poll_interval,
            receivers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    // ------------------------------------------------------------------------
    // Lookup / Creation
    // ------------------------------------------------------------------------

    /// Open session for `id`, if any.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .filter(|s| !s.is_closed())
    }

    /// Return the session for `id`, creating it on first reference.
    pub async fn get_or_create(&self, id: SessionId) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = self.get(id) {
            return Ok(session);
        }

        let lock = self.creation_locks.get(&id);
        let _guard = lock.lock().await;

        if let Some(session) = self.get(id) {
            return Ok(session);
        }
        if self.sessions.remove(&id).is_some() {
            debug!(session_id = %id, "Replacing terminated session");
        }

        let data_dir = self.session_dir(id);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| StorageError::file_io(&data_dir, e))?;

        let client = self.factory.connect(id, &data_dir).await?;
        let session = Arc::new(Session::new(id, client, data_dir));

        let handle = receiver::spawn(
            id,
            session.client(),
            session.events_arc(),
            session.closed_token(),
            self.poll_interval,
        );
        self.track_receiver(handle);

        self.sessions.insert(id, Arc::clone(&session));
        info!(session_id = %id, "Session opened");
        Ok(session)
    }

    /// Directory holding the client state for `id`.
    pub fn session_dir(&self, id: SessionId) -> PathBuf {
        self.sessions_dir.join(id.to_string())
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Close the session and delete its state directory.
    ///
    /// Returns `false` if no session was registered under `id`.
    pub async fn close(&self, id: SessionId) -> Result<bool, SessionError> {
        let removed = self.sessions.remove(&id);
        if let Some((_, session)) = &removed {
            session.close();
        }
        self.creation_locks.release(&id);

        let data_dir = self.session_dir(id);
        match tokio::fs::remove_dir_all(&data_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::file_io(&data_dir, e).into()),
        }

        if removed.is_some() {
            info!(session_id = %id, "Session closed");
        }
        Ok(removed.is_some())
    }

    /// Cancel every session and wait for their receivers to stop.
    pub async fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.value().close();
        }

        let handles: Vec<_> = std::mem::take(&mut *self.receivers.lock().expect("mutex poisoned"));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Receiver task panicked");
            }
        }
        debug!(sessions = self.sessions.len(), "Session registry shut down");
    }

    // ------------------------------------------------------------------------
    // Retention
    // ------------------------------------------------------------------------

    /// Trim every session's event log, keeping `retain_tail` entries plus
    /// whatever an active waiter still needs. Returns entries dropped.
    pub fn sweep(&self, retain_tail: u64) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().events().sweep(retain_tail))
            .sum()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the runtime stops.
    pub fn spawn_sweeper(self, interval: Duration, retain_tail: u64) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = self.sweep(retain_tail);
                if dropped > 0 {
                    debug!(dropped, sessions = self.len(), "Swept session event logs");
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn track_receiver(&self, handle: JoinHandle<()>) {
        let mut guard = self.receivers.lock().expect("mutex poisoned");
        guard.retain(|h| !h.is_finished());
        guard.push(handle);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClientFactory;
    use tempfile::TempDir;
    use vidgate_protocol::Event;

    fn registry(tmp: &TempDir, factory: MemoryClientFactory) -> SessionRegistry {
        SessionRegistry::new(
            Arc::new(factory),
            tmp.path().join("sessions"),
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn get_or_create_is_single_creation_per_id() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp, MemoryClientFactory::default());
        let id = SessionId::new(9);

        let (a, b) = tokio::join!(registry.get_or_create(id), registry.get_or_create(id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.session_dir(id).is_dir());
    }

    #[tokio::test]
    async fn close_removes_session_and_directory() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp, MemoryClientFactory::default());
        let id = SessionId::new(3);
        let session = registry.get_or_create(id).await.unwrap();
        std::fs::write(session.data_dir().join("db.sqlite"), b"x").unwrap();

        assert!(registry.close(id).await.unwrap());

        assert!(session.is_closed());
        assert!(registry.get(id).is_none());
        assert!(!registry.session_dir(id).exists());
        assert!(!registry.close(id).await.unwrap());
    }

    #[tokio::test]
    async fn terminated_session_is_replaced() {
        let tmp = TempDir::new().unwrap();
        let factory = MemoryClientFactory::default();
        let registry = registry(&tmp, factory.clone());
        let id = SessionId::new(5);

        let first = registry.get_or_create(id).await.unwrap();
        factory
            .client(id)
            .unwrap()
            .push(r#"{"@type":"authorizationStateClosed"}"#);
        first.closed_token().cancelled().await;

        let second = registry.get_or_create(id).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[tokio::test]
    async fn sweep_trims_idle_logs() {
        let tmp = TempDir::new().unwrap();
        let registry = registry(&tmp, MemoryClientFactory::default());
        let session = registry.get_or_create(SessionId::new(1)).await.unwrap();
        for _ in 0..10 {
            session.events().append(Event::Other {
                kind: "updateOption".to_string(),
            });
        }

        assert_eq!(registry.sweep(4), 6);
        assert_eq!(session.events().len(), 4);
    }
}
