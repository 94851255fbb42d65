//! Request/response correlation over a session's event log.
//!
//! Events carry no request ids, so every higher-level operation waits for the
//! first event that satisfies a predicate. A wait runs through a [`Cursor`]
//! anchored at the newest log entry right before the command is sent. The
//! cursor belongs to that one request: concurrent requests of the same kind
//! each hold their own and never move each other's position, and every event
//! stays visible to every cursor anchored before it.
//!
//! Typical use:
//!
//! ```ignore
//! let mut cursor = Cursor::anchor(&session, CorrelationKey::Chats);
//! session.send(command).await?;
//! let page = cursor
//!     .wait_for(Timeout::After(d), |event| match event {
//!         Event::ChatList(list) => Some(list.clone()),
//!         _ => None,
//!     })
//!     .await?;
//! ```
//!
//! Anchoring before sending guarantees a late reply to an earlier request can
//! never satisfy the new one.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;
use vidgate_protocol::Event;

use crate::session::{ReaderLease, Session, SessionId};

// ============================================================================
// Types
// ============================================================================

/// What a wait is correlating on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// Download progress of one file.
    File(i32),
    /// Upload and message creation for one local path.
    Upload(PathBuf),
    /// Main chat list pages.
    Chats,
    /// Detail of one chat.
    ChatDetail(i64),
    /// History pages of one chat.
    ChatHistory(i64),
    Authorization,
    Profile,
}

/// How long a wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Machine-bound waits.
    After(Duration),
    /// Waits on a human (login codes). Ends only on match or session close.
    Indefinite,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelateError {
    #[error("timed out after {0:?} waiting for {1}")]
    TimedOut(Duration, String),

    #[error("session {0} closed while waiting")]
    SessionClosed(SessionId),
}

// ============================================================================
// Cursor
// ============================================================================

/// One waiter's position in a session's event log.
///
/// Holds a reader lease for its whole lifetime, so the log never trims
/// entries the cursor has not examined yet.
pub struct Cursor<'a> {
    session: &'a Session,
    key: CorrelationKey,
    seq: u64,
    lease: ReaderLease<'a>,
}

impl<'a> Cursor<'a> {
    /// Position a new cursor at the newest entry of the session's log.
    ///
    /// Call before sending a command whose reply will be awaited.
    pub fn anchor(session: &'a Session, key: CorrelationKey) -> Self {
        let (seq, lease) = session.events().lease_latest();
        Self {
            session,
            key,
            seq,
            lease,
        }
    }

    /// Last examined sequence number.
    pub fn position(&self) -> u64 {
        self.seq
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the first event past the cursor for which `predicate`
    /// returns `Some`.
    ///
    /// Every examined entry advances the cursor, matched or not, so a later
    /// wait on the same cursor never sees those entries again.
    pub async fn wait_for<T, F>(
        &mut self,
        timeout: Timeout,
        mut predicate: F,
    ) -> Result<T, CorrelateError>
    where
        F: FnMut(&Event) -> Option<T>,
    {
        let session = self.session;
        let log = session.events();
        let closed = session.closed_token();
        let mut updates = log.subscribe();
        let deadline = match timeout {
            Timeout::After(d) => Some((Instant::now() + d, d)),
            Timeout::Indefinite => None,
        };

        loop {
            updates.borrow_and_update();
            for entry in log.read_since(self.seq) {
                self.seq = entry.seq;
                if let Some(found) = predicate(&entry.event) {
                    trace!(session_id = %session.id(), key = ?self.key, seq = self.seq, "Correlated event");
                    self.lease.advance(self.seq);
                    return Ok(found);
                }
            }
            self.lease.advance(self.seq);

            if closed.is_cancelled() {
                return Err(CorrelateError::SessionClosed(session.id()));
            }

            let wake = async {
                tokio::select! {
                    changed = updates.changed() => changed.is_ok(),
                    _ = closed.cancelled() => true,
                }
            };
            let woke = match deadline {
                Some((at, d)) => match tokio::time::timeout_at(at, wake).await {
                    Ok(woke) => woke,
                    Err(_) => return Err(CorrelateError::TimedOut(d, describe(&self.key))),
                },
                None => wake.await,
            };
            if !woke {
                return Err(CorrelateError::SessionClosed(session.id()));
            }
        }
    }
}

fn describe(key: &CorrelationKey) -> String {
    match key {
        CorrelationKey::File(id) => format!("file {id}"),
        CorrelationKey::Upload(path) => format!("upload {}", path.display()),
        CorrelationKey::Chats => "chat list".to_string(),
        CorrelationKey::ChatDetail(id) => format!("chat {id}"),
        CorrelationKey::ChatHistory(id) => format!("history of chat {id}"),
        CorrelationKey::Authorization => "authorization state".to_string(),
        CorrelationKey::Profile => "user profile".to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::MemoryClient;
    use vidgate_protocol::ChatList;

    fn session() -> Arc<Session> {
        let id = SessionId::new(1);
        Arc::new(Session::new(
            id,
            Arc::new(MemoryClient::new(id, None)),
            PathBuf::from("/nonexistent"),
        ))
    }

    fn chats(ids: &[i64]) -> Event {
        Event::ChatList(ChatList {
            total_count: ids.len() as i32,
            chat_ids: ids.to_vec(),
        })
    }

    fn noise() -> Event {
        Event::Other {
            kind: "updateOption".to_string(),
        }
    }

    fn chat_page(event: &Event) -> Option<Vec<i64>> {
        match event {
            Event::ChatList(list) => Some(list.chat_ids.clone()),
            _ => None,
        }
    }

    const SHORT: Timeout = Timeout::After(Duration::from_millis(200));

    #[tokio::test]
    async fn later_waits_resume_after_the_last_match() {
        let session = session();
        let mut cursor = Cursor::anchor(&session, CorrelationKey::Chats);
        session.events().append(noise());
        session.events().append(noise());
        session.events().append(chats(&[1]));
        session.events().append(chats(&[2]));

        let first = cursor.wait_for(SHORT, chat_page).await.unwrap();
        assert_eq!(first, vec![1]);
        assert_eq!(cursor.position(), 3);

        let second = cursor.wait_for(SHORT, chat_page).await.unwrap();
        assert_eq!(second, vec![2]);

        let third = cursor.wait_for(SHORT, chat_page).await;
        assert!(matches!(third, Err(CorrelateError::TimedOut(..))));
    }

    #[tokio::test]
    async fn overlapping_waiters_on_one_key_do_not_share_a_position() {
        let session = session();
        let mut first = Cursor::anchor(&session, CorrelationKey::File(5));
        session.events().append(chats(&[1]));

        // A second request of the same kind starts and finishes before the
        // first one gets to look at the log.
        let mut second = Cursor::anchor(&session, CorrelationKey::File(5));
        session.events().append(chats(&[2]));
        assert_eq!(second.wait_for(SHORT, chat_page).await.unwrap(), vec![2]);

        assert_eq!(first.wait_for(SHORT, chat_page).await.unwrap(), vec![1]);
        assert_eq!(first.wait_for(SHORT, chat_page).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn wakes_on_append_after_suspending() {
        let session = session();

        let writer = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for _ in 0..5 {
                writer.events().append(noise());
            }
            writer.events().append(chats(&[42]));
        });

        let found = {
            let mut cursor = Cursor::anchor(&session, CorrelationKey::Chats);
            cursor
                .wait_for(Timeout::After(Duration::from_secs(2)), chat_page)
                .await
                .unwrap()
        };
        assert_eq!(found, vec![42]);
        assert_eq!(session.events().active_readers(), 0);
    }

    #[tokio::test]
    async fn anchor_hides_earlier_replies() {
        let session = session();
        session.events().append(chats(&[1]));

        let mut cursor = Cursor::anchor(&session, CorrelationKey::Chats);
        assert_eq!(cursor.position(), 1);
        let result = cursor.wait_for(SHORT, chat_page).await;
        assert!(matches!(result, Err(CorrelateError::TimedOut(..))));
    }

    #[tokio::test]
    async fn sweeping_while_anchored_keeps_the_reply() {
        let session = session();
        for _ in 0..4 {
            session.events().append(noise());
        }

        let mut cursor = Cursor::anchor(&session, CorrelationKey::Profile);
        session.events().append(chats(&[9]));
        session.events().append(noise());
        session.events().sweep(0);

        assert_eq!(cursor.wait_for(SHORT, chat_page).await.unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn indefinite_wait_ends_when_session_closes() {
        let session = session();

        let closer = Arc::clone(&session);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let mut cursor = Cursor::anchor(&session, CorrelationKey::Authorization);
        let result = cursor.wait_for(Timeout::Indefinite, chat_page).await;
        assert_eq!(result, Err(CorrelateError::SessionClosed(session.id())));
    }

    #[tokio::test]
    async fn events_before_close_are_still_examined() {
        let session = session();
        let mut cursor = Cursor::anchor(&session, CorrelationKey::Authorization);
        session
            .events()
            .append(Event::AuthorizationState(vidgate_protocol::AuthorizationState::new(
                "authorizationStateClosed",
            )));
        session.close();

        let state = cursor
            .wait_for(SHORT, |e| match e {
                Event::AuthorizationState(s) => Some(s.state.clone()),
                _ => None,
            })
            .await
            .unwrap();
        assert_eq!(state, "authorizationStateClosed");
    }

    #[tokio::test]
    async fn timeout_names_what_was_awaited() {
        let session = session();
        let mut cursor = Cursor::anchor(&session, CorrelationKey::ChatHistory(7));
        let err = cursor.wait_for(SHORT, chat_page).await.unwrap_err();
        assert_eq!(
            err,
            CorrelateError::TimedOut(Duration::from_millis(200), "history of chat 7".to_string())
        );
    }
}
