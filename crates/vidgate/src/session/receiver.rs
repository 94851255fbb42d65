//! Per-session task draining the protocol client into the event log.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use vidgate_protocol::Event;

use super::{EventLog, SessionId};
use crate::client::ProtocolClient;

/// Spawn the receiver for one session.
///
/// Runs until the client reports it is closed, the client disconnects, or
/// `closed` is cancelled. On exit it cancels `closed` so every waiter on the
/// session observes termination.
pub(crate) fn spawn(
    session_id: SessionId,
    client: Arc<dyn ProtocolClient>,
    events: Arc<EventLog>,
    closed: CancellationToken,
    poll_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(session_id, client, &events, &closed, poll_interval).await;
        closed.cancel();
        debug!(session_id = %session_id, "Receiver stopped");
    })
}

async fn run(
    session_id: SessionId,
    client: Arc<dyn ProtocolClient>,
    events: &EventLog,
    closed: &CancellationToken,
    poll_interval: Duration,
) {
    debug!(session_id = %session_id, "Receiver started");

    loop {
        let received = tokio::select! {
            biased;
            _ = closed.cancelled() => return,
            received = client.receive(poll_interval) => received,
        };

        let raw = match received {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Protocol client receive failed");
                return;
            }
        };

        let event = Event::parse(&raw);
        if let Event::Malformed { reason } = &event {
            warn!(session_id = %session_id, reason = %reason, "Malformed event from protocol client");
        }
        let terminal = event.is_closed();
        let kind = event.kind().to_string();
        let seq = events.append(event);
        trace!(session_id = %session_id, seq, kind = %kind, "Event appended");

        if terminal {
            info!(session_id = %session_id, "Protocol client closed");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;

    const POLL: Duration = Duration::from_millis(20);

    async fn wait_for_len(log: &EventLog, len: usize) {
        let mut rx = log.subscribe();
        while log.len() < len {
            tokio::time::timeout(Duration::from_secs(2), rx.changed())
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn malformed_lines_occupy_a_slot_and_do_not_stop_the_loop() {
        let client = Arc::new(MemoryClient::new(SessionId::new(1), None));
        let log = Arc::new(EventLog::new());
        let closed = CancellationToken::new();
        let handle = spawn(
            SessionId::new(1),
            client.clone(),
            log.clone(),
            closed.clone(),
            POLL,
        );

        client.push(r#"{"@type":"chats","chat_ids":[1]}"#);
        client.push("garbage");
        client.push(r#"{"@type":"chats","chat_ids":[2]}"#);
        wait_for_len(&log, 3).await;

        let entries = log.read_since(0);
        assert!(matches!(*entries[1].event, Event::Malformed { .. }));
        assert_eq!(entries[2].seq, 3);
        assert!(!closed.is_cancelled());

        closed.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_state_stops_receiver_and_cancels_session() {
        let client = Arc::new(MemoryClient::new(SessionId::new(2), None));
        let log = Arc::new(EventLog::new());
        let closed = CancellationToken::new();
        let handle = spawn(
            SessionId::new(2),
            client.clone(),
            log.clone(),
            closed.clone(),
            POLL,
        );

        client.push(r#"{"@type":"authorizationStateClosed"}"#);
        handle.await.unwrap();

        assert!(closed.is_cancelled());
        assert_eq!(log.len(), 1);
        assert!(log.read_since(0)[0].event.is_closed());
    }
}
