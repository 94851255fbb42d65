//! Append-only, sequence-numbered buffer of a session's events.
//!
//! One writer (the session's receiver) and any number of cursor-based readers.
//! Entries are stored contiguously with a known first sequence number, so
//! `read_since` computes its start index instead of scanning. Readers copy
//! `Arc`s out of a short read-lock critical section and never block the
//! writer for longer than that copy.
//!
//! Waiters register a [`ReaderLease`] for the position they have examined up
//! to. [`EventLog::sweep`] never trims past the oldest lease, which keeps the
//! log bounded for idle sessions without losing entries an active waiter has
//! not seen yet.

// std::sync locks are correct here: they are never held across .await points.
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use vidgate_protocol::Event;

/// One appended event.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub seq: u64,
    pub event: Arc<Event>,
}

struct Entries {
    items: VecDeque<LogEntry>,
    next_seq: u64,
}

impl Entries {
    fn first_seq(&self) -> u64 {
        self.items.front().map_or(self.next_seq, |e| e.seq)
    }
}

#[derive(Default)]
struct Leases {
    next_id: u64,
    positions: BTreeMap<u64, u64>,
}

pub struct EventLog {
    entries: RwLock<Entries>,
    latest: watch::Sender<u64>,
    leases: Mutex<Leases>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            entries: RwLock::new(Entries {
                items: VecDeque::new(),
                next_seq: 1,
            }),
            latest,
            leases: Mutex::new(Leases::default()),
        }
    }

    /// Append `event` and return its sequence number (starting at 1).
    pub fn append(&self, event: Event) -> u64 {
        let seq = {
            let mut entries = self.entries.write().expect("lock poisoned");
            let seq = entries.next_seq;
            entries.next_seq += 1;
            entries.items.push_back(LogEntry {
                seq,
                event: Arc::new(event),
            });
            seq
        };
        self.latest.send_replace(seq);
        seq
    }

    /// Entries with sequence strictly greater than `cursor`, in order.
    ///
    /// Entries already trimmed are skipped silently.
    pub fn read_since(&self, cursor: u64) -> Vec<LogEntry> {
        let entries = self.entries.read().expect("lock poisoned");
        let skip = cursor.saturating_add(1).saturating_sub(entries.first_seq());
        let Ok(skip) = usize::try_from(skip) else {
            return Vec::new();
        };
        if skip >= entries.items.len() {
            return Vec::new();
        }
        entries.items.range(skip..).cloned().collect()
    }

    /// Sequence number of the newest entry, 0 if none was ever appended.
    pub fn last_seq(&self) -> u64 {
        *self.latest.borrow()
    }

    /// Receiver that is notified on every append.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.latest.subscribe()
    }

    /// Number of entries currently retained.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry with sequence `<= seq`. Returns how many were dropped.
    pub fn trim_through(&self, seq: u64) -> usize {
        let mut entries = self.entries.write().expect("lock poisoned");
        let mut dropped = 0;
        while entries.items.front().is_some_and(|e| e.seq <= seq) {
            entries.items.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Trim everything older than both the oldest lease and the newest
    /// `retain_tail` entries.
    ///
    /// Holds the lease table for the whole trim so no reader can register
    /// below the computed floor in between.
    pub fn sweep(&self, retain_tail: u64) -> usize {
        let leases = self.leases.lock().expect("mutex poisoned");
        let mut floor = self.last_seq().saturating_sub(retain_tail);
        if let Some(oldest) = leases.positions.values().min() {
            floor = floor.min(*oldest);
        }
        self.trim_through(floor)
    }

    /// Register a reader positioned at `cursor`.
    pub fn lease(&self, cursor: u64) -> ReaderLease<'_> {
        let mut leases = self.leases.lock().expect("mutex poisoned");
        self.register(&mut leases, cursor)
    }

    /// Register a reader positioned at the newest entry.
    ///
    /// The position is read under the same lock [`sweep`](Self::sweep)
    /// takes, so nothing past the returned position can be trimmed before
    /// the lease exists.
    pub fn lease_latest(&self) -> (u64, ReaderLease<'_>) {
        let mut leases = self.leases.lock().expect("mutex poisoned");
        let cursor = self.last_seq();
        (cursor, self.register(&mut leases, cursor))
    }

    fn register(&self, leases: &mut Leases, cursor: u64) -> ReaderLease<'_> {
        let id = leases.next_id;
        leases.next_id += 1;
        leases.positions.insert(id, cursor);
        ReaderLease { log: self, id }
    }

    pub fn active_readers(&self) -> usize {
        self.leases.lock().expect("mutex poisoned").positions.len()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of one active reader. Released on drop.
pub struct ReaderLease<'a> {
    log: &'a EventLog,
    id: u64,
}

impl ReaderLease<'_> {
    /// Record that the reader has examined everything through `cursor`.
    pub fn advance(&self, cursor: u64) {
        let mut leases = self.log.leases.lock().expect("mutex poisoned");
        if let Some(position) = leases.positions.get_mut(&self.id) {
            *position = (*position).max(cursor);
        }
    }
}

impl Drop for ReaderLease<'_> {
    fn drop(&mut self) {
        if let Ok(mut leases) = self.log.leases.lock() {
            leases.positions.remove(&self.id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
