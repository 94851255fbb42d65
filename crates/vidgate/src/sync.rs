//! Synchronization primitives shared across vidgate.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default interval between cleanup runs (10 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Default max idle age before a lock is considered stale (1 hour).
pub const DEFAULT_MAX_IDLE_AGE: Duration = Duration::from_secs(3600);

/// Maps key to (lock, last_access_time).
type LockStorage<K> = DashMap<K, (Arc<Mutex<()>>, Instant)>;

/// Per-key async mutex with stale entry cleanup.
///
/// Operations on different keys run concurrently while operations on the
/// same key are serialized. Used for session creation (keyed by session id)
/// and upload chunk writes (keyed by destination file name).
///
/// ```ignore
/// let locks: KeyedLocks<String> = KeyedLocks::new();
/// let lock = locks.get(&"clip.mp4".to_string());
/// let _guard = lock.lock().await;
/// ```
#[derive(Clone)]
pub struct KeyedLocks<K = String>
where
    K: Eq + Hash,
{
    locks: Arc<LockStorage<K>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Create a lock collection and spawn its cleanup task with default intervals.
    pub fn with_cleanup(name: &'static str) -> Self {
        let locks = Self::new();
        locks
            .clone()
            .spawn_cleanup_task_with(DEFAULT_CLEANUP_INTERVAL, DEFAULT_MAX_IDLE_AGE, name);
        locks
    }

    /// Get or create the lock for `key`, refreshing its last-access time.
    pub fn get(&self, key: &K) -> Arc<Mutex<()>> {
        let now = Instant::now();
        self.locks
            .entry(key.clone())
            .and_modify(|(_, last_access)| *last_access = now)
            .or_insert_with(|| (Arc::new(Mutex::new(())), now))
            .0
            .clone()
    }

    /// Drop the entry for `key` if nobody else holds its lock.
    pub fn release(&self, key: &K) {
        self.locks
            .remove_if(key, |_, (lock, _)| Arc::strong_count(lock) == 1);
    }

    /// Remove entries idle for longer than `max_age` that nobody holds.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_stale(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.locks.len();
        self.locks.retain(|_, (lock, last_access)| {
            // strong_count == 1 means only the map holds it
            Arc::strong_count(lock) > 1 || now.duration_since(*last_access) <= max_age
        });
        before.saturating_sub(self.locks.len())
    }

    /// Spawn a task that periodically removes stale entries.
    ///
    /// Runs until the runtime shuts down.
    pub fn spawn_cleanup_task_with(self, interval: Duration, max_age: Duration, name: &'static str) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup_stale(max_age);
                if removed > 0 {
                    debug!(
                        removed,
                        remaining = self.len(),
                        locks = name,
                        "Cleaned up stale locks"
                    );
                }
            }
        });
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
