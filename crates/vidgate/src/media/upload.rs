//! Chunked upload reassembly.
//!
//! Chunks for one destination may arrive in any order and concurrently. The
//! first chunk preallocates a sparse file of the declared total size; every
//! chunk is written at its offset under a per-file lock and its interval is
//! merged into the job's coverage. Once coverage equals the total, exactly one
//! finalize task is handed to the supervised task registry.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::background::BackgroundTasks;
use crate::correlator::CorrelateError;
use crate::session::{SessionError, SessionId};
use crate::store::StorageError;
use crate::sync::KeyedLocks;

const MAX_BACKOFF: Duration = Duration::from_secs(60);

// ============================================================================
// Content-Range
// ============================================================================

/// `bytes S-E/T` with `S <= E < T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ContentRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

pub fn parse_content_range(header: &str) -> Result<ContentRange, UploadError> {
    let invalid = || UploadError::InvalidContentRange(header.to_string());

    let spec = header.trim().strip_prefix("bytes ").ok_or_else(invalid)?;
    let (span, total) = spec.split_once('/').ok_or_else(invalid)?;
    let (start, end) = span.split_once('-').ok_or_else(invalid)?;

    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end: u64 = end.trim().parse().map_err(|_| invalid())?;
    let total: u64 = total.trim().parse().map_err(|_| invalid())?;

    if start > end || end >= total {
        return Err(invalid());
    }
    Ok(ContentRange { start, end, total })
}

/// Accept only a single plain file name.
pub fn sanitize_file_name(name: &str) -> Result<String, UploadError> {
    let unsafe_name = || UploadError::UnsafeFileName(name.to_string());
    if name.is_empty() || name.contains('\0') || name.contains('/') || name.contains('\\') {
        return Err(unsafe_name());
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(name.to_string()),
        _ => Err(unsafe_name()),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid Content-Range: {0}")]
    InvalidContentRange(String),

    #[error("unsafe file name: {0:?}")]
    UnsafeFileName(String),

    #[error("chunk declares total {declared} but upload {file_name} has total {expected}")]
    TotalMismatch {
        file_name: String,
        declared: u64,
        expected: u64,
    },

    #[error("chunk body has {actual} bytes but Content-Range covers {expected}")]
    LengthMismatch { expected: u64, actual: u64 },

    #[error("upload {0} is complete and already being finalized")]
    Finalizing(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Correlate(#[from] CorrelateError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("finalizing {path} failed after {attempts} attempts: {last}")]
    Exhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        last: Box<FinalizeError>,
    },
}

// ============================================================================
// Jobs
// ============================================================================

/// Sorted, disjoint, non-adjacent inclusive intervals.
#[derive(Debug, Default)]
struct Intervals(Vec<(u64, u64)>);

impl Intervals {
    fn insert(&mut self, start: u64, end: u64) {
        let (mut start, mut end) = (start, end);
        let mut merged = Vec::with_capacity(self.0.len() + 1);
        for &(s, e) in &self.0 {
            if e.saturating_add(1) < start || end.saturating_add(1) < s {
                merged.push((s, e));
            } else {
                start = start.min(s);
                end = end.max(e);
            }
        }
        merged.push((start, end));
        merged.sort_unstable();
        self.0 = merged;
    }

    fn covered(&self) -> u64 {
        self.0.iter().map(|(s, e)| e - s + 1).sum()
    }
}

/// An upload in progress, keyed by destination file name.
#[derive(Debug)]
pub struct UploadJob {
    pub file_name: String,
    /// Absolute destination inside the upload root.
    pub path: PathBuf,
    pub total: u64,
    pub session_id: SessionId,
    pub chat_id: i64,
    coverage: Mutex<Intervals>,
    finalizing: AtomicBool,
}

impl UploadJob {
    fn new(file_name: String, path: PathBuf, total: u64, session_id: SessionId, chat_id: i64) -> Self {
        Self {
            file_name,
            path,
            total,
            session_id,
            chat_id,
            coverage: Mutex::new(Intervals::default()),
            finalizing: AtomicBool::new(false),
        }
    }

    /// Record `[start, end]` as written and return the bytes covered so far.
    fn record(&self, start: u64, end: u64) -> u64 {
        let mut coverage = self.coverage.lock().expect("mutex poisoned");
        coverage.insert(start, end);
        coverage.covered()
    }

    pub fn covered(&self) -> u64 {
        self.coverage.lock().expect("mutex poisoned").covered()
    }

    /// True for exactly one caller.
    fn begin_finalizing(&self) -> bool {
        !self.finalizing.swap(true, Ordering::AcqRel)
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing.load(Ordering::Acquire)
    }
}

/// One received chunk.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub file_name: String,
    pub session_id: SessionId,
    pub chat_id: i64,
    pub range: ContentRange,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkReceipt {
    pub received: u64,
    pub total: u64,
    pub complete: bool,
}

/// Turns a fully written upload into a posted message.
#[async_trait]
pub trait Finalizer: Send + Sync {
    /// Post the file and return the created message id.
    async fn finalize(&self, job: &UploadJob) -> Result<i64, FinalizeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

// ============================================================================
// UploadReassembler
// ============================================================================

#[derive(Clone)]
pub struct UploadReassembler {
    root: PathBuf,
    jobs: Arc<DashMap<String, Arc<UploadJob>>>,
    locks: KeyedLocks<String>,
    tasks: BackgroundTasks,
    finalizer: Arc<dyn Finalizer>,
    retry: RetryPolicy,
}

impl UploadReassembler {
    /// `root` should be absolute: job paths are matched against the paths the
    /// protocol client reports.
    ///
    /// Must be called inside a tokio runtime (spawns the lock cleanup task).
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        finalizer: Arc<dyn Finalizer>,
        tasks: BackgroundTasks,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            root: root.into(),
            jobs: Arc::new(DashMap::new()),
            locks: KeyedLocks::with_cleanup("upload_locks"),
            tasks,
            finalizer,
            retry,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job(&self, file_name: &str) -> Option<Arc<UploadJob>> {
        self.jobs.get(file_name).map(|j| Arc::clone(j.value()))
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Write one chunk and start finalization when the upload is complete.
    pub async fn receive_chunk(&self, chunk: ChunkUpload) -> Result<ChunkReceipt, UploadError> {
        let file_name = sanitize_file_name(&chunk.file_name)?;
        let range = chunk.range;
        let actual = chunk.body.len() as u64;
        if actual != range.len() {
            return Err(UploadError::LengthMismatch {
                expected: range.len(),
                actual,
            });
        }

        let lock = self.locks.get(&file_name);
        let (job, received) = {
            let _guard = lock.lock().await;

            let job = match self.job(&file_name) {
                Some(job) => job,
                None => self.start_job(&file_name, &chunk).await?,
            };
            if job.is_finalizing() {
                return Err(UploadError::Finalizing(file_name));
            }
            if job.total != range.total {
                return Err(UploadError::TotalMismatch {
                    file_name,
                    declared: range.total,
                    expected: job.total,
                });
            }

            write_at(&job.path, range.start, &chunk.body).await?;
            let received = job.record(range.start, range.end);
            (job, received)
        };

        let complete = received == job.total;
        debug!(
            file_name = %file_name,
            start = range.start,
            end = range.end,
            received,
            total = job.total,
            "Upload chunk written"
        );
        if complete && job.begin_finalizing() {
            self.launch_finalize(job.clone());
        }

        Ok(ChunkReceipt {
            received,
            total: job.total,
            complete,
        })
    }

    /// Preallocate the destination and register the job. Caller holds the
    /// per-file lock.
    async fn start_job(&self, file_name: &str, chunk: &ChunkUpload) -> Result<Arc<UploadJob>, UploadError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::file_io(&self.root, e))?;

        let path = self.root.join(file_name);
        preallocate(&path, chunk.range.total).await?;

        let job = Arc::new(UploadJob::new(
            file_name.to_string(),
            path,
            chunk.range.total,
            chunk.session_id,
            chunk.chat_id,
        ));
        self.jobs.insert(file_name.to_string(), Arc::clone(&job));
        info!(
            file_name = %file_name,
            total = chunk.range.total,
            session_id = %chunk.session_id,
            chat_id = chunk.chat_id,
            "Upload started"
        );
        Ok(job)
    }

    fn launch_finalize(&self, job: Arc<UploadJob>) {
        let finalizer = Arc::clone(&self.finalizer);
        let jobs = Arc::clone(&self.jobs);
        let locks = self.locks.clone();
        let retry = self.retry;

        self.tasks.spawn("upload_finalize", async move {
            let outcome = finalize_with_retry(finalizer.as_ref(), &job, retry).await;
            jobs.remove(&job.file_name);
            locks.release(&job.file_name);

            let message_id = outcome?;
            if let Err(e) = tokio::fs::remove_file(&job.path).await {
                warn!(path = %job.path.display(), error = %e, "Failed to remove finalized upload");
            }
            info!(
                file_name = %job.file_name,
                chat_id = job.chat_id,
                message_id,
                "Upload finalized"
            );
            Ok::<(), FinalizeError>(())
        });
    }
}

async fn finalize_with_retry(
    finalizer: &dyn Finalizer,
    job: &UploadJob,
    retry: RetryPolicy,
) -> Result<i64, FinalizeError> {
    let attempts = retry.attempts.max(1);
    let mut backoff = retry.initial_backoff;
    let mut attempt = 1;

    loop {
        match finalizer.finalize(job).await {
            Ok(message_id) => return Ok(message_id),
            Err(e) if attempt >= attempts => {
                return Err(FinalizeError::Exhausted {
                    path: job.path.clone(),
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                warn!(
                    file_name = %job.file_name,
                    attempt,
                    backoff_secs = backoff.as_secs_f32(),
                    error = %e,
                    "Upload finalize attempt failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                attempt += 1;
            }
        }
    }
}

/// Create `path` as a sparse file of `total` bytes.
async fn preallocate(path: &Path, total: u64) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.seek(SeekFrom::Start(total - 1))
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.write_all(&[0])
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.flush()
        .await
        .map_err(|e| StorageError::file_io(path, e))
}

async fn write_at(path: &Path, offset: u64, data: &[u8]) -> Result<(), StorageError> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.write_all(data)
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.flush()
        .await
        .map_err(|e| StorageError::file_io(path, e))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingFinalizer {
        calls: AtomicUsize,
        failures_before_success: usize,
    }

    #[async_trait]
    impl Finalizer for CountingFinalizer {
        async fn finalize(&self, job: &UploadJob) -> Result<i64, FinalizeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(FinalizeError::Correlate(CorrelateError::TimedOut(
                    Duration::from_millis(1),
                    job.file_name.clone(),
                )));
            }
            Ok(100 + call as i64)
        }
    }

    /// Holds every finalization until released.
    #[derive(Default)]
    struct GatedFinalizer {
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl Finalizer for GatedFinalizer {
        async fn finalize(&self, _job: &UploadJob) -> Result<i64, FinalizeError> {
            self.release.notified().await;
            Ok(1)
        }
    }

    fn reassembler(tmp: &TempDir, finalizer: Arc<dyn Finalizer>) -> (UploadReassembler, BackgroundTasks) {
        let tasks = BackgroundTasks::new();
        let uploads = UploadReassembler::new(
            tmp.path().join("uploads"),
            finalizer,
            tasks.clone(),
            RetryPolicy {
                attempts: 3,
                initial_backoff: Duration::from_millis(1),
            },
        );
        (uploads, tasks)
    }

    fn chunk(name: &str, start: u64, end: u64, total: u64, fill: u8) -> ChunkUpload {
        ChunkUpload {
            file_name: name.to_string(),
            session_id: SessionId::new(1),
            chat_id: -100,
            range: ContentRange { start, end, total },
            body: Bytes::from(vec![fill; (end - start + 1) as usize]),
        }
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(
            parse_content_range("bytes 0-999/3000").unwrap(),
            ContentRange {
                start: 0,
                end: 999,
                total: 3000
            }
        );
        for bad in [
            "bytes 0-999",
            "bytes 10-5/100",
            "bytes 0-100/100",
            "bytes=0-9/10",
            "bytes a-b/c",
            "",
        ] {
            assert!(parse_content_range(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn file_names_are_confined() {
        assert_eq!(sanitize_file_name("clip.mp4").unwrap(), "clip.mp4");
        for bad in ["", ".", "..", "../etc/passwd", "a/b.mp4", "/abs.mp4", "a\\b", "nul\0"] {
            assert!(sanitize_file_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn intervals_merge_overlaps_and_neighbours() {
        let mut intervals = Intervals::default();
        intervals.insert(0, 999);
        intervals.insert(0, 999);
        assert_eq!(intervals.covered(), 1000);

        intervals.insert(2000, 2999);
        assert_eq!(intervals.covered(), 2000);

        intervals.insert(500, 2100);
        assert_eq!(intervals.0, vec![(0, 2999)]);

        intervals.insert(3000, 3000);
        assert_eq!(intervals.0, vec![(0, 3000)]);
    }

    #[tokio::test]
    async fn parallel_chunks_reassemble_and_finalize_once() {
        let tmp = TempDir::new().unwrap();
        let finalizer = Arc::new(CountingFinalizer::default());
        let (uploads, tasks) = reassembler(&tmp, finalizer.clone());

        let (a, b, c) = tokio::join!(
            uploads.receive_chunk(chunk("clip.mp4", 0, 999, 3000, b'a')),
            uploads.receive_chunk(chunk("clip.mp4", 1000, 1999, 3000, b'b')),
            uploads.receive_chunk(chunk("clip.mp4", 2000, 2999, 3000, b'c')),
        );
        let receipts = [a.unwrap(), b.unwrap(), c.unwrap()];
        assert_eq!(receipts.iter().filter(|r| r.complete).count(), 1);

        let path = uploads.root().join("clip.mp4");
        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 3000);
        assert!(data[..1000].iter().all(|b| *b == b'a'));
        assert!(data[1000..2000].iter().all(|b| *b == b'b'));
        assert!(data[2000..].iter().all(|b| *b == b'c'));

        tasks.shutdown().await;
        assert_eq!(finalizer.calls.load(Ordering::SeqCst), 1);
        assert!(!path.exists());
        assert_eq!(uploads.active_jobs(), 0);
    }

    #[tokio::test]
    async fn resubmitted_chunk_does_not_finalize_early() {
        let tmp = TempDir::new().unwrap();
        let finalizer = Arc::new(CountingFinalizer::default());
        let (uploads, tasks) = reassembler(&tmp, finalizer.clone());

        uploads
            .receive_chunk(chunk("dup.mp4", 0, 999, 2000, 1))
            .await
            .unwrap();
        let again = uploads
            .receive_chunk(chunk("dup.mp4", 0, 999, 2000, 1))
            .await
            .unwrap();

        assert_eq!(again.received, 1000);
        assert!(!again.complete);
        tasks.shutdown().await;
        assert_eq!(finalizer.calls.load(Ordering::SeqCst), 0);
        assert!(uploads.job("dup.mp4").is_some());
    }

    #[tokio::test]
    async fn chunks_after_completion_are_refused_while_finalizing() {
        let tmp = TempDir::new().unwrap();
        let finalizer = Arc::new(GatedFinalizer::default());
        let (uploads, tasks) = reassembler(&tmp, finalizer.clone());

        let done = uploads
            .receive_chunk(chunk("late.mp4", 0, 999, 1000, b'a'))
            .await
            .unwrap();
        assert!(done.complete);

        let err = uploads
            .receive_chunk(chunk("late.mp4", 0, 999, 1000, b'z'))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Finalizing(ref name) if name == "late.mp4"));

        let data = std::fs::read(uploads.root().join("late.mp4")).unwrap();
        assert!(data.iter().all(|b| *b == b'a'));

        finalizer.release.notify_one();
        tasks.shutdown().await;
        assert_eq!(uploads.active_jobs(), 0);
    }

    #[tokio::test]
    async fn mismatched_chunks_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let (uploads, _tasks) = reassembler(&tmp, Arc::new(CountingFinalizer::default()));

        uploads
            .receive_chunk(chunk("m.mp4", 0, 9, 100, 0))
            .await
            .unwrap();

        let err = uploads
            .receive_chunk(chunk("m.mp4", 10, 19, 200, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TotalMismatch { .. }));

        let mut short = chunk("m.mp4", 10, 19, 100, 0);
        short.body = Bytes::from_static(b"abc");
        let err = uploads.receive_chunk(short).await.unwrap_err();
        assert!(matches!(err, UploadError::LengthMismatch { expected: 10, actual: 3 }));

        let err = uploads
            .receive_chunk(chunk("../escape.mp4", 0, 9, 10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsafeFileName(_)));
    }

    #[tokio::test]
    async fn finalize_is_retried_until_it_succeeds() {
        let tmp = TempDir::new().unwrap();
        let finalizer = Arc::new(CountingFinalizer {
            failures_before_success: 2,
            ..CountingFinalizer::default()
        });
        let (uploads, tasks) = reassembler(&tmp, finalizer.clone());

        uploads
            .receive_chunk(chunk("retry.mp4", 0, 9, 10, 7))
            .await
            .unwrap();
        tasks.shutdown().await;

        assert_eq!(finalizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.stats().failed, 0);
        assert!(!uploads.root().join("retry.mp4").exists());
    }

    #[tokio::test]
    async fn exhausted_finalize_keeps_the_file() {
        let tmp = TempDir::new().unwrap();
        let finalizer = Arc::new(CountingFinalizer {
            failures_before_success: usize::MAX,
            ..CountingFinalizer::default()
        });
        let (uploads, tasks) = reassembler(&tmp, finalizer.clone());

        uploads
            .receive_chunk(chunk("keep.mp4", 0, 9, 10, 7))
            .await
            .unwrap();
        tasks.shutdown().await;

        assert_eq!(finalizer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(tasks.stats().failed, 1);
        assert!(uploads.root().join("keep.mp4").exists());
        assert!(uploads.job("keep.mp4").is_none());
    }
}
