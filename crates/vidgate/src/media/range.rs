//! HTTP byte-range streaming on top of asynchronous downloads.
//!
//! A request moves through `Requested → DownloadIssued → Waiting → Ready`:
//! the range is parsed, a download of exactly that range is issued, and the
//! correlator waits for a file status proving the bytes are on disk before
//! the slice is read. Failures are logged with the phase they happened in.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};
use vidgate_protocol::{Command, Event, FileStatus};

use crate::correlator::{CorrelateError, CorrelationKey, Cursor, Timeout};
use crate::session::{Session, SessionError};
use crate::store::StorageError;

/// Bytes served for an absent or open-ended range.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

// ============================================================================
// Ranges
// ============================================================================

/// Inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a `Range` header value.
///
/// Absent → the first chunk. `bytes=S-` → one chunk from `S`. `bytes=S-E`
/// is taken as is. Suffix ranges, multiple ranges, `E < S` and anything else
/// are rejected.
pub fn parse_range(header: Option<&str>, chunk_size: u64) -> Result<ByteRange, StreamError> {
    let chunk_size = chunk_size.max(1);
    let Some(header) = header else {
        return Ok(ByteRange {
            start: 0,
            end: chunk_size - 1,
        });
    };

    let invalid = || StreamError::InvalidRange(header.to_string());
    let spec = header.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    if spec.contains(',') {
        return Err(invalid());
    }
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;

    let end = match end.trim() {
        "" => start.saturating_add(chunk_size - 1),
        end => end.parse().map_err(|_| invalid())?,
    };
    if end < start {
        return Err(invalid());
    }
    Ok(ByteRange { start, end })
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("range starts at {start} but the file has {size} bytes")]
    NotSatisfiable { start: u64, size: u64 },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Correlate(#[from] CorrelateError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ============================================================================
// Streaming
// ============================================================================

/// Lifecycle of one range request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Requested,
    DownloadIssued,
    Waiting,
    Ready,
}

/// A slice ready to be sent as `206 Partial Content`.
#[derive(Debug, Clone)]
pub struct PartialContent {
    pub range: ByteRange,
    pub total: u64,
    pub body: Bytes,
}

impl PartialContent {
    /// Value of the `Content-Range` header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.range.start, self.range.end, self.total)
    }
}

enum Readiness {
    Ready {
        path: PathBuf,
        range: ByteRange,
        total: u64,
    },
    NotSatisfiable {
        size: u64,
    },
}

/// Check one file status against the requested range.
fn readiness(status: &FileStatus, requested: ByteRange) -> Option<Readiness> {
    if status.downloading {
        return None;
    }
    let size = status.size?;
    if requested.start >= size {
        return Some(Readiness::NotSatisfiable { size });
    }
    let range = ByteRange {
        start: requested.start,
        end: requested.end.min(size - 1),
    };
    if !status.covers(range.start, range.end) {
        return None;
    }
    let path = status.local_path.as_ref()?;
    Some(Readiness::Ready {
        path: PathBuf::from(path),
        range,
        total: size,
    })
}

#[derive(Clone)]
pub struct RangeStreamer {
    chunk_size: u64,
    wait_timeout: Duration,
}

impl RangeStreamer {
    #[must_use]
    pub fn new(chunk_size: u64, wait_timeout: Duration) -> Self {
        Self {
            chunk_size,
            wait_timeout,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Download `requested` of `file_id` and return the bytes.
    ///
    /// The end is clamped to the file size. Concurrent calls for the same
    /// file are independent waits.
    pub async fn stream(
        &self,
        session: &Session,
        file_id: i32,
        requested: ByteRange,
    ) -> Result<PartialContent, StreamError> {
        let mut phase = StreamPhase::Requested;
        let result = self
            .run(session, file_id, requested, &mut phase)
            .await;
        if let Err(e) = &result {
            debug!(
                session_id = %session.id(),
                file_id,
                failed_in = ?phase,
                error = %e,
                "Range request failed"
            );
        }
        result
    }

    async fn run(
        &self,
        session: &Session,
        file_id: i32,
        requested: ByteRange,
        phase: &mut StreamPhase,
    ) -> Result<PartialContent, StreamError> {
        let mut cursor = Cursor::anchor(session, CorrelationKey::File(file_id));
        session
            .send(Command::download_range(file_id, requested.start, requested.end))
            .await?;
        *phase = StreamPhase::DownloadIssued;

        let ready = cursor
            .wait_for(Timeout::After(self.wait_timeout), |event| match event {
                Event::FileStatus(status) if status.file_id == file_id => {
                    let ready = readiness(status, requested);
                    if ready.is_none() {
                        // progress seen, bytes not there yet
                        *phase = StreamPhase::Waiting;
                    }
                    ready
                }
                _ => None,
            })
            .await;

        let (path, range, total) = match ready {
            Ok(Readiness::Ready { path, range, total }) => (path, range, total),
            Ok(Readiness::NotSatisfiable { size }) => {
                return Err(StreamError::NotSatisfiable {
                    start: requested.start,
                    size,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let body = match read_slice(&path, range).await {
            Ok(body) => body,
            Err(e) => {
                warn!(session_id = %session.id(), file_id, error = %e, "Failed to read downloaded range");
                return Err(e.into());
            }
        };
        *phase = StreamPhase::Ready;

        Ok(PartialContent { range, total, body })
    }
}

/// Read exactly `range` from `path`. A short file is an error.
async fn read_slice(path: &Path, range: ByteRange) -> Result<Bytes, StorageError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| StorageError::file_io(path, e))?;
    file.seek(SeekFrom::Start(range.start))
        .await
        .map_err(|e| StorageError::file_io(path, e))?;

    let len = usize::try_from(range.len()).map_err(|_| StorageError::ShortRead {
        path: path.to_path_buf(),
        offset: range.start,
        expected: range.len(),
    })?;
    let mut buf = vec![0; len];
    match file.read_exact(&mut buf).await {
        Ok(_) => Ok(Bytes::from(buf)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(StorageError::ShortRead {
            path: path.to_path_buf(),
            offset: range.start,
            expected: range.len(),
        }),
        Err(e) => Err(StorageError::file_io(path, e)),
    }
}

// ============================================================================
// Tests
// ============================================================================
