//! Video transfer: range streaming out, chunked upload in.

pub mod finalize;
pub mod probe;
pub mod range;
pub mod upload;

pub use finalize::SessionFinalizer;
pub use probe::{FfprobeProbe, MediaMetadata, MediaProbe, NoopProbe};
pub use range::{ByteRange, PartialContent, RangeStreamer, StreamError, parse_range};
pub use upload::{
    ChunkReceipt, ChunkUpload, ContentRange, FinalizeError, Finalizer, RetryPolicy,
    UploadError, UploadJob, UploadReassembler, parse_content_range, sanitize_file_name,
};
