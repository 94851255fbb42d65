//! Sessions: one protocol client, one event log, one receiver task each.

mod error;
mod event_log;
mod handle;
mod id;
mod receiver;
mod registry;

pub use error::SessionError;
pub use event_log::{EventLog, LogEntry, ReaderLease};
pub use handle::Session;
pub use id::SessionId;
pub use registry::SessionRegistry;
