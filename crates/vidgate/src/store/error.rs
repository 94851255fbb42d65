//! Unified error type for storage operations.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during file operations.
    #[error("I/O error at {path}: {source}")]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes on disk than the client reported.
    #[error("short read at {path}: expected {expected} bytes from offset {offset}")]
    ShortRead {
        path: PathBuf,
        offset: u64,
        expected: u64,
    },

    #[error("deserialization error at {path}: {message}")]
    FileDeserialization { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    pub fn file_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    pub fn file_deserialization(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::FileDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
