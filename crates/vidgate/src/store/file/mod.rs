//! File-based storage implementations.
//!
//! Structured documents are YAML. Every write goes to a temp file that is
//! synced and renamed over the target, so readers never see a partial file.

mod catalog;

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{StorageError, StorageResult};

pub use catalog::FileCatalogStore;

/// Write `contents` to `tmp_path`, fsync, then rename it to `path`.
pub(crate) async fn atomic_write_file(
    tmp_path: &Path,
    path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::file_io(parent, e))?;
    }

    let mut file = fs::File::create(tmp_path)
        .await
        .map_err(|e| StorageError::file_io(tmp_path, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| StorageError::file_io(tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| StorageError::file_io(tmp_path, e))?;
    drop(file);

    fs::rename(tmp_path, path)
        .await
        .map_err(|e| StorageError::file_io(path, e))
}
