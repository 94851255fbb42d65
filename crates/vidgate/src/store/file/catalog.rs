//! File-based catalog store.
//!
//! The whole catalog is one YAML document, loaded on first use and rewritten
//! atomically on every insert.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::catalog::{CatalogEntry, CatalogStore};
use crate::store::{StorageError, StorageResult};

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    #[serde(default = "schema_version")]
    version: u32,
    #[serde(default)]
    entries: Vec<CatalogEntry>,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

pub struct FileCatalogStore {
    path: PathBuf,
    // None until first loaded.
    entries: Mutex<Option<Vec<CatalogEntry>>>,
}

impl FileCatalogStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    async fn load(path: &Path) -> StorageResult<Vec<CatalogEntry>> {
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::file_io(path, e)),
        };
        let document: CatalogDocument = serde_saphyr::from_str(&content)
            .map_err(|e| StorageError::file_deserialization(path, e.to_string()))?;
        Ok(document.entries)
    }

    async fn save(&self, entries: &[CatalogEntry]) -> StorageResult<()> {
        let document = CatalogDocument {
            version: SCHEMA_VERSION,
            entries: entries.to_vec(),
        };
        let content = serde_saphyr::to_string(&document)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        super::atomic_write_file(&tmp_path, &self.path, content.as_bytes()).await
    }
}

#[async_trait]
impl CatalogStore for FileCatalogStore {
    async fn find(&self, chat_id: i64, message_id: i64) -> StorageResult<Option<CatalogEntry>> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        Ok(guard
            .iter()
            .flatten()
            .find(|e| e.chat_id == chat_id && e.message_id == message_id)
            .cloned())
    }

    async fn attach(&self, entry: CatalogEntry) -> StorageResult<bool> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        let entries = guard.get_or_insert_with(Vec::new);

        if entries
            .iter()
            .any(|e| e.chat_id == entry.chat_id && e.message_id == entry.message_id)
        {
            return Ok(false);
        }

        let (chat_id, message_id) = (entry.chat_id, entry.message_id);
        entries.push(entry);
        if let Err(e) = self.save(entries).await {
            entries.pop();
            return Err(e);
        }

        debug!(chat_id, message_id, path = %self.path.display(), "Catalog entry attached");
        Ok(true)
    }

    async fn upsert(&self, entry: CatalogEntry) -> StorageResult<CatalogEntry> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        let entries = guard.get_or_insert_with(Vec::new);

        let mut updated = entries.clone();
        let position = updated
            .iter()
            .position(|e| e.chat_id == entry.chat_id && e.message_id == entry.message_id);
        let stored = match position {
            Some(i) => {
                let existing = &mut updated[i];
                existing.title = entry.title;
                existing.description = entry.description;
                existing.uploader = entry.uploader;
                existing.clone()
            }
            None => {
                updated.push(entry.clone());
                entry
            }
        };

        self.save(&updated).await?;
        *entries = updated;
        debug!(
            chat_id = stored.chat_id,
            message_id = stored.message_id,
            path = %self.path.display(),
            "Catalog entry stored"
        );
        Ok(stored)
    }

    async fn list_chat(&self, chat_id: i64) -> StorageResult<Vec<CatalogEntry>> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        let mut entries: Vec<_> = guard
            .iter()
            .flatten()
            .filter(|e| e.chat_id == chat_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.message_id.cmp(&a.message_id));
        Ok(entries)
    }
}
