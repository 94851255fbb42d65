//! Metadata attached to uploaded videos, keyed by (chat, message).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StorageResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub chat_id: i64,
    pub message_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uploader: String,
    pub created_at: DateTime<Utc>,
}

impl CatalogEntry {
    #[must_use]
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
            title: String::new(),
            description: String::new(),
            uploader: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// Storage for catalog entries. At most one entry per (chat, message).
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find(&self, chat_id: i64, message_id: i64) -> StorageResult<Option<CatalogEntry>>;

    /// Insert `entry` unless one already exists for its (chat, message).
    ///
    /// Returns `true` if inserted. Repeating an insert is harmless.
    async fn attach(&self, entry: CatalogEntry) -> StorageResult<bool>;

    /// Insert `entry` or replace the metadata of the existing one. The
    /// existing `created_at` is kept.
    async fn upsert(&self, entry: CatalogEntry) -> StorageResult<CatalogEntry>;

    /// Entries for a chat, newest message first.
    async fn list_chat(&self, chat_id: i64) -> StorageResult<Vec<CatalogEntry>>;
}
