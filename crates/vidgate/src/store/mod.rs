//! Persistence seams.

mod catalog;
mod error;
pub mod file;

pub use catalog::{CatalogEntry, CatalogStore};
pub use error::{StorageError, StorageResult};
