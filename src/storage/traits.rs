//! Storage traits and error types
//!
//! This module defines the interfaces the orchestrator and the media fetcher
//! write through, and the errors they can return.

use crate::storage::ItemRecord;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid media path: {0}")]
    InvalidPath(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for extracted records
///
/// Implementations must tolerate concurrent calls from every worker.
/// An error is fatal for the record being appended, nothing more.
pub trait Sink: Send + Sync {
    fn append(&self, record: &ItemRecord) -> StorageResult<()>;
}

/// Destination for downloaded media and its failure log
pub trait MediaStore: Send + Sync {
    /// Stores one media file at a path relative to the media root
    fn save_media(&self, relative_path: &str, bytes: &[u8]) -> StorageResult<()>;

    /// Records a media URL that could not be downloaded or stored
    fn log_media_error(
        &self,
        url: &str,
        source: &str,
        item_id: &str,
        error: &str,
    ) -> StorageResult<()>;
}
