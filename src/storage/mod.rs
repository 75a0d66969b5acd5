//! Storage module for extracted records and downloaded media
//!
//! This module handles:
//! - The `Sink` contract records are appended through
//! - The `MediaStore` contract used by the media fetcher
//! - A SQLite + filesystem implementation of both

mod schema;
mod sqlite;
mod traits;

pub use sqlite::RecordStore;
pub use traits::{MediaStore, Sink, StorageError, StorageResult};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One extracted listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Source tag the item came from
    pub source: String,

    /// Reference (listing URL) the item was extracted from
    pub reference: String,

    /// Identifier the source assigns to the listing, when it exposes one
    pub id: Option<String>,

    /// Extracted field values keyed by field name
    pub fields: BTreeMap<String, Value>,

    /// Media URLs found on the item page
    pub media: Vec<String>,
}

impl ItemRecord {
    pub fn new(source: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            reference: reference.into(),
            id: None,
            fields: BTreeMap::new(),
            media: Vec::new(),
        }
    }

    /// Identifier used to group media on disk
    ///
    /// Falls back to the hex SHA-256 of the reference when the source
    /// exposes no identifier, so items never share a media directory.
    pub fn media_key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => hex::encode(Sha256::digest(self.reference.as_bytes())),
        }
    }
}
