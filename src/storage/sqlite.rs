//! SQLite + filesystem record store
//!
//! Records and media errors go to one SQLite database guarded by a mutex;
//! media bytes go to files under the configured media root.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{MediaStore, Sink, StorageError, StorageResult};
use crate::storage::ItemRecord;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Record sink and media store backed by SQLite and the filesystem
pub struct RecordStore {
    conn: Mutex<Connection>,
    media_root: PathBuf,
}

impl RecordStore {
    /// Opens or creates the record database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `media_root` - Directory media files are written under
    pub fn open(path: &Path, media_root: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            media_root: media_root.to_path_buf(),
        })
    }

    /// Creates an in-memory record database (for testing)
    pub fn open_in_memory(media_root: &Path) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            media_root: media_root.to_path_buf(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    /// Counts stored records for a source
    pub fn count_records(&self, source: &str) -> StorageResult<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE source = ?1",
            params![source],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Loads every stored record of a source in append order
    pub fn records_for_source(&self, source: &str) -> StorageResult<Vec<ItemRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT source, reference, item_id, fields, media FROM records
             WHERE source = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![source], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(source, reference, id, fields, media)| {
                Ok(ItemRecord {
                    source,
                    reference,
                    id,
                    fields: serde_json::from_str(&fields)?,
                    media: serde_json::from_str(&media)?,
                })
            })
            .collect()
    }

    /// Counts logged media failures
    pub fn count_media_errors(&self) -> StorageResult<u64> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM media_errors", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Deletes every stored record and media error
    ///
    /// Media files are left in place; a re-crawl overwrites them.
    pub fn clear(&self) -> StorageResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            "
            DELETE FROM records;
            DELETE FROM media_errors;
        ",
        )?;
        tracing::info!("Cleared stored records");
        Ok(())
    }
}

impl Sink for RecordStore {
    fn append(&self, record: &ItemRecord) -> StorageResult<()> {
        let fields = serde_json::to_string(&record.fields)?;
        let media = serde_json::to_string(&record.media)?;
        let now = Utc::now().to_rfc3339();

        let conn = self.lock();
        conn.execute(
            "INSERT INTO records (source, reference, item_id, fields, media, scraped_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![record.source, record.reference, record.id, fields, media, now],
        )?;
        Ok(())
    }
}

impl MediaStore for RecordStore {
    fn save_media(&self, relative_path: &str, bytes: &[u8]) -> StorageResult<()> {
        let relative = Path::new(relative_path);
        if !relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(relative_path.to_string()));
        }

        let target = self.media_root.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, bytes)?;

        tracing::trace!("Saved media {}", target.display());
        Ok(())
    }

    fn log_media_error(
        &self,
        url: &str,
        source: &str,
        item_id: &str,
        error: &str,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO media_errors (url, source, item_id, error, logged_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![url, source, item_id, error, now],
        )?;
        Ok(())
    }
}
