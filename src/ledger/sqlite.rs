//! SQLite-backed crawl ledger
//!
//! The ledger keeps every record in memory behind one mutex and writes dirty
//! records back to SQLite every `flush_every` updates. Claims, reads and
//! outcome writes all happen inside the same critical section.

use crate::ledger::schema::initialize_schema;
use crate::ledger::{
    AttemptRecord, AttemptStatus, ClaimOutcome, LedgerError, LedgerResult, RunRecord, RunStatus,
    StatusCounts,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Error text stored for items found `pending` when a ledger is reopened
pub const INTERRUPTED_ERROR: &str = "interrupted before completion";

type LedgerKey = (String, String);

/// Ledger behaviour switches
#[derive(Debug, Clone, Copy)]
pub struct LedgerOptions {
    /// Number of writes between automatic flushes
    pub flush_every: u32,

    /// Whether `failed` records may be claimed again
    pub retry_failed: bool,
}

impl Default for LedgerOptions {
    fn default() -> Self {
        Self {
            flush_every: 5,
            retry_failed: false,
        }
    }
}

struct LedgerInner {
    conn: Connection,
    records: HashMap<LedgerKey, AttemptRecord>,
    dirty: HashSet<LedgerKey>,
    writes_since_flush: u32,
}

/// Process-wide record of (source, reference) attempts
pub struct CrawlLedger {
    inner: Mutex<LedgerInner>,
    options: LedgerOptions,
    read_only: bool,
}

impl CrawlLedger {
    /// Opens or creates the ledger at `path` and loads every prior record
    ///
    /// The connection holds an exclusive lock on the database until the
    /// ledger is dropped, so a second crawl on the same file fails with
    /// `LedgerError::Locked` instead of touching this run's records.
    ///
    /// Records an interrupted run left `pending` are demoted to `failed`
    /// so the retry policy decides whether they are attempted again.
    pub fn open(path: &Path, options: LedgerOptions) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::ZERO)?;
        conn.execute_batch(
            "
            PRAGMA locking_mode = EXCLUSIVE;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            BEGIN EXCLUSIVE;
            COMMIT;
        ",
        )
        .map_err(|e| locked_or(e, path))?;

        Self::from_connection(conn, options)
    }

    /// Opens an existing ledger for the stats and inspect views
    ///
    /// Nothing is written: pending records keep their status and every
    /// mutating call fails with `LedgerError::ReadOnly`.
    pub fn open_read_only(path: &Path, options: LedgerOptions) -> LedgerResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::ZERO)?;
        let records = load_records(&conn).map_err(|e| match e {
            LedgerError::Sqlite(e) => locked_or(e, path),
            other => other,
        })?;

        tracing::debug!("Ledger loaded read-only with {} records", records.len());

        Ok(Self {
            inner: Mutex::new(LedgerInner {
                conn,
                records,
                dirty: HashSet::new(),
                writes_since_flush: 0,
            }),
            options,
            read_only: true,
        })
    }

    /// Creates an in-memory ledger (for testing)
    pub fn open_in_memory(options: LedgerOptions) -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    fn from_connection(conn: Connection, options: LedgerOptions) -> LedgerResult<Self> {
        initialize_schema(&conn)?;
        let records = load_records(&conn)?;

        let mut inner = LedgerInner {
            conn,
            records,
            dirty: HashSet::new(),
            writes_since_flush: 0,
        };

        let now = Utc::now();
        let mut interrupted = 0;
        for (key, record) in inner.records.iter_mut() {
            if record.status == AttemptStatus::Pending {
                record.status = AttemptStatus::Failed;
                record.error = Some(INTERRUPTED_ERROR.to_string());
                record.updated_at = now;
                inner.dirty.insert(key.clone());
                interrupted += 1;
            }
        }

        if interrupted > 0 {
            tracing::warn!(
                "{} items were left pending by an interrupted run; marked as failed",
                interrupted
            );
            flush_inner(&mut inner)?;
        }

        tracing::debug!("Ledger loaded with {} records", inner.records.len());

        Ok(Self {
            inner: Mutex::new(inner),
            options,
            read_only: false,
        })
    }

    // Each critical section leaves the map consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn options(&self) -> LedgerOptions {
        self.options
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn ensure_writable(&self) -> LedgerResult<()> {
        if self.read_only {
            return Err(LedgerError::ReadOnly);
        }
        Ok(())
    }

    /// Returns true iff the item was recorded as success or skipped
    pub fn has_completed(&self, source: &str, reference: &str) -> bool {
        let inner = self.lock();
        inner
            .records
            .get(&key(source, reference))
            .map(|record| record.status.is_completed())
            .unwrap_or(false)
    }

    /// Atomically claims an item for processing
    ///
    /// The check and the insert of the `pending` record happen under one lock,
    /// so of two concurrent claims for the same key exactly one succeeds.
    pub fn record_start(&self, source: &str, reference: &str) -> LedgerResult<ClaimOutcome> {
        self.ensure_writable()?;
        let mut inner = self.lock();
        let key = key(source, reference);

        if let Some(existing) = inner.records.get_mut(&key) {
            let reclaim = existing.status == AttemptStatus::Failed && self.options.retry_failed;
            if !reclaim {
                return Ok(ClaimOutcome::AlreadyClaimed(existing.status));
            }
            existing.status = AttemptStatus::Pending;
            existing.error = None;
            existing.updated_at = Utc::now();
        } else {
            inner.records.insert(
                key.clone(),
                AttemptRecord {
                    source: source.to_string(),
                    reference: reference.to_string(),
                    status: AttemptStatus::Pending,
                    error: None,
                    updated_at: Utc::now(),
                },
            );
        }

        self.mark_dirty(&mut inner, key)?;
        Ok(ClaimOutcome::Claimed)
    }

    pub fn record_success(&self, source: &str, reference: &str) -> LedgerResult<()> {
        self.record_outcome(source, reference, AttemptStatus::Success, None)
    }

    pub fn record_failure(&self, source: &str, reference: &str, error: &str) -> LedgerResult<()> {
        self.record_outcome(source, reference, AttemptStatus::Failed, Some(error))
    }

    pub fn record_skipped(&self, source: &str, reference: &str, reason: &str) -> LedgerResult<()> {
        self.record_outcome(source, reference, AttemptStatus::Skipped, Some(reason))
    }

    fn record_outcome(
        &self,
        source: &str,
        reference: &str,
        status: AttemptStatus,
        error: Option<&str>,
    ) -> LedgerResult<()> {
        self.ensure_writable()?;
        let mut inner = self.lock();
        let key = key(source, reference);

        match inner.records.get_mut(&key) {
            Some(existing) => {
                if existing.status == status && existing.error.as_deref() == error {
                    return Ok(());
                }
                existing.status = status;
                existing.error = error.map(str::to_string);
                existing.updated_at = Utc::now();
            }
            None => {
                inner.records.insert(
                    key.clone(),
                    AttemptRecord {
                        source: source.to_string(),
                        reference: reference.to_string(),
                        status,
                        error: error.map(str::to_string),
                        updated_at: Utc::now(),
                    },
                );
            }
        }

        self.mark_dirty(&mut inner, key)
    }

    fn mark_dirty(&self, inner: &mut LedgerInner, key: LedgerKey) -> LedgerResult<()> {
        inner.dirty.insert(key);
        inner.writes_since_flush += 1;

        if inner.writes_since_flush >= self.options.flush_every {
            flush_inner(inner)?;
        }
        Ok(())
    }

    /// Persists every record changed since the last flush
    pub fn flush(&self) -> LedgerResult<()> {
        let mut inner = self.lock();
        flush_inner(&mut inner)
    }

    /// Number of records changed but not yet persisted
    pub fn unflushed(&self) -> usize {
        self.lock().dirty.len()
    }

    /// Returns the current record for an item, if any
    pub fn lookup(&self, source: &str, reference: &str) -> Option<AttemptRecord> {
        self.lock().records.get(&key(source, reference)).cloned()
    }

    /// Returns every record of a source, ordered by reference
    pub fn records_for_source(&self, source: &str) -> Vec<AttemptRecord> {
        let inner = self.lock();
        let mut records: Vec<_> = inner
            .records
            .values()
            .filter(|record| record.source == source)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.reference.cmp(&b.reference));
        records
    }

    /// Tallies statuses per source
    pub fn counts_by_source(&self) -> BTreeMap<String, StatusCounts> {
        let inner = self.lock();
        let mut counts: BTreeMap<String, StatusCounts> = BTreeMap::new();
        for record in inner.records.values() {
            counts
                .entry(record.source.clone())
                .or_default()
                .add(record.status);
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every attempt, in memory and on disk
    pub fn clear(&self) -> LedgerResult<()> {
        self.ensure_writable()?;
        let mut inner = self.lock();
        inner.conn.execute("DELETE FROM attempts", [])?;
        inner.records.clear();
        inner.dirty.clear();
        inner.writes_since_flush = 0;
        Ok(())
    }

    // ===== Run Management =====

    pub fn begin_run(&self, config_hash: &str) -> LedgerResult<i64> {
        self.ensure_writable()?;
        let inner = self.lock();
        let now = Utc::now().to_rfc3339();
        inner.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(inner.conn.last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, status: RunStatus) -> LedgerResult<()> {
        self.ensure_writable()?;
        let inner = self.lock();
        let now = Utc::now().to_rfc3339();
        let updated = inner.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(LedgerError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub fn latest_run(&self) -> LedgerResult<Option<RunRecord>> {
        let inner = self.lock();
        let run = inner
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(RunRecord {
                        id: row.get(0)?,
                        started_at: row.get(1)?,
                        finished_at: row.get(2)?,
                        config_hash: row.get(3)?,
                        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                            .unwrap_or(RunStatus::Interrupted),
                    })
                },
            )
            .optional()?;
        Ok(run)
    }
}

impl Drop for CrawlLedger {
    fn drop(&mut self) {
        let mut inner = self.lock();
        if inner.dirty.is_empty() {
            return;
        }
        if let Err(e) = flush_inner(&mut inner) {
            tracing::error!("Failed to flush ledger on drop: {}", e);
        }
    }
}

/// Maps SQLite's busy/locked errors to `LedgerError::Locked`
fn locked_or(error: rusqlite::Error, path: &Path) -> LedgerError {
    match error.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            LedgerError::Locked(path.display().to_string())
        }
        _ => LedgerError::Sqlite(error),
    }
}

fn key(source: &str, reference: &str) -> LedgerKey {
    (source.to_string(), reference.to_string())
}

fn load_records(conn: &Connection) -> LedgerResult<HashMap<LedgerKey, AttemptRecord>> {
    let mut stmt = conn.prepare(
        "SELECT source, webpage, success, error, skipped, status, updated_at FROM attempts",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<bool>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<bool>>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = HashMap::with_capacity(rows.len());
    for (source, reference, success, error, skipped, status, updated_at) in rows {
        let status = AttemptStatus::from_db_string(&status)
            .unwrap_or_else(|| AttemptStatus::from_columns(success, skipped));

        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| LedgerError::CorruptRow {
                source_tag: source.clone(),
                reference: reference.clone(),
                message: format!("bad timestamp '{}': {}", updated_at, e),
            })?;

        records.insert(
            (source.clone(), reference.clone()),
            AttemptRecord {
                source,
                reference,
                status,
                error,
                updated_at,
            },
        );
    }

    Ok(records)
}

fn flush_inner(inner: &mut LedgerInner) -> LedgerResult<()> {
    if inner.dirty.is_empty() {
        inner.writes_since_flush = 0;
        return Ok(());
    }

    let tx = inner.conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO attempts (source, webpage, success, error, skipped, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source, webpage) DO UPDATE SET
                success = excluded.success,
                error = excluded.error,
                skipped = excluded.skipped,
                status = excluded.status,
                updated_at = excluded.updated_at",
        )?;

        for key in &inner.dirty {
            if let Some(record) = inner.records.get(key) {
                stmt.execute(params![
                    record.source,
                    record.reference,
                    record.status.success_column(),
                    record.error,
                    record.status.skipped_column(),
                    record.status.to_db_string(),
                    record.updated_at.to_rfc3339(),
                ])?;
            }
        }
    }
    tx.commit()?;

    tracing::trace!("Flushed {} ledger records", inner.dirty.len());
    inner.dirty.clear();
    inner.writes_since_flush = 0;
    Ok(())
}
