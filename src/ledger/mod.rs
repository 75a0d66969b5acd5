//! Crawl ledger: the durable record of every attempted item
//!
//! This module handles:
//! - Claiming (source, reference) pairs atomically so no item is worked twice
//! - Recording terminal outcomes (success, failed, skipped) with error text
//! - Periodic persistence to SQLite so a crash loses at most a few updates
//! - Reloading prior runs so a restarted crawl skips completed work
//! - Run tracking for the summary and stats views

mod schema;
mod sqlite;

pub use sqlite::{CrawlLedger, LedgerOptions};

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Ledger {0} is in use by another crawl")]
    Locked(String),

    #[error("Ledger was opened read-only")]
    ReadOnly,

    #[error("Corrupt ledger row for {source_tag}/{reference}: {message}")]
    CorruptRow {
        source_tag: String,
        reference: String,
        message: String,
    },
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Outcome of one attempt at one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttemptStatus {
    /// Claimed by a worker, outcome not yet known
    Pending,
    /// Extracted and appended to the sink
    Success,
    /// Extraction or storage failed
    Failed,
    /// Deliberately not extracted
    Skipped,
}

impl AttemptStatus {
    /// Returns true if the item never needs to be processed again
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Returns true if this status ends an attempt
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Derives a status from the nullable `success`/`skipped` columns
    ///
    /// Used for rows that carry no explicit status.
    pub fn from_columns(success: Option<bool>, skipped: Option<bool>) -> Self {
        match (success, skipped) {
            (_, Some(true)) => Self::Skipped,
            (Some(true), _) => Self::Success,
            (Some(false), _) => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Value of the `success` column for this status
    pub fn success_column(&self) -> Option<bool> {
        match self {
            Self::Success => Some(true),
            Self::Failed => Some(false),
            Self::Pending | Self::Skipped => None,
        }
    }

    /// Value of the `skipped` column for this status
    pub fn skipped_column(&self) -> Option<bool> {
        match self {
            Self::Skipped => Some(true),
            _ => None,
        }
    }

    pub fn all_statuses() -> [Self; 4] {
        [Self::Pending, Self::Success, Self::Failed, Self::Skipped]
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// The single logical record kept per (source, reference)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub source: String,
    pub reference: String,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Answer to a claim request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now owns the item and must record an outcome
    Claimed,
    /// Someone (this run or an earlier one) already holds the item
    AlreadyClaimed(AttemptStatus),
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed)
    }
}

/// Per-source tallies of ledger statuses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttemptStatus) {
        match status {
            AttemptStatus::Pending => self.pending += 1,
            AttemptStatus::Success => self.success += 1,
            AttemptStatus::Failed => self.failed += 1,
            AttemptStatus::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.success + self.failed + self.skipped
    }
}

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            _ => None,
        }
    }
}
