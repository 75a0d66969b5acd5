//! Output module for the human-readable views of the ledger
//!
//! This module handles:
//! - Per-source statistics for `--stats`
//! - Single-attempt inspection for `--inspect`

pub mod stats;

pub use stats::{format_statistics, load_statistics, print_statistics, LedgerStatistics};

use crate::ledger::AttemptRecord;

/// Formats the ledger record of one item for `--inspect`
pub fn format_attempt(source: &str, reference: &str, record: Option<&AttemptRecord>) -> String {
    let Some(record) = record else {
        return format!("{} {}: never attempted", source, reference);
    };

    let mut lines = vec![
        format!("Source: {}", record.source),
        format!("Reference: {}", record.reference),
        format!("Status: {}", record.status),
        format!("Updated: {}", record.updated_at.to_rfc3339()),
    ];
    if let Some(error) = &record.error {
        lines.push(format!("Error: {}", error));
    }
    lines.join("\n")
}
