//! Statistics generation from the crawl ledger
//!
//! This module provides functionality for extracting and displaying
//! per-source attempt statistics from the ledger.

use crate::ledger::{CrawlLedger, RunRecord, StatusCounts};
use crate::HarvestError;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Ledger statistics summary
#[derive(Debug, Clone)]
pub struct LedgerStatistics {
    /// Most recent run, if any run was ever started
    pub latest_run: Option<RunRecord>,

    /// Attempt counts keyed by source tag
    pub by_source: BTreeMap<String, StatusCounts>,
}

impl LedgerStatistics {
    /// Counts summed over every source
    pub fn totals(&self) -> StatusCounts {
        self.by_source
            .values()
            .fold(StatusCounts::default(), |mut acc, counts| {
                acc.pending += counts.pending;
                acc.success += counts.success;
                acc.failed += counts.failed;
                acc.skipped += counts.skipped;
                acc
            })
    }
}

/// Loads statistics from the ledger
pub fn load_statistics(ledger: &CrawlLedger) -> Result<LedgerStatistics, HarvestError> {
    Ok(LedgerStatistics {
        latest_run: ledger.latest_run()?,
        by_source: ledger.counts_by_source(),
    })
}

/// Formats statistics as the text printed by `--stats`
pub fn format_statistics(stats: &LedgerStatistics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Ledger Statistics ===\n");

    match &stats.latest_run {
        Some(run) => {
            let _ = writeln!(out, "Latest run:");
            let _ = writeln!(out, "  Id: {}", run.id);
            let _ = writeln!(out, "  Started: {}", run.started_at);
            if let Some(finished) = &run.finished_at {
                let _ = writeln!(out, "  Finished: {}", finished);
            }
            let _ = writeln!(out, "  Status: {}", run.status.to_db_string());
            let _ = writeln!(out, "  Config hash: {}", run.config_hash);
        }
        None => {
            let _ = writeln!(out, "No runs recorded yet");
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Attempts by Source:");
    for (source, counts) in &stats.by_source {
        let _ = writeln!(
            out,
            "  {}: {} total ({} success, {} failed, {} skipped, {} pending)",
            source,
            counts.total(),
            counts.success,
            counts.failed,
            counts.skipped,
            counts.pending
        );
    }
    let _ = writeln!(out);

    let totals = stats.totals();
    let success_rate = if totals.total() > 0 {
        (totals.success as f64 / totals.total() as f64) * 100.0
    } else {
        0.0
    };
    let _ = write!(
        out,
        "Success Rate: {:.1}% ({} / {} items successfully extracted)",
        success_rate,
        totals.success,
        totals.total()
    );

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &LedgerStatistics) {
    println!("{}", format_statistics(stats));
}
