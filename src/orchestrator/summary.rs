//! Per-source and per-run summaries reported when a run ends

use std::fmt;
use std::time::Duration;

/// How a source worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The source reported no more results
    Exhausted,

    /// Listing or advancing kept failing past the retry bound
    Failed(String),

    /// A stop was requested before the source ran out of pages
    Stopped,

    /// The worker task panicked
    Crashed(String),
}

impl SourceOutcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "exhausted"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::Stopped => write!(f, "stopped"),
            Self::Crashed(reason) => write!(f, "crashed: {}", reason),
        }
    }
}

/// Counts for one source within a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub source: String,

    /// Items extracted and appended to the sink
    pub completed: u64,

    /// Items already claimed in the ledger, or skipped by the processor
    pub skipped: u64,

    /// Items whose processing or sink append failed
    pub failed: u64,

    /// Listing pages visited
    pub pages: u32,

    pub outcome: SourceOutcome,
}

impl SourceSummary {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            completed: 0,
            skipped: 0,
            failed: 0,
            pages: 0,
            outcome: SourceOutcome::Exhausted,
        }
    }

    pub fn crashed(source: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: SourceOutcome::Crashed(reason.into()),
            ..Self::new(source)
        }
    }

    pub fn attempted(&self) -> u64 {
        self.completed + self.skipped + self.failed
    }
}

/// Everything a run produced, one entry per pipeline in start order
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub sources: Vec<SourceSummary>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn source(&self, name: &str) -> Option<&SourceSummary> {
        self.sources.iter().find(|summary| summary.source == name)
    }

    pub fn total_completed(&self) -> u64 {
        self.sources.iter().map(|s| s.completed).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.sources.iter().map(|s| s.failed).sum()
    }

    /// Returns true if every source ran out of pages normally
    pub fn all_exhausted(&self) -> bool {
        self.sources.iter().all(|s| s.outcome.is_exhausted())
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Run Summary ===")?;
        writeln!(f)?;

        for summary in &self.sources {
            writeln!(f, "{}:", summary.source)?;
            writeln!(f, "  Outcome: {}", summary.outcome)?;
            writeln!(f, "  Pages: {}", summary.pages)?;
            writeln!(
                f,
                "  Items: {} completed, {} skipped, {} failed",
                summary.completed, summary.skipped, summary.failed
            )?;
        }

        writeln!(f)?;
        write!(
            f,
            "Total: {} completed, {} failed across {} sources in {:.1}s",
            self.total_completed(),
            self.total_failed(),
            self.sources.len(),
            self.elapsed.as_secs_f64()
        )
    }
}
