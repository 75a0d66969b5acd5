//! Listing Harvester: resumable multi-source listing crawler
//!
//! This crate drives one pagination state machine per listing source
//! concurrently, deduplicates work across runs through a durable ledger,
//! and records the outcome of every item it attempts.

pub mod config;
pub mod ledger;
pub mod media;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] pipeline::PipelineError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid pipeline transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: pipeline::PipelineState,
        to: pipeline::PipelineState,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use ledger::{AttemptStatus, ClaimOutcome, CrawlLedger};
pub use orchestrator::{
    CrawlOrchestrator, OrchestratorSettings, RunSummary, SourceOutcome, SourceSummary, StopSignal,
};
pub use pipeline::{AdvanceOutcome, ItemReference, PipelineState, SourcePipeline};
