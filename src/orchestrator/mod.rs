//! Crawl orchestration
//!
//! This module runs every source pipeline at once:
//! - one tokio task per pipeline, isolated from its siblings
//! - a shared ledger for deduplication and resumability
//! - a shared sink and media fetcher for results
//! - a stop signal checked between items
//!
//! A run returns only after every worker has reached a terminal state.

mod summary;
mod worker;

pub use summary::{RunSummary, SourceOutcome, SourceSummary};

use crate::config::OrchestratorConfig;
use crate::ledger::CrawlLedger;
use crate::media::MediaFetcher;
use crate::pipeline::SourcePipeline;
use crate::storage::Sink;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use worker::SourceWorker;

/// Cooperative stop flag shared by the orchestrator and its workers
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every worker to finish after its current item
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Retry and timeout settings applied to every worker
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Attempts per listing or advance before a source is abandoned
    pub max_advance_attempts: u32,

    /// Pause between attempts
    pub retry_delay: Duration,

    /// Upper bound on each pipeline call
    pub call_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_advance_attempts: config.max_advance_attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            call_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// Runs source pipelines concurrently against a shared ledger and sink
pub struct CrawlOrchestrator {
    ledger: Arc<CrawlLedger>,
    sink: Arc<dyn Sink>,
    media: Option<Arc<MediaFetcher>>,
    settings: OrchestratorSettings,
    stop: StopSignal,
}

impl CrawlOrchestrator {
    pub fn new(
        ledger: Arc<CrawlLedger>,
        sink: Arc<dyn Sink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            sink,
            media: None,
            settings,
            stop: StopSignal::new(),
        }
    }

    /// Hands the media URLs of extracted records to `media`
    pub fn with_media(mut self, media: Arc<MediaFetcher>) -> Self {
        self.media = Some(media);
        self
    }

    /// Handle used to request a graceful stop, e.g. from a Ctrl-C handler
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn ledger(&self) -> &Arc<CrawlLedger> {
        &self.ledger
    }

    /// Runs every pipeline to a terminal state
    ///
    /// A worker that panics is reported as `Crashed` without affecting the
    /// others. The ledger is flushed and pending media downloads are drained
    /// before returning.
    pub async fn run(&self, pipelines: Vec<Box<dyn SourcePipeline>>) -> RunSummary {
        let start_time = Instant::now();
        tracing::info!("Starting {} source workers", pipelines.len());

        let handles: Vec<_> = pipelines
            .into_iter()
            .map(|pipeline| {
                let source = pipeline.source().to_string();
                let worker = SourceWorker::new(
                    pipeline,
                    Arc::clone(&self.ledger),
                    Arc::clone(&self.sink),
                    self.media.clone(),
                    self.settings.clone(),
                    self.stop.clone(),
                );
                (source, tokio::spawn(worker.run()))
            })
            .collect();

        let mut sources = Vec::with_capacity(handles.len());
        for (source, handle) in handles {
            let summary = match handle.await {
                Ok(summary) => summary,
                Err(e) if e.is_panic() => {
                    let reason = panic_message(e.into_panic());
                    tracing::error!("[{}] worker crashed: {}", source, reason);
                    SourceSummary::crashed(source, reason)
                }
                Err(e) => {
                    tracing::error!("[{}] worker cancelled: {}", source, e);
                    SourceSummary::crashed(source, e.to_string())
                }
            };
            sources.push(summary);
        }

        if let Err(e) = self.ledger.flush() {
            tracing::error!("Final ledger flush failed: {}", e);
        }

        if let Some(media) = &self.media {
            media.shutdown().await;
        }

        let summary = RunSummary {
            sources,
            elapsed: start_time.elapsed(),
        };
        tracing::info!(
            "Run finished in {:?}: {} completed, {} failed",
            summary.elapsed,
            summary.total_completed(),
            summary.total_failed()
        );
        summary
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}
