//! One worker per source
//!
//! A worker owns its pipeline and drives it through
//! `Initialized -> Listing -> (Advancing -> Listing)* -> Exhausted | Failed`.
//! Items and pages are handled strictly in order. Every pipeline call runs
//! under the call timeout, and listing and advancing are retried up to the
//! configured bound.

use crate::ledger::{ClaimOutcome, CrawlLedger};
use crate::media::MediaFetcher;
use crate::orchestrator::summary::{SourceOutcome, SourceSummary};
use crate::orchestrator::{OrchestratorSettings, StopSignal};
use crate::pipeline::{AdvanceOutcome, ItemReference, PipelineState, ProcessedItem, SourcePipeline};
use crate::storage::Sink;
use crate::HarvestError;
use std::sync::Arc;
use tokio::time::{sleep, timeout};

pub(crate) struct SourceWorker {
    pipeline: Box<dyn SourcePipeline>,
    source: String,
    state: PipelineState,
    ledger: Arc<CrawlLedger>,
    sink: Arc<dyn Sink>,
    media: Option<Arc<MediaFetcher>>,
    settings: OrchestratorSettings,
    stop: StopSignal,
}

impl SourceWorker {
    pub(crate) fn new(
        pipeline: Box<dyn SourcePipeline>,
        ledger: Arc<CrawlLedger>,
        sink: Arc<dyn Sink>,
        media: Option<Arc<MediaFetcher>>,
        settings: OrchestratorSettings,
        stop: StopSignal,
    ) -> Self {
        let source = pipeline.source().to_string();
        Self {
            pipeline,
            source,
            state: PipelineState::Initialized,
            ledger,
            sink,
            media,
            settings,
            stop,
        }
    }

    pub(crate) async fn run(mut self) -> SourceSummary {
        let mut summary = SourceSummary::new(&self.source);
        tracing::info!("[{}] worker started", self.source);

        summary.outcome = match self.drive(&mut summary).await {
            Ok(outcome) => outcome,
            Err(e) => SourceOutcome::Failed(e.to_string()),
        };

        if let SourceOutcome::Failed(reason) = &summary.outcome {
            if !self.state.is_terminal() {
                self.state = PipelineState::Failed;
            }
            tracing::error!("[{}] source failed: {}", self.source, reason);
        }

        tracing::info!(
            "[{}] worker finished ({}): {} completed, {} skipped, {} failed over {} pages",
            self.source,
            summary.outcome,
            summary.completed,
            summary.skipped,
            summary.failed,
            summary.pages
        );
        summary
    }

    async fn drive(&mut self, summary: &mut SourceSummary) -> Result<SourceOutcome, HarvestError> {
        loop {
            if self.stop.is_triggered() {
                return Ok(SourceOutcome::Stopped);
            }

            self.state.transition(PipelineState::Listing)?;
            let items = match self.list_with_retry().await {
                Ok(items) => items,
                Err(reason) => {
                    self.state.transition(PipelineState::Failed)?;
                    return Ok(SourceOutcome::Failed(reason));
                }
            };

            if items.is_empty() {
                tracing::info!("[{}] no items listed, source exhausted", self.source);
                self.state.transition(PipelineState::Exhausted)?;
                return Ok(SourceOutcome::Exhausted);
            }

            summary.pages += 1;
            tracing::info!(
                "[{}] page {}: {} items",
                self.source,
                self.pipeline.cursor().page,
                items.len()
            );

            for reference in &items {
                if self.stop.is_triggered() {
                    tracing::info!("[{}] stop requested, leaving page", self.source);
                    return Ok(SourceOutcome::Stopped);
                }
                self.handle_item(reference, summary).await?;
            }

            self.state.transition(PipelineState::Advancing)?;
            match self.advance_with_retry().await {
                Ok(true) => continue,
                Ok(false) => {
                    tracing::info!("[{}] no more results", self.source);
                    self.state.transition(PipelineState::Exhausted)?;
                    return Ok(SourceOutcome::Exhausted);
                }
                Err(reason) => {
                    self.state.transition(PipelineState::Failed)?;
                    return Ok(SourceOutcome::Failed(reason));
                }
            }
        }
    }

    async fn handle_item(
        &self,
        reference: &ItemReference,
        summary: &mut SourceSummary,
    ) -> Result<(), HarvestError> {
        let source = self.source.as_str();

        if let ClaimOutcome::AlreadyClaimed(status) =
            self.ledger.record_start(source, reference.as_str())?
        {
            tracing::debug!("[{}] {} already {}, skipping", source, reference, status);
            summary.skipped += 1;
            return Ok(());
        }

        tracing::debug!("[{}] processing {}", source, reference);
        let processed = match timeout(
            self.settings.call_timeout,
            self.pipeline.process_item(reference),
        )
        .await
        {
            Ok(Ok(processed)) => Ok(processed),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "processing timed out after {}s",
                self.settings.call_timeout.as_secs()
            )),
        };

        match processed {
            Ok(ProcessedItem::Extracted(record)) => {
                if let Err(e) = self.sink.append(&record) {
                    tracing::error!("[{}] sink rejected {}: {}", source, reference, e);
                    self.ledger.record_failure(
                        source,
                        reference.as_str(),
                        &format!("sink error: {}", e),
                    )?;
                    summary.failed += 1;
                    return Ok(());
                }

                if let Some(media) = &self.media {
                    media.fetch(record.media.clone(), source, &record.media_key());
                }

                self.ledger.record_success(source, reference.as_str())?;
                summary.completed += 1;
            }
            Ok(ProcessedItem::Skipped(reason)) => {
                tracing::debug!("[{}] skipped {}: {}", source, reference, reason);
                self.ledger
                    .record_skipped(source, reference.as_str(), &reason)?;
                summary.skipped += 1;
            }
            Err(error) => {
                tracing::warn!("[{}] item {} failed: {}", source, reference, error);
                self.ledger
                    .record_failure(source, reference.as_str(), &error)?;
                summary.failed += 1;
            }
        }

        Ok(())
    }

    /// Lists the current page, retrying failures and timeouts
    async fn list_with_retry(&mut self) -> Result<Vec<ItemReference>, String> {
        let max_attempts = self.settings.max_advance_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match timeout(self.settings.call_timeout, self.pipeline.list_items()).await {
                Ok(Ok(items)) => return Ok(items),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "listing timed out".to_string(),
            }

            tracing::warn!(
                "[{}] listing attempt {}/{} failed: {}",
                self.source,
                attempt,
                max_attempts,
                last_error
            );
            if attempt < max_attempts {
                sleep(self.settings.retry_delay).await;
            }
        }

        Err(format!(
            "listing failed {} times: {}",
            max_attempts, last_error
        ))
    }

    /// Advances the pipeline
    ///
    /// Returns `Ok(true)` when a new page is showing and `Ok(false)` when the
    /// source has no more results.
    async fn advance_with_retry(&mut self) -> Result<bool, String> {
        let max_attempts = self.settings.max_advance_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match timeout(self.settings.call_timeout, self.pipeline.advance_page()).await {
                Ok(AdvanceOutcome::PageChanged) => return Ok(true),
                Ok(AdvanceOutcome::NoMoreResults) => return Ok(false),
                Ok(AdvanceOutcome::AdvanceFailed(reason)) => last_error = reason,
                Err(_) => last_error = "advance timed out".to_string(),
            }

            tracing::warn!(
                "[{}] advance attempt {}/{} failed: {}",
                self.source,
                attempt,
                max_attempts,
                last_error
            );
            if attempt < max_attempts {
                sleep(self.settings.retry_delay).await;
            }
        }

        Err(format!(
            "advance failed {} times: {}",
            max_attempts, last_error
        ))
    }
}
