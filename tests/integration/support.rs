//! Scripted pipelines and in-memory sinks shared by the integration tests

use async_trait::async_trait;
use listing_harvester::ledger::{CrawlLedger, LedgerOptions};
use listing_harvester::orchestrator::{OrchestratorSettings, StopSignal};
use listing_harvester::pipeline::{
    AdvanceOutcome, ItemError, ItemReference, PageCursor, PipelineError, ProcessedItem,
    SourcePipeline,
};
use listing_harvester::storage::{ItemRecord, Sink, StorageError, StorageResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Call counters observable after the pipeline moved into a worker
#[derive(Debug, Default)]
pub struct Calls {
    pub list: AtomicUsize,
    pub advance: AtomicUsize,
    pub process: AtomicUsize,
}

impl Calls {
    pub fn list(&self) -> usize {
        self.list.load(Ordering::SeqCst)
    }

    pub fn advance(&self) -> usize {
        self.advance.load(Ordering::SeqCst)
    }

    pub fn process(&self) -> usize {
        self.process.load(Ordering::SeqCst)
    }
}

/// A pipeline that serves fixed pages of references
pub struct ScriptedPipeline {
    name: String,
    pages: Vec<Vec<ItemReference>>,
    page: usize,
    failing_items: HashSet<String>,
    skipped_items: HashSet<String>,
    advance_always_fails: bool,
    panic_on_list: bool,
    process_delay: Option<Duration>,
    list_delay: Option<Duration>,
    advance_delay: Option<Duration>,
    stop_after: Option<(String, StopSignal)>,
    calls: Arc<Calls>,
}

impl ScriptedPipeline {
    pub fn new(name: &str, pages: Vec<Vec<String>>) -> Self {
        Self {
            name: name.to_string(),
            pages: pages
                .into_iter()
                .map(|page| page.into_iter().map(ItemReference::from).collect())
                .collect(),
            page: 0,
            failing_items: HashSet::new(),
            skipped_items: HashSet::new(),
            advance_always_fails: false,
            panic_on_list: false,
            process_delay: None,
            list_delay: None,
            advance_delay: None,
            stop_after: None,
            calls: Arc::new(Calls::default()),
        }
    }

    pub fn failing(mut self, reference: &str) -> Self {
        self.failing_items.insert(reference.to_string());
        self
    }

    pub fn skipping(mut self, reference: &str) -> Self {
        self.skipped_items.insert(reference.to_string());
        self
    }

    pub fn advance_always_fails(mut self) -> Self {
        self.advance_always_fails = true;
        self
    }

    pub fn panic_on_list(mut self) -> Self {
        self.panic_on_list = true;
        self
    }

    pub fn process_delay(mut self, delay: Duration) -> Self {
        self.process_delay = Some(delay);
        self
    }

    pub fn list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    pub fn advance_delay(mut self, delay: Duration) -> Self {
        self.advance_delay = Some(delay);
        self
    }

    /// Triggers `stop` while processing `reference`
    pub fn stop_after(mut self, reference: &str, stop: StopSignal) -> Self {
        self.stop_after = Some((reference.to_string(), stop));
        self
    }

    pub fn calls(&self) -> Arc<Calls> {
        Arc::clone(&self.calls)
    }

    pub fn boxed(self) -> Box<dyn SourcePipeline> {
        Box::new(self)
    }
}

#[async_trait]
impl SourcePipeline for ScriptedPipeline {
    fn source(&self) -> &str {
        &self.name
    }

    async fn list_items(&mut self) -> Result<Vec<ItemReference>, PipelineError> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_list {
            panic!("scripted panic in {}", self.name);
        }
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.pages.get(self.page).cloned().unwrap_or_default())
    }

    async fn advance_page(&mut self) -> AdvanceOutcome {
        self.calls.advance.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.advance_delay {
            tokio::time::sleep(delay).await;
        }
        if self.advance_always_fails {
            return AdvanceOutcome::AdvanceFailed("page did not change".to_string());
        }
        if self.page + 1 >= self.pages.len() {
            return AdvanceOutcome::NoMoreResults;
        }
        self.page += 1;
        AdvanceOutcome::PageChanged
    }

    async fn process_item(&self, reference: &ItemReference) -> Result<ProcessedItem, ItemError> {
        self.calls.process.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.process_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((trigger, stop)) = &self.stop_after {
            if trigger == reference.as_str() {
                stop.trigger();
            }
        }

        if self.failing_items.contains(reference.as_str()) {
            return Err(ItemError::MissingField("price".to_string()));
        }
        if self.skipped_items.contains(reference.as_str()) {
            return Ok(ProcessedItem::Skipped("listing removed".to_string()));
        }

        let mut record = ItemRecord::new(&self.name, reference.as_str());
        record.id = reference.as_str().rsplit('/').next().map(str::to_string);
        Ok(ProcessedItem::Extracted(record))
    }

    fn cursor(&self) -> PageCursor {
        PageCursor {
            page: self.page as u32 + 1,
            fingerprint: self.pages.get(self.page).and_then(|p| p.first().cloned()),
        }
    }
}

/// Sink keeping records in memory, optionally rejecting some references
#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<ItemRecord>>,
    rejected: HashSet<String>,
}

impl MemorySink {
    pub fn rejecting(reference: &str) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            rejected: [reference.to_string()].into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl Sink for MemorySink {
    fn append(&self, record: &ItemRecord) -> StorageResult<()> {
        if self.rejected.contains(&record.reference) {
            return Err(StorageError::InvalidPath(format!(
                "rejected {}",
                record.reference
            )));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Item references on one host, e.g. `https://bars.am/item/1`
pub fn references(host: &str, range: std::ops::RangeInclusive<u32>) -> Vec<String> {
    range.map(|i| format!("https://{}/item/{}", host, i)).collect()
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        max_advance_attempts: 3,
        retry_delay: Duration::ZERO,
        call_timeout: Duration::from_secs(5),
    }
}

pub fn memory_ledger(retry_failed: bool) -> Arc<CrawlLedger> {
    Arc::new(
        CrawlLedger::open_in_memory(LedgerOptions {
            flush_every: 5,
            retry_failed,
        })
        .unwrap(),
    )
}
