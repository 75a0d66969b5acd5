//! Source pipelines: the per-source pagination state machines
//!
//! Every listing source is driven through the same capability interface:
//! - list the item references on the current page
//! - advance to the next page, classifying the outcome by fingerprint
//! - process one item through the source's extractor
//!
//! Concrete sources are independent structs; they share helpers, not state.

mod extract;
mod fetcher;
mod links;
mod paged;
mod sitemap;
mod state;

pub use extract::{ExtractRules, SelectorExtractor};
pub use fetcher::{build_http_client, fetch_bytes, fetch_text, FetchError};
pub use links::{extract_item_links, extract_sitemap_locs, resolve_link, LinkFilter};
pub use paged::PagedListingPipeline;
pub use sitemap::SitemapPipeline;
pub use state::PipelineState;

use crate::config::{compile_link_pattern, Config, SourceConfig, SourceKind};
use crate::storage::ItemRecord;
use crate::{ConfigError, HarvestError};
use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Stable identifier of one crawlable item within a source (a listing URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemReference(String);

impl ItemReference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ItemReference {
    fn from(reference: String) -> Self {
        Self(reference)
    }
}

impl From<&str> for ItemReference {
    fn from(reference: &str) -> Self {
        Self(reference.to_string())
    }
}

impl fmt::Display for ItemReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a pipeline within its source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based page number
    pub page: u32,

    /// First item reference of the current page
    pub fingerprint: Option<ItemReference>,
}

impl PageCursor {
    pub fn first_page() -> Self {
        Self {
            page: 1,
            fingerprint: None,
        }
    }
}

/// Result of one attempt to move to the next page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The visible result set changed
    PageChanged,

    /// The next page affirmatively holds no items
    NoMoreResults,

    /// Navigation did not make progress; worth retrying
    AdvanceFailed(String),
}

/// Classifies an advance by comparing fingerprints
///
/// An empty page ends the source. A page whose first item equals the
/// previous fingerprint did not move, which is a failure rather than an end.
pub fn classify_advance(
    before: Option<&ItemReference>,
    after_items: &[ItemReference],
) -> AdvanceOutcome {
    match after_items.first() {
        None => AdvanceOutcome::NoMoreResults,
        Some(first) if Some(first) == before => AdvanceOutcome::AdvanceFailed(format!(
            "page did not change (first item still {})",
            first
        )),
        Some(_) => AdvanceOutcome::PageChanged,
    }
}

/// Result of processing one item
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessedItem {
    /// A record ready for the sink
    Extracted(ItemRecord),

    /// The item is deliberately not extracted (e.g. the listing was removed)
    Skipped(String),
}

/// Per-item failures; never fatal for the pipeline
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("required field '{0}' not found")]
    MissingField(String),

    #[error("malformed field '{field}': {message}")]
    Malformed { field: String, message: String },

    #[error("invalid reference {reference}: {message}")]
    InvalidReference { reference: String, message: String },
}

/// Failures to list the current page
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("listing fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("invalid page URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Extracts one item of a source into a record
///
/// Implementations hold no state shared with the orchestrator.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(
        &self,
        source: &str,
        reference: &ItemReference,
    ) -> Result<ProcessedItem, ItemError>;
}

/// Capability interface every listing source implements
///
/// A pipeline is owned by exactly one worker. `list_items` must not move the
/// cursor; only `advance_page` does.
#[async_trait]
pub trait SourcePipeline: Send + Sync {
    /// Source tag used in the ledger and the summary
    fn source(&self) -> &str;

    /// Items visible on the current page, in page order
    async fn list_items(&mut self) -> Result<Vec<ItemReference>, PipelineError>;

    /// Attempts to move to the next page
    async fn advance_page(&mut self) -> AdvanceOutcome;

    /// Fetches and extracts one item
    async fn process_item(&self, reference: &ItemReference) -> Result<ProcessedItem, ItemError>;

    /// Current page position, for progress reporting
    fn cursor(&self) -> PageCursor;
}

/// Builds one pipeline per configured source
///
/// All pipelines share a single HTTP client.
pub fn build_pipelines(config: &Config) -> Result<Vec<Box<dyn SourcePipeline>>, HarvestError> {
    let client = build_http_client(
        &config.user_agent,
        Duration::from_secs(config.orchestrator.request_timeout_secs),
    )?;

    config
        .sources
        .iter()
        .map(|source| build_pipeline(source, client.clone()))
        .collect()
}

fn build_pipeline(
    source: &SourceConfig,
    client: Client,
) -> Result<Box<dyn SourcePipeline>, HarvestError> {
    let rules = ExtractRules::from_config(source)?;
    let processor: Arc<dyn ItemProcessor> =
        Arc::new(SelectorExtractor::new(client.clone(), rules));

    let filter = LinkFilter {
        contains: source.link_contains.clone(),
        pattern: source
            .link_pattern
            .as_deref()
            .map(compile_link_pattern)
            .transpose()?,
    };

    let pipeline: Box<dyn SourcePipeline> = match source.kind {
        SourceKind::Paged => {
            let link_selector = scraper::Selector::parse(&source.item_link_selector)
                .map_err(|e| {
                    ConfigError::InvalidSelector(format!(
                        "'{}': {:?}",
                        source.item_link_selector, e
                    ))
                })?;
            Box::new(PagedListingPipeline::new(
                &source.name,
                client,
                &source.url,
                &source.page_param,
                link_selector,
                filter,
                processor,
            )?)
        }
        SourceKind::Sitemap => Box::new(SitemapPipeline::new(
            &source.name,
            client,
            &source.url,
            filter,
            processor,
        )?),
    };

    tracing::debug!(
        "Built {:?} pipeline for source {}",
        source.kind,
        source.name
    );
    Ok(pipeline)
}
