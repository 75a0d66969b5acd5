//! Sitemap-seeded source
//!
//! Some sources publish every listing in a sitemap. The whole filtered
//! sitemap is exposed as a single page, so advancing always ends the source.

use crate::pipeline::fetcher::fetch_text;
use crate::pipeline::links::{extract_sitemap_locs, LinkFilter};
use crate::pipeline::{
    AdvanceOutcome, ItemError, ItemProcessor, ItemReference, PageCursor, PipelineError,
    ProcessedItem, SourcePipeline,
};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use url::Url;

pub struct SitemapPipeline {
    name: String,
    client: Client,
    sitemap_url: Url,
    filter: LinkFilter,
    processor: Arc<dyn ItemProcessor>,
    items: Option<Vec<ItemReference>>,
}

impl SitemapPipeline {
    pub fn new(
        name: &str,
        client: Client,
        sitemap_url: &str,
        filter: LinkFilter,
        processor: Arc<dyn ItemProcessor>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            name: name.to_string(),
            client,
            sitemap_url: Url::parse(sitemap_url)?,
            filter,
            processor,
            items: None,
        })
    }
}

#[async_trait]
impl SourcePipeline for SitemapPipeline {
    fn source(&self) -> &str {
        &self.name
    }

    async fn list_items(&mut self) -> Result<Vec<ItemReference>, PipelineError> {
        if let Some(items) = &self.items {
            return Ok(items.clone());
        }

        tracing::debug!("[{}] fetching sitemap {}", self.name, self.sitemap_url);
        let xml = fetch_text(&self.client, self.sitemap_url.as_str()).await?;
        let items = extract_sitemap_locs(&xml, &self.filter);
        tracing::info!("[{}] sitemap lists {} items", self.name, items.len());

        self.items = Some(items.clone());
        Ok(items)
    }

    async fn advance_page(&mut self) -> AdvanceOutcome {
        AdvanceOutcome::NoMoreResults
    }

    async fn process_item(&self, reference: &ItemReference) -> Result<ProcessedItem, ItemError> {
        self.processor.process(&self.name, reference).await
    }

    fn cursor(&self) -> PageCursor {
        PageCursor {
            page: 1,
            fingerprint: self
                .items
                .as_ref()
                .and_then(|items| items.first().cloned()),
        }
    }
}
