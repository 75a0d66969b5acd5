//! Numbered listing pages (`?page=N`)
//!
//! The cursor holds the page number and the first item seen on that page.
//! Advancing fetches page N+1 and only commits the cursor once the new page
//! is known to differ, so a retried advance targets the same page again.

use crate::pipeline::fetcher::fetch_text;
use crate::pipeline::links::{extract_item_links, LinkFilter};
use crate::pipeline::{
    classify_advance, AdvanceOutcome, ItemError, ItemProcessor, ItemReference, PageCursor,
    PipelineError, ProcessedItem, SourcePipeline,
};
use async_trait::async_trait;
use reqwest::Client;
use scraper::Selector;
use std::sync::Arc;
use url::Url;

pub struct PagedListingPipeline {
    name: String,
    client: Client,
    base_url: Url,
    page_param: String,
    link_selector: Selector,
    filter: LinkFilter,
    processor: Arc<dyn ItemProcessor>,
    cursor: PageCursor,
    current_items: Option<Vec<ItemReference>>,
}

impl PagedListingPipeline {
    pub fn new(
        name: &str,
        client: Client,
        base_url: &str,
        page_param: &str,
        link_selector: Selector,
        filter: LinkFilter,
        processor: Arc<dyn ItemProcessor>,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            name: name.to_string(),
            client,
            base_url: Url::parse(base_url)?,
            page_param: page_param.to_string(),
            link_selector,
            filter,
            processor,
            cursor: PageCursor::first_page(),
            current_items: None,
        })
    }

    /// URL of a listing page; page 1 is the configured URL untouched
    pub fn page_url(&self, page: u32) -> Url {
        if page <= 1 {
            return self.base_url.clone();
        }

        let retained: Vec<(String, String)> = self
            .base_url
            .query_pairs()
            .filter(|(key, _)| **key != *self.page_param)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair(&self.page_param, &page.to_string());
        url
    }

    async fn fetch_page(&self, page: u32) -> Result<Vec<ItemReference>, PipelineError> {
        let url = self.page_url(page);
        tracing::debug!("[{}] fetching listing page {}: {}", self.name, page, url);

        let html = fetch_text(&self.client, url.as_str()).await?;
        Ok(extract_item_links(
            &html,
            &url,
            &self.link_selector,
            &self.filter,
        ))
    }
}

#[async_trait]
impl SourcePipeline for PagedListingPipeline {
    fn source(&self) -> &str {
        &self.name
    }

    async fn list_items(&mut self) -> Result<Vec<ItemReference>, PipelineError> {
        if let Some(items) = &self.current_items {
            return Ok(items.clone());
        }

        let items = self.fetch_page(self.cursor.page).await?;
        self.cursor.fingerprint = items.first().cloned();
        self.current_items = Some(items.clone());
        Ok(items)
    }

    async fn advance_page(&mut self) -> AdvanceOutcome {
        if self.current_items.is_none() {
            if let Err(e) = self.list_items().await {
                return AdvanceOutcome::AdvanceFailed(e.to_string());
            }
        }

        let target = self.cursor.page + 1;
        let items = match self.fetch_page(target).await {
            Ok(items) => items,
            Err(e) => return AdvanceOutcome::AdvanceFailed(e.to_string()),
        };

        let outcome = classify_advance(self.cursor.fingerprint.as_ref(), &items);
        if !matches!(outcome, AdvanceOutcome::AdvanceFailed(_)) {
            self.cursor = PageCursor {
                page: target,
                fingerprint: items.first().cloned(),
            };
            self.current_items = Some(items);
        }
        outcome
    }

    async fn process_item(&self, reference: &ItemReference) -> Result<ProcessedItem, ItemError> {
        self.processor.process(&self.name, reference).await
    }

    fn cursor(&self) -> PageCursor {
        self.cursor.clone()
    }
}
