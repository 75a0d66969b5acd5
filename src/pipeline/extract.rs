//! Selector-driven item extraction
//!
//! The reference `ItemProcessor`: fetch the item page, pull configured fields
//! out by CSS selector, collect media URLs, and fail the item when a
//! required field is missing.

use crate::config::SourceConfig;
use crate::pipeline::fetcher::fetch_text;
use crate::pipeline::links::resolve_link;
use crate::pipeline::{ItemError, ItemProcessor, ItemReference, ProcessedItem};
use crate::storage::ItemRecord;
use crate::ConfigError;
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use url::Url;

/// Compiled extraction rules for one source
#[derive(Debug, Clone)]
pub struct ExtractRules {
    pub fields: Vec<(String, Selector)>,
    pub id_selector: Option<Selector>,
    pub required: HashSet<String>,
    pub media_selector: Option<Selector>,
    pub media_attr: String,
}

impl ExtractRules {
    pub fn from_config(source: &SourceConfig) -> Result<Self, ConfigError> {
        let fields = source
            .fields
            .iter()
            .map(|(name, selector)| Ok((name.clone(), compile(selector)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            fields,
            id_selector: source.id_selector.as_deref().map(compile).transpose()?,
            required: source.required_fields.iter().cloned().collect(),
            media_selector: source.media_selector.as_deref().map(compile).transpose()?,
            media_attr: source.media_attr.clone(),
        })
    }

    /// Extracts a record from an already fetched item page
    pub fn extract(
        &self,
        source: &str,
        reference: &ItemReference,
        html: &str,
    ) -> Result<ItemRecord, ItemError> {
        let base_url =
            Url::parse(reference.as_str()).map_err(|e| ItemError::InvalidReference {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;
        let document = Html::parse_document(html);
        let mut record = ItemRecord::new(source, reference.as_str());

        if let Some(selector) = &self.id_selector {
            let text = document
                .select(selector)
                .next()
                .map(element_text)
                .ok_or_else(|| ItemError::MissingField("id".to_string()))?;
            let id = text
                .split_whitespace()
                .last()
                .ok_or_else(|| ItemError::Malformed {
                    field: "id".to_string(),
                    message: "identifier element is empty".to_string(),
                })?;
            record.id = Some(id.to_string());
        }

        for (name, selector) in &self.fields {
            let values: Vec<String> = document
                .select(selector)
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();

            match values.len() {
                0 if self.required.contains(name) => {
                    return Err(ItemError::MissingField(name.clone()));
                }
                0 => {}
                1 => {
                    record
                        .fields
                        .insert(name.clone(), Value::String(values[0].clone()));
                }
                _ => {
                    let array = values.into_iter().map(Value::String).collect();
                    record.fields.insert(name.clone(), Value::Array(array));
                }
            }
        }

        if let Some(selector) = &self.media_selector {
            let mut seen = HashSet::new();
            record.media = document
                .select(selector)
                .filter_map(|element| element.value().attr(&self.media_attr))
                .filter_map(|src| resolve_link(src, &base_url))
                .filter(|url| seen.insert(url.clone()))
                .collect();
        }

        Ok(record)
    }
}

fn compile(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector)
        .map_err(|e| ConfigError::InvalidSelector(format!("'{}': {:?}", selector, e)))
}

/// Text content with runs of whitespace collapsed to one space
fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fetches item pages over HTTP and applies `ExtractRules`
pub struct SelectorExtractor {
    client: Client,
    rules: ExtractRules,
}

impl SelectorExtractor {
    pub fn new(client: Client, rules: ExtractRules) -> Self {
        Self { client, rules }
    }
}

#[async_trait]
impl ItemProcessor for SelectorExtractor {
    async fn process(
        &self,
        source: &str,
        reference: &ItemReference,
    ) -> Result<ProcessedItem, ItemError> {
        let html = match fetch_text(&self.client, reference.as_str()).await {
            Ok(html) => html,
            Err(e) if e.is_gone() => {
                return Ok(ProcessedItem::Skipped(format!("listing removed: {}", e)));
            }
            Err(e) => return Err(e.into()),
        };

        self.rules
            .extract(source, reference, &html)
            .map(ProcessedItem::Extracted)
    }
}
