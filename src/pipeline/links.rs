//! Item link extraction for listing pages and sitemaps
//!
//! This module turns a fetched listing page (or sitemap) into the ordered,
//! de-duplicated list of item references it exposes.

use crate::pipeline::ItemReference;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Conditions an item link must satisfy
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    /// Substrings that must all be present
    pub contains: Vec<String>,

    /// Regular expression the link must match
    pub pattern: Option<Regex>,
}

impl LinkFilter {
    pub fn matches(&self, link: &str) -> bool {
        if !self.contains.iter().all(|needle| link.contains(needle.as_str())) {
            return false;
        }

        self.pattern
            .as_ref()
            .map_or(true, |pattern| pattern.is_match(link))
    }
}

/// Extracts item links from a listing page
///
/// Links are taken from the `href` of every element matching `selector`,
/// resolved against `page_url`, filtered, and de-duplicated keeping the
/// first occurrence so page order is preserved.
pub fn extract_item_links(
    html: &str,
    page_url: &Url,
    selector: &Selector,
    filter: &LinkFilter,
) -> Vec<ItemReference> {
    let document = Html::parse_document(html);

    let hrefs = document
        .select(selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, page_url));

    dedup_filtered(hrefs, filter)
}

/// Extracts `<loc>` entries from a sitemap document
pub fn extract_sitemap_locs(xml: &str, filter: &LinkFilter) -> Vec<ItemReference> {
    let document = Html::parse_document(xml);
    let Ok(loc_selector) = Selector::parse("loc") else {
        return Vec::new();
    };

    let locs = document
        .select(&loc_selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|loc| !loc.is_empty());

    dedup_filtered(locs, filter)
}

fn dedup_filtered(links: impl Iterator<Item = String>, filter: &LinkFilter) -> Vec<ItemReference> {
    let mut seen = HashSet::new();
    links
        .filter(|link| filter.matches(link))
        .filter(|link| seen.insert(link.clone()))
        .map(ItemReference::from)
        .collect()
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" {
        Some(absolute_url.to_string())
    } else {
        None
    }
}
