//! HTTP fetcher shared by the reference pipelines
//!
//! This module handles:
//! - Building the HTTP client with the configured user agent and timeouts
//! - GET requests for listing pages, sitemaps and item pages
//! - Classifying failures so callers can decide between retry and skip

use crate::config::UserAgentConfig;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Why a page could not be fetched
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} returned an empty body")]
    EmptyBody { url: String },
}

impl FetchError {
    /// Returns true if the resource is gone for good rather than temporarily unavailable
    pub fn is_gone(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == StatusCode::NOT_FOUND.as_u16() || *status == StatusCode::GONE.as_u16()
        )
    }
}

/// Builds an HTTP client with proper configuration
///
/// The user agent has the form `CrawlerName/Version (+ContactURL)`.
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    let user_agent = format!(
        "{}/{} (+{})",
        config.crawler_name, config.crawler_version, config.contact_url
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page body as text
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx with non-blank body | `Ok(body)` |
/// | 2xx with blank body | `EmptyBody` |
/// | any other status | `Status` |
/// | client timeout | `Timeout` |
/// | connection / TLS / body read failure | `Network` |
pub async fn fetch_text(client: &Client, url: &str) -> Result<String, FetchError> {
    let response = client.get(url).send().await.map_err(|e| classify(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|e| classify(url, e))?;
    if body.trim().is_empty() {
        return Err(FetchError::EmptyBody {
            url: url.to_string(),
        });
    }

    Ok(body)
}

/// Fetches raw bytes (media), treating any non-200 status as an error
pub async fn fetch_bytes(client: &Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await.map_err(|e| classify(url, e))?;

    if response.status() != StatusCode::OK {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    let bytes = response.bytes().await.map_err(|e| classify(url, e))?;
    Ok(bytes.to_vec())
}

fn classify(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
