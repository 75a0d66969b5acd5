use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for the harvester
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

/// Orchestration behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Consecutive failed page advances (or listings) before a source is abandoned
    #[serde(rename = "max-advance-attempts", default = "default_max_advance_attempts")]
    pub max_advance_attempts: u32,

    /// Delay between advance attempts (milliseconds)
    #[serde(rename = "retry-delay-ms", default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Upper bound on every network-bound pipeline call (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of ledger writes between automatic flushes
    #[serde(rename = "flush-every", default = "default_flush_every")]
    pub flush_every: u32,

    /// Whether references that failed in an earlier run are attempted again
    #[serde(rename = "retry-failed", default)]
    pub retry_failed: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_advance_attempts: default_max_advance_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            flush_every: default_flush_every(),
            retry_failed: false,
        }
    }
}

fn default_max_advance_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_flush_every() -> u32 {
    5
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite ledger database
    #[serde(rename = "ledger-path")]
    pub ledger_path: String,

    /// Path to the SQLite database receiving extracted records
    #[serde(rename = "records-path")]
    pub records_path: String,

    /// Root directory for downloaded media
    #[serde(rename = "images-dir")]
    pub images_dir: String,
}

/// Media download configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_media_enabled")]
    pub enabled: bool,

    /// Maximum number of simultaneous media downloads across all sources
    #[serde(rename = "max-concurrent-downloads", default = "default_max_downloads")]
    pub max_concurrent_downloads: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            enabled: default_media_enabled(),
            max_concurrent_downloads: default_max_downloads(),
        }
    }
}

fn default_media_enabled() -> bool {
    true
}

fn default_max_downloads() -> u32 {
    8
}

/// How a source exposes its item references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Numbered listing pages (`?page=N`)
    Paged,
    /// A single sitemap.xml enumerating every item
    Sitemap,
}

/// One listing source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Source tag used as the ledger key and media directory
    pub name: String,

    pub kind: SourceKind,

    /// Listing URL (paged) or sitemap URL (sitemap)
    pub url: String,

    /// Query parameter carrying the page number
    #[serde(rename = "page-param", default = "default_page_param")]
    pub page_param: String,

    /// CSS selector for item links on a listing page
    #[serde(rename = "item-link-selector", default = "default_item_link_selector")]
    pub item_link_selector: String,

    /// Item links must contain every one of these substrings
    #[serde(rename = "link-contains", default)]
    pub link_contains: Vec<String>,

    /// Regular expression item links must match, e.g. `-d\d+$`
    #[serde(rename = "link-pattern")]
    pub link_pattern: Option<String>,

    /// Field name to CSS selector
    #[serde(default)]
    pub fields: BTreeMap<String, String>,

    /// Selector whose text ends with the listing identifier
    #[serde(rename = "id-selector")]
    pub id_selector: Option<String>,

    /// Fields whose absence fails the item
    #[serde(rename = "required-fields", default)]
    pub required_fields: Vec<String>,

    /// Selector for media elements
    #[serde(rename = "media-selector")]
    pub media_selector: Option<String>,

    /// Attribute of media elements holding the URL
    #[serde(rename = "media-attr", default = "default_media_attr")]
    pub media_attr: String,
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_item_link_selector() -> String {
    "a[href]".to_string()
}

fn default_media_attr() -> String {
    "src".to_string()
}
