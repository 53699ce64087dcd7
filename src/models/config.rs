//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use super::{CareType, Partition};
use crate::error::{AppError, Result};

/// Hard ceiling for listing pages fetched per partition.
pub const MAX_PAGES_CAP: usize = 500;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP, pacing and retry behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Listing source site
    #[serde(default)]
    pub source: SourceConfig,

    /// Destination content system
    #[serde(default)]
    pub destination: DestinationConfig,

    /// Destination snapshot cache
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Care-type vocabulary tables
    #[serde(default)]
    pub canonical: CanonicalConfig,

    /// Title moderation
    #[serde(default)]
    pub moderation: ModerationConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Apply `SYNC_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!("Ignoring {key}={raw:?}: not a valid number");
                    None
                }
            }
        }

        if let Some(v) = parsed(&lookup, "SYNC_MAX_CONCURRENT") {
            self.crawler.max_concurrent = v;
        }
        if let Some(v) = parsed(&lookup, "SYNC_REQUEST_DELAY_MS") {
            self.crawler.request_delay_ms = v;
        }
        if let Some(v) = parsed(&lookup, "SYNC_TIMEOUT_SECS") {
            self.crawler.timeout_secs = v;
        }
        if let Some(v) = parsed(&lookup, "SYNC_CACHE_TTL_SECONDS") {
            self.cache.ttl_secs = v;
        }
        if lookup("SYNC_CACHE_DISABLE").is_some_and(|v| v.trim() == "1") {
            self.cache.disabled = true;
        }
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.max_attempts == 0 {
            return Err(AppError::validation("crawler.max_attempts must be > 0"));
        }
        if self.destination.page_size == 0 {
            return Err(AppError::validation("destination.page_size must be > 0"));
        }
        if self.source.partitions.is_empty() {
            return Err(AppError::validation("No partitions defined"));
        }

        let mut seen = HashSet::new();
        for partition in &self.source.partitions {
            if partition.key.trim().is_empty() {
                return Err(AppError::validation("Partition key is empty"));
            }
            if !seen.insert(partition.key.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate partition key '{}'",
                    partition.key
                )));
            }
        }

        for pattern in &self.moderation.blocklist_patterns {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| {
                    AppError::validation(format!("Invalid blocklist pattern '{pattern}': {e}"))
                })?;
        }
        Ok(())
    }
}

/// HTTP client, pacing and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Per-request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Minimum gap between any two request starts, across all workers
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Enrichment worker count
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Attempts per unit of work, first try included
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "defaults::backoff_max")]
    pub backoff_max_ms: u64,

    /// Listing pages per partition (0 = until an empty page)
    #[serde(default)]
    pub max_pages_per_partition: usize,
}

impl CrawlerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Effective page limit, with 0 meaning the hard cap.
    pub fn page_limit(&self) -> usize {
        match self.max_pages_per_partition {
            0 => MAX_PAGES_CAP,
            n => n.min(MAX_PAGES_CAP),
        }
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            request_delay_ms: defaults::request_delay(),
            max_concurrent: defaults::max_concurrent(),
            max_attempts: defaults::max_attempts(),
            backoff_base_ms: defaults::backoff_base(),
            backoff_max_ms: defaults::backoff_max(),
            max_pages_per_partition: 0,
        }
    }
}

/// Listing source site settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "defaults::source_base_url")]
    pub base_url: String,

    /// Listing page path; `{partition}` and `{page}` are substituted
    #[serde(default = "defaults::source_listing_path")]
    pub listing_path: String,

    /// Login form path; no login when absent
    #[serde(default)]
    pub login_path: Option<String>,

    /// Name of the env var holding the login user
    #[serde(default = "defaults::source_username_env")]
    pub username_env: String,

    /// Name of the env var holding the login password
    #[serde(default = "defaults::source_password_env")]
    pub password_env: String,

    #[serde(default = "defaults::partitions")]
    pub partitions: Vec<Partition>,

    #[serde(default)]
    pub selectors: SourceSelectors,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::source_base_url(),
            listing_path: defaults::source_listing_path(),
            login_path: None,
            username_env: defaults::source_username_env(),
            password_env: defaults::source_password_env(),
            partitions: defaults::partitions(),
            selectors: SourceSelectors::default(),
        }
    }
}

/// CSS selectors for the HTML source connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSelectors {
    /// One listing card on a partition page
    pub card: String,
    pub title: String,
    pub image: String,
    pub address: String,

    /// Attribute checkbox label (listing and detail pages)
    pub attribute_label: String,
    /// Text node inside an attribute label
    pub attribute_text: String,
    /// Checked input inside an attribute label
    pub attribute_checked: String,

    /// Detail page form label wrapping an input
    pub field_label: String,
    pub description: String,

    /// Detail page path suffix appended to the record URL
    pub detail_suffix: String,
}

impl Default for SourceSelectors {
    fn default() -> Self {
        Self {
            card: "div.flex.space-x-6".into(),
            title: "h3 a".into(),
            image: "img".into(),
            address: "div.text-sm.text-gray-500".into(),
            attribute_label: "label.inline-flex".into(),
            attribute_text: "div.ml-2".into(),
            attribute_checked: "input[type=\"checkbox\"][checked]".into(),
            field_label: "label".into(),
            description: "textarea".into(),
            detail_suffix: "/attributes".into(),
        }
    }
}

/// Destination content system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(default = "defaults::destination_base_url")]
    pub base_url: String,

    #[serde(default = "defaults::destination_listing_path")]
    pub listing_path: String,

    #[serde(default = "defaults::page_size")]
    pub page_size: usize,

    #[serde(default = "defaults::destination_username_env")]
    pub username_env: String,

    #[serde(default = "defaults::destination_password_env")]
    pub password_env: String,
}

impl DestinationConfig {
    /// Endpoint identity used to key the snapshot cache.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.listing_path.trim_start_matches('/')
        )
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::destination_base_url(),
            listing_path: defaults::destination_listing_path(),
            page_size: defaults::page_size(),
            username_env: defaults::destination_username_env(),
            password_env: defaults::destination_password_env(),
        }
    }
}

/// Snapshot cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "defaults::cache_dir")]
    pub dir: PathBuf,

    #[serde(default = "defaults::cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub disabled: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: defaults::cache_dir(),
            ttl_secs: defaults::cache_ttl(),
            disabled: false,
        }
    }
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for per-run directories
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
        }
    }
}

/// Direct label lookup entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeMapping {
    pub label: String,
    pub care_type: CareType,
}

/// Substring rule applied when the direct table misses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRule {
    pub contains: String,
    pub care_type: CareType,
}

/// Care-type vocabulary tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalConfig {
    /// Labels containing any of these are dropped before mapping
    #[serde(default = "defaults::noise_patterns")]
    pub noise_patterns: Vec<String>,

    #[serde(default = "defaults::mappings")]
    pub mappings: Vec<TypeMapping>,

    /// Evaluated top to bottom; first match wins
    #[serde(default = "defaults::fallbacks")]
    pub fallbacks: Vec<FallbackRule>,
}

impl Default for CanonicalConfig {
    fn default() -> Self {
        Self {
            noise_patterns: defaults::noise_patterns(),
            mappings: defaults::mappings(),
            fallbacks: defaults::fallbacks(),
        }
    }
}

/// Title moderation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Case-insensitive regexes matched against titles
    #[serde(default = "defaults::blocklist_patterns")]
    pub blocklist_patterns: Vec<String>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            blocklist_patterns: defaults::blocklist_patterns(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::{FallbackRule, TypeMapping};
    use crate::models::{CareType, Partition};

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; listing-sync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        20
    }
    pub fn request_delay() -> u64 {
        500
    }
    pub fn max_concurrent() -> usize {
        3
    }
    pub fn max_attempts() -> u32 {
        3
    }
    pub fn backoff_base() -> u64 {
        2_000
    }
    pub fn backoff_max() -> u64 {
        30_000
    }

    // Source defaults
    pub fn source_base_url() -> String {
        "https://app.seniorplace.com".into()
    }
    pub fn source_listing_path() -> String {
        "/communities?state={partition}&page={page}".into()
    }
    pub fn source_username_env() -> String {
        "SOURCE_USERNAME".into()
    }
    pub fn source_password_env() -> String {
        "SOURCE_PASSWORD".into()
    }
    pub fn partitions() -> Vec<Partition> {
        [
            ("AZ", "Arizona"),
            ("CA", "California"),
            ("CO", "Colorado"),
            ("ID", "Idaho"),
            ("NM", "New Mexico"),
            ("UT", "Utah"),
        ]
        .into_iter()
        .map(|(key, name)| Partition::new(key, name))
        .collect()
    }

    // Destination defaults
    pub fn destination_base_url() -> String {
        "http://localhost:8080".into()
    }
    pub fn destination_listing_path() -> String {
        "/wp-json/wp/v2/listing".into()
    }
    pub fn page_size() -> usize {
        100
    }
    pub fn destination_username_env() -> String {
        "DESTINATION_USERNAME".into()
    }
    pub fn destination_password_env() -> String {
        "DESTINATION_PASSWORD".into()
    }

    // Cache and paths
    pub fn cache_dir() -> PathBuf {
        PathBuf::from(".cache")
    }
    pub fn cache_ttl() -> u64 {
        3_600
    }
    pub fn output_dir() -> PathBuf {
        PathBuf::from("monthly_updates")
    }

    // Canonical vocabulary
    pub fn noise_patterns() -> Vec<String> {
        [
            "private pay",
            "medicaid",
            "contract",
            "cane",
            "walker",
            "wheelchair",
            "some memory loss",
            "private",
            "shared",
            "studio",
            "one bedroom",
            "two bedroom",
            "bathroom",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub fn mappings() -> Vec<TypeMapping> {
        use CareType::*;
        [
            ("assisted living facility", AssistedLivingCommunity),
            ("assisted living home", AssistedLivingHome),
            ("independent living", IndependentLiving),
            ("memory care", MemoryCare),
            ("skilled nursing", NursingHome),
            ("nursing home", NursingHome),
            ("continuing care retirement community", AssistedLivingCommunity),
            ("ccrc", AssistedLivingCommunity),
            ("in-home care", HomeCare),
            ("home health", HomeCare),
            ("hospice", HomeCare),
            ("respite care", AssistedLivingCommunity),
            ("directed care", AssistedLivingHome),
            ("personal care", AssistedLivingHome),
            ("supervisory care", AssistedLivingHome),
        ]
        .into_iter()
        .map(|(label, care_type)| TypeMapping {
            label: label.into(),
            care_type,
        })
        .collect()
    }

    pub fn fallbacks() -> Vec<FallbackRule> {
        use CareType::*;
        [
            ("assisted living home", AssistedLivingHome),
            ("assisted living", AssistedLivingCommunity),
            ("independent", IndependentLiving),
            ("memory care", MemoryCare),
            ("nursing", NursingHome),
            ("home care", HomeCare),
            ("home health", HomeCare),
            ("in-home care", HomeCare),
        ]
        .into_iter()
        .map(|(contains, care_type)| FallbackRule {
            contains: contains.into(),
            care_type,
        })
        .collect()
    }

    // Moderation
    pub fn blocklist_patterns() -> Vec<String> {
        [
            r"\bdo\s+not\s+refer\b",
            r"\bdo\s+not\s+use\b",
            r"\bnot\s+signing\b",
            r"\bsurgery\b",
            r"\bsurgical\b",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}
