//! External collaborators of the sync engine.
//!
//! This module defines the seams the pipeline talks through:
//! - `SourceConnector`: partition listings and detail pages
//! - `DestinationClient`: paginated snapshot reads and create/update writes
//! - `ModerationPolicy`: title blocklist predicate
//!
//! plus the HTTP implementations used by the CLI.

mod destination;
mod moderation;
mod source;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{CareType, DetailFields, Partition, RawRecord, SnapshotEntry};
use crate::utils::RateGate;

pub use destination::HttpDestinationClient;
pub use moderation::TitleBlocklist;
pub use source::HttpSourceConnector;

/// Per-request failure classification.
///
/// Only `Transient`, `Timeout` and `RateLimited` are retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited by remote")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found")]
    NotFound,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Transient(_) | FetchError::Timeout | FetchError::RateLimited { .. }
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, retry_after: Option<Duration>) -> Self {
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited { retry_after },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchError::Timeout,
            s if s.is_server_error() => FetchError::Transient(format!("HTTP {s}")),
            s => FetchError::Malformed(format!("unexpected HTTP {s}")),
        }
    }
}

/// Pass a success response through; classify anything else.
///
/// A `Retry-After` header in seconds becomes the rate-limit hint.
pub(crate) fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    Err(FetchError::from_status(status, retry_after))
}

impl From<reqwest::Error> for FetchError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = error.status() {
            FetchError::from_status(status, None)
        } else if error.is_decode() {
            FetchError::Malformed(error.to_string())
        } else {
            FetchError::Transient(error.to_string())
        }
    }
}

/// Listing source.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// All listings of one partition. Every page request passes `gate`.
    async fn fetch_partition(
        &self,
        partition: &Partition,
        gate: &RateGate,
    ) -> Result<Vec<RawRecord>, FetchError>;

    /// Secondary fields from a record's detail page.
    async fn fetch_details(&self, source_url: &str) -> Result<DetailFields, FetchError>;
}

/// One page of the destination listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Items {
        entries: Vec<SnapshotEntry>,
        /// Records on the page before dropping those without a source URL
        received: usize,
    },
    /// Past the last page
    OutOfRange,
}

impl Page {
    /// A page where every record carried a source URL.
    pub fn items(entries: Vec<SnapshotEntry>) -> Self {
        let received = entries.len();
        Page::Items { entries, received }
    }
}

/// Record body sent to the destination on create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingPayload {
    /// Existing destination record, `None` to create
    pub destination_id: Option<u64>,
    pub source_url: String,
    pub title: String,
    pub address: String,
    pub city: String,
    pub region: String,
    pub postal: String,
    pub price: String,
    pub care_types: BTreeSet<CareType>,
    pub description: String,
    pub image_url: String,
}

/// Destination content system.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Identity of the listing endpoint, used as the cache key.
    fn endpoint_id(&self) -> String;

    /// One page of destination records (1-based).
    async fn list_page(&self, page: usize, page_size: usize) -> Result<Page, FetchError>;

    /// Create or update a record, returning its destination id.
    async fn create_or_update(&self, listing: &ListingPayload) -> Result<u64, FetchError>;
}

/// Title moderation predicate.
pub trait ModerationPolicy: Send + Sync {
    fn is_blocked(&self, title: &str) -> bool;
}
