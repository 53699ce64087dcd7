//! TTL-bounded cache of the destination's current records.
//!
//! The cache file is plain JSON keyed by a SHA-256 of the endpoint identity.
//! A hit within the TTL skips the network entirely; a refresh replaces the
//! whole snapshot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::retry::{RetryPolicy, run_with_retry};
use crate::error::{AppError, Result};
use crate::models::{CacheConfig, Snapshot, SnapshotEntry};
use crate::services::{DestinationClient, Page};
use crate::storage::LocalStorage;
use crate::utils::RateGate;

/// Upper bound on pages walked in one refresh.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    timestamp: DateTime<Utc>,
    ttl_seconds: u64,
    endpoint: String,
    data: Vec<SnapshotEntry>,
}

/// Destination snapshot with a file-backed TTL cache.
pub struct SnapshotCache {
    client: Arc<dyn DestinationClient>,
    storage: LocalStorage,
    ttl: Duration,
    disabled: bool,
    page_size: usize,
    max_pages: usize,
    policy: RetryPolicy,
    gate: Arc<RateGate>,
}

impl SnapshotCache {
    pub fn new(
        client: Arc<dyn DestinationClient>,
        config: &CacheConfig,
        page_size: usize,
        policy: RetryPolicy,
        gate: Arc<RateGate>,
    ) -> Self {
        Self {
            client,
            storage: LocalStorage::new(&config.dir),
            ttl: config.ttl(),
            disabled: config.disabled,
            page_size: page_size.max(1),
            max_pages: MAX_PAGES,
            policy,
            gate,
        }
    }

    /// Cache file key for the client's endpoint.
    fn cache_key(&self) -> String {
        let digest = Sha256::digest(self.client.endpoint_id().as_bytes());
        format!("snapshot_{}.json", &hex::encode(digest)[..16])
    }

    /// Current snapshot, from cache when fresh unless `force_refresh`.
    pub async fn get(&self, force_refresh: bool) -> Result<Snapshot> {
        self.get_at(Utc::now(), force_refresh).await
    }

    async fn get_at(&self, now: DateTime<Utc>, force_refresh: bool) -> Result<Snapshot> {
        if !self.disabled && !force_refresh {
            if let Some(cached) = self.read_fresh(now).await {
                log::info!("Using cached snapshot ({} records)", cached.len());
                return Ok(index(cached));
            }
        }

        let entries = self.fetch_all().await?;
        log::info!("Fetched {} destination records", entries.len());

        if !self.disabled {
            let file = CacheFile {
                timestamp: now,
                ttl_seconds: self.ttl.as_secs(),
                endpoint: self.client.endpoint_id(),
                data: entries,
            };
            self.storage
                .write_json(&self.cache_key(), &file)
                .await
                .map_err(|e| AppError::snapshot(format!("cache write failed: {e}")))?;
            return Ok(index(file.data));
        }
        Ok(index(entries))
    }

    /// Cached entries if present, for this endpoint, and younger than the TTL.
    async fn read_fresh(&self, now: DateTime<Utc>) -> Option<Vec<SnapshotEntry>> {
        let file: CacheFile = match self.storage.read_json(&self.cache_key()).await {
            Ok(Some(file)) => file,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Ignoring unreadable snapshot cache: {e}");
                return None;
            }
        };

        if file.endpoint != self.client.endpoint_id() {
            return None;
        }
        let age = now.signed_duration_since(file.timestamp).to_std().ok()?;
        (age < self.ttl).then_some(file.data)
    }

    async fn fetch_all(&self) -> Result<Vec<SnapshotEntry>> {
        let mut entries = Vec::new();

        for page in 1..=self.max_pages {
            let attempted = run_with_retry(&self.policy, &self.gate, || {
                self.client.list_page(page, self.page_size)
            })
            .await;

            match attempted.result {
                Ok(Page::OutOfRange) => return Ok(entries),
                Ok(Page::Items { received: 0, .. }) => return Ok(entries),
                Ok(Page::Items { entries: batch, .. }) => {
                    log::debug!("Snapshot page {page}: {} records", batch.len());
                    entries.extend(batch);
                }
                Err(e) => {
                    return Err(AppError::snapshot(format!(
                        "page {page} failed after {} attempt(s): {e}",
                        attempted.attempts
                    )));
                }
            }
        }

        log::warn!(
            "Snapshot stopped at the {}-page limit; the destination may hold more records",
            self.max_pages
        );
        Ok(entries)
    }
}

/// Key entries by source URL; the first entry for a URL wins.
fn index(entries: Vec<SnapshotEntry>) -> Snapshot {
    let mut snapshot = Snapshot::with_capacity(entries.len());
    for entry in entries {
        if snapshot.contains_key(&entry.source_url) {
            log::debug!("Duplicate destination record for {}", entry.source_url);
            continue;
        }
        snapshot.insert(entry.source_url.clone(), entry);
    }
    snapshot
}
