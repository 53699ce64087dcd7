//! Pushes a finished run's batches to the destination.
//!
//! Publishing is repeatable. Records whose source URL already exists at the
//! destination are updated in place, and a per-run ledger remembers what a
//! previous pass already sent so it is skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::diff::ClassifiedRecord;
use super::output::ArtifactStore;
use super::retry::{RetryPolicy, run_with_retry};
use super::snapshot::SnapshotCache;
use crate::error::Result;
use crate::models::{Config, Snapshot};
use crate::services::{DestinationClient, ListingPayload};
use crate::utils::log as console;
use crate::utils::{RateGate, normalize_price};

/// Counts from one publish pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    /// Already published by an earlier pass of the same run
    pub skipped: usize,
    /// Payloads that would have been sent (dry run only)
    pub planned: usize,
}

/// What earlier publish passes of a run already did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishLedger {
    /// Destination ids of records this run created, by source URL
    #[serde(default)]
    pub created: BTreeMap<String, u64>,
    /// Source URLs published successfully
    #[serde(default)]
    pub completed: BTreeSet<String>,
}

impl PublishLedger {
    pub fn record(&mut self, source_url: &str, destination_id: u64, created: bool) {
        if created {
            self.created.insert(source_url.to_string(), destination_id);
        }
        self.completed.insert(source_url.to_string());
    }

    pub fn is_done(&self, source_url: &str) -> bool {
        self.completed.contains(source_url)
    }
}

/// Destination body for a classified record.
pub fn payload(record: &ClassifiedRecord) -> ListingPayload {
    let raw = &record.record.raw;
    let address = &record.canonical.normalized_address;
    ListingPayload {
        destination_id: record.destination_id,
        source_url: raw.source_url.clone(),
        title: raw.title.trim().to_string(),
        address: address.full(),
        city: address.city.clone(),
        region: address.region.clone(),
        postal: address.postal.clone(),
        price: normalize_price(&record.record.price_primary),
        care_types: record.canonical.canonical_types.clone(),
        description: record.record.description.trim().to_string(),
        image_url: raw.image_url.clone(),
    }
}

/// Point records without a destination id at an existing destination record
/// with the same source URL. Returns how many were matched.
pub fn adopt_existing(records: &mut [ClassifiedRecord], snapshot: &Snapshot) -> usize {
    let mut adopted = 0;
    for record in records.iter_mut().filter(|r| r.destination_id.is_none()) {
        if let Some(existing) = snapshot.get(&record.record.raw.source_url) {
            record.destination_id = Some(existing.destination_id);
            adopted += 1;
        }
    }
    adopted
}

/// Bounded-concurrency create/update calls.
pub struct Publisher {
    client: Arc<dyn DestinationClient>,
    policy: RetryPolicy,
    gate: Arc<RateGate>,
    concurrency: usize,
}

impl Publisher {
    pub fn new(
        client: Arc<dyn DestinationClient>,
        policy: RetryPolicy,
        gate: Arc<RateGate>,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            policy,
            gate,
            concurrency: concurrency.max(1),
        }
    }

    /// Send every record the ledger has not seen; successes are added to it.
    pub async fn publish(
        &self,
        records: &[ClassifiedRecord],
        dry_run: bool,
        ledger: &mut PublishLedger,
    ) -> PublishReport {
        let mut report = PublishReport::default();
        let mut pending = Vec::with_capacity(records.len());
        for record in records {
            let mut body = payload(record);
            if ledger.is_done(&body.source_url) {
                report.skipped += 1;
                continue;
            }
            if body.destination_id.is_none() {
                body.destination_id = ledger.created.get(&body.source_url).copied();
            }
            pending.push(body);
        }

        if dry_run {
            for body in &pending {
                log::info!(
                    "[dry-run] {} {} ({})",
                    if body.destination_id.is_some() { "update" } else { "create" },
                    body.title,
                    body.source_url
                );
            }
            report.planned = pending.len();
            return report;
        }

        let mut results = stream::iter(pending)
            .map(|body| async move {
                let attempted = run_with_retry(&self.policy, &self.gate, || {
                    self.client.create_or_update(&body)
                })
                .await;
                (body, attempted.result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((body, result)) = results.next().await {
            match result {
                Ok(id) if body.destination_id.is_some() => {
                    log::debug!("Updated {} ({id})", body.source_url);
                    ledger.record(&body.source_url, id, false);
                    report.updated += 1;
                }
                Ok(id) => {
                    log::debug!("Created {} ({id})", body.source_url);
                    ledger.record(&body.source_url, id, true);
                    report.created += 1;
                }
                Err(error) => {
                    log::warn!("Failed to publish {}: {}", body.source_url, error);
                    report.failed += 1;
                }
            }
        }
        report
    }
}

/// Push a finished run's New and Updated batches to the destination.
///
/// The destination is re-read first so records created since the run was
/// diffed are updated rather than duplicated.
pub async fn publish_run(
    config: &Config,
    artifacts: &ArtifactStore,
    client: Arc<dyn DestinationClient>,
    run_id: &str,
    dry_run: bool,
) -> Result<PublishReport> {
    let (new, updated) = artifacts.read_batches(run_id).await?;
    let mut batch: Vec<_> = new.into_iter().chain(updated).collect();
    console::header(&format!("Publishing run {run_id} ({} records)", batch.len()));

    let policy = RetryPolicy::from_config(&config.crawler);
    let gate = Arc::new(RateGate::new(config.crawler.request_delay()));

    let snapshot = SnapshotCache::new(
        Arc::clone(&client),
        &config.cache,
        config.destination.page_size,
        policy.clone(),
        Arc::clone(&gate),
    )
    .get(true)
    .await?;
    let adopted = adopt_existing(&mut batch, &snapshot);
    if adopted > 0 {
        log::info!("{adopted} new record(s) already exist at the destination; updating instead");
    }

    let mut ledger = artifacts.read_ledger(run_id).await?;
    let publisher = Publisher::new(client, policy, gate, config.crawler.max_concurrent);
    let report = publisher.publish(&batch, dry_run, &mut ledger).await;
    if !dry_run {
        artifacts.write_ledger(run_id, &ledger).await?;
    }

    console::summary(
        "Publish",
        &[
            ("created", report.created.to_string()),
            ("updated", report.updated.to_string()),
            ("failed", report.failed.to_string()),
            ("skipped", report.skipped.to_string()),
            ("planned", report.planned.to_string()),
        ],
    );
    Ok(report)
}
