//! Enrichment scheduler.
//!
//! At most `max_concurrency` records are in flight at once. Every fetch
//! passes one shared [`RateGate`], so the pacing applies to the pool as a
//! whole. Per-record failures are recorded and the record is carried forward
//! unenriched.

use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::retry::{RetryPolicy, run_with_retry};
use crate::models::{EnrichedRecord, RawRecord};
use crate::services::{FetchError, SourceConnector};
use crate::utils::RateGate;

/// Failure classification for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Detail page permanently gone
    NotFound,
    /// Detail page present but unusable
    Malformed,
    /// Transient failures until the attempt ceiling
    RetriesExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&FetchError> for EnrichmentFailure {
    fn from(error: &FetchError) -> Self {
        let kind = match error {
            FetchError::NotFound => FailureKind::NotFound,
            FetchError::Malformed(_) => FailureKind::Malformed,
            _ => FailureKind::RetriesExhausted,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    /// Enriched on success, the unenriched record otherwise
    pub record: EnrichedRecord,
    pub success: bool,
    pub error: Option<EnrichmentFailure>,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Progress event emitted after every completed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentProgress {
    pub completed: usize,
    pub total: usize,
    pub source_url: String,
    pub success: bool,
}

/// Everything one `enrich` call produced.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    /// Completed units in input order
    pub results: Vec<EnrichmentResult>,
    /// Cancellation stopped the pool before the queue drained
    pub cancelled: bool,
    pub not_started: usize,
}

impl EnrichmentReport {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }

    /// Records for diffing, enriched or carried forward.
    pub fn into_records(self) -> Vec<EnrichedRecord> {
        self.results.into_iter().map(|r| r.record).collect()
    }
}

/// Bounded-concurrency detail fetcher.
pub struct EnrichmentScheduler {
    connector: Arc<dyn SourceConnector>,
    policy: RetryPolicy,
    gate: Arc<RateGate>,
    max_concurrency: usize,
}

impl EnrichmentScheduler {
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        policy: RetryPolicy,
        gate: Arc<RateGate>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            connector,
            policy,
            gate,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Enrich every record, stopping early on cancellation.
    ///
    /// In-flight units always run to completion, retries included;
    /// cancellation only prevents new units from starting.
    pub async fn enrich(
        &self,
        records: Vec<RawRecord>,
        cancel: &CancellationToken,
        progress: Option<UnboundedSender<EnrichmentProgress>>,
    ) -> EnrichmentReport {
        let total = records.len();
        let mut units = stream::iter(records.into_iter().enumerate())
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|(index, raw)| async move { (index, self.enrich_one(raw).await) })
            .buffer_unordered(self.max_concurrency);

        let mut indexed: Vec<(usize, EnrichmentResult)> = Vec::with_capacity(total);
        while let Some((index, result)) = units.next().await {
            if let Some(tx) = &progress {
                // receiver gone means nobody is watching
                let _ = tx.send(EnrichmentProgress {
                    completed: indexed.len() + 1,
                    total,
                    source_url: result.record.source_url().to_string(),
                    success: result.success,
                });
            }
            indexed.push((index, result));
        }
        indexed.sort_by_key(|(index, _)| *index);

        let not_started = total - indexed.len();
        EnrichmentReport {
            results: indexed.into_iter().map(|(_, r)| r).collect(),
            cancelled: not_started > 0,
            not_started,
        }
    }

    async fn enrich_one(&self, raw: RawRecord) -> EnrichmentResult {
        let started = Instant::now();
        let connector = &self.connector;
        let url = raw.source_url.as_str();

        let attempted =
            run_with_retry(&self.policy, &self.gate, || connector.fetch_details(url)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match attempted.result {
            Ok(details) => EnrichmentResult {
                record: EnrichedRecord::merge(raw, details),
                success: true,
                error: None,
                attempts: attempted.attempts,
                duration_ms,
            },
            Err(error) => {
                log::warn!(
                    "Failed to enrich {} after {} attempt(s): {}",
                    raw.title,
                    attempted.attempts,
                    error
                );
                EnrichmentResult {
                    error: Some(EnrichmentFailure::from(&error)),
                    record: EnrichedRecord::unenriched(raw),
                    success: false,
                    attempts: attempted.attempts,
                    duration_ms,
                }
            }
        }
    }
}
