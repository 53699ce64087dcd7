//! Sync orchestrator.
//!
//! Owns the checkpoint lifecycle for a run: partitions are harvested one at
//! a time and each is marked complete only after its raw records are on
//! disk. Once every partition is harvested the records are deduplicated,
//! moderated, enriched, diffed against the destination snapshot and written
//! out as artifacts.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::diff::{DiffCalculator, DiffOutcome, UpdateReason};
use super::enrich::{EnrichmentProgress, EnrichmentScheduler};
use super::output::{ArtifactStore, FailureRecord};
use super::retry::{RetryPolicy, run_with_retry};
use super::snapshot::SnapshotCache;
use crate::canonical::Canonicalizer;
use crate::error::{AppError, Result};
use crate::models::{Checkpoint, Config, Partition, RawRecord, RunStatus, RunSummary};
use crate::services::{DestinationClient, ModerationPolicy, SourceConnector};
use crate::storage::layout::{in_run, raw_location};
use crate::storage::{CheckpointStore, LocalStorage};
use crate::utils::RateGate;
use crate::utils::log as console;

const TOTAL_STEPS: usize = 5;

/// Options for one `run` call.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume this run instead of starting a fresh one
    pub resume: Option<String>,
    /// Ignore a fresh snapshot cache
    pub refresh_snapshot: bool,
    /// Fixed id for a fresh run; defaults to the local start time
    pub run_id: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Stopped on request; the checkpoint is saved and the run can be resumed
    Cancelled { run_id: String },
}

/// Records that survived deduplication and moderation.
struct Admitted {
    records: Vec<RawRecord>,
    duplicates: usize,
    skipped: usize,
}

/// Drives one crawl-diff-sync run end to end.
pub struct SyncPipeline {
    config: Arc<Config>,
    source: Arc<dyn SourceConnector>,
    destination: Arc<dyn DestinationClient>,
    moderation: Arc<dyn ModerationPolicy>,
    storage: LocalStorage,
    checkpoints: CheckpointStore,
    artifacts: ArtifactStore,
    canonicalizer: Canonicalizer,
    policy: RetryPolicy,
    gate: Arc<RateGate>,
}

impl SyncPipeline {
    pub fn new(
        config: Arc<Config>,
        source: Arc<dyn SourceConnector>,
        destination: Arc<dyn DestinationClient>,
        moderation: Arc<dyn ModerationPolicy>,
    ) -> Result<Self> {
        let storage = LocalStorage::new(&config.paths.output_dir);
        let canonicalizer = Canonicalizer::new(&config.canonical)?;
        let policy = RetryPolicy::from_config(&config.crawler);
        let gate = Arc::new(RateGate::new(config.crawler.request_delay()));

        Ok(Self {
            checkpoints: CheckpointStore::new(storage.clone()),
            artifacts: ArtifactStore::new(storage.clone()),
            storage,
            canonicalizer,
            policy,
            gate,
            config,
            source,
            destination,
            moderation,
        })
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Run every phase, or resume an interrupted run.
    ///
    /// A resume request whose checkpoint cannot be read fails before any
    /// work starts.
    pub async fn run(
        &self,
        options: RunOptions,
        cancel: &CancellationToken,
        progress: Option<UnboundedSender<EnrichmentProgress>>,
    ) -> Result<RunOutcome> {
        let mut checkpoint = self.prepare_checkpoint(&options).await?;
        let run_id = checkpoint.run_id.clone();
        console::header(&format!("Listing sync run {run_id}"));

        // 1. Harvest
        console::step(1, TOTAL_STEPS, "Harvesting partitions");
        if !self.harvest(&mut checkpoint, cancel).await? {
            log::warn!("Cancelled during harvest; resume with --resume {run_id}");
            return Ok(RunOutcome::Cancelled { run_id });
        }

        let admitted = self.admit(self.load_raw_records(&checkpoint).await?);
        console::sub_item(&format!(
            "{} records admitted ({} duplicates, {} blocked)",
            admitted.records.len(),
            admitted.duplicates,
            admitted.skipped
        ));

        // 2. Snapshot
        console::step(2, TOTAL_STEPS, "Loading destination snapshot");
        let snapshot = SnapshotCache::new(
            Arc::clone(&self.destination),
            &self.config.cache,
            self.config.destination.page_size,
            self.policy.clone(),
            Arc::clone(&self.gate),
        )
        .get(options.refresh_snapshot)
        .await?;
        console::sub_item(&format!("{} destination records", snapshot.len()));

        // 3. Enrich
        console::step(3, TOTAL_STEPS, "Enriching records");
        let scheduler = EnrichmentScheduler::new(
            Arc::clone(&self.source),
            self.policy.clone(),
            Arc::clone(&self.gate),
            self.config.crawler.max_concurrent,
        );
        let report = scheduler.enrich(admitted.records, cancel, progress).await;
        if report.cancelled {
            self.checkpoints.save(&checkpoint).await?;
            log::warn!(
                "Cancelled during enrichment ({} not started); resume with --resume {run_id}",
                report.not_started
            );
            return Ok(RunOutcome::Cancelled { run_id });
        }
        let failures: Vec<FailureRecord> = report
            .results
            .iter()
            .filter(|r| !r.success)
            .map(FailureRecord::from)
            .collect();
        let failed = report.failed();
        console::sub_item(&format!(
            "{} enriched, {failed} failed",
            report.results.len() - failed
        ));

        // 4. Diff
        console::step(4, TOTAL_STEPS, "Classifying against snapshot");
        let records = report.into_records();
        let diff = DiffCalculator::new(self.canonicalizer.clone()).calculate(&records, &snapshot);
        if !diff.has_changes() {
            console::sub_item("No new or updated listings");
        }

        // 5. Artifacts
        console::step(5, TOTAL_STEPS, "Writing artifacts");
        let summary = RunSummary {
            failed,
            skipped: admitted.skipped,
            duplicates: admitted.duplicates,
            total_processed: records.len(),
            ..summarize(&run_id, &diff)
        };
        self.artifacts
            .write(&run_id, &diff, &failures, &summary)
            .await?;

        checkpoint.status = Some(RunStatus::Complete);
        self.checkpoints.save(&checkpoint).await?;

        report_summary(&summary);
        Ok(RunOutcome::Completed(summary))
    }

    async fn prepare_checkpoint(&self, options: &RunOptions) -> Result<Checkpoint> {
        let Some(run_id) = &options.resume else {
            let run_id = options
                .run_id
                .clone()
                .unwrap_or_else(|| Local::now().format("%Y%m%d_%H%M%S").to_string());
            let checkpoint = Checkpoint::new(run_id, &self.config.source.partitions);
            self.checkpoints.save(&checkpoint).await?;
            return Ok(checkpoint);
        };

        let mut checkpoint = self.checkpoints.load_for_resume(run_id).await?;
        if checkpoint.is_complete() {
            log::info!("Run {run_id} already complete; re-running downstream phases");
        }
        self.requeue_missing_raw(&mut checkpoint).await;
        checkpoint.status = Some(RunStatus::InProgress);
        self.checkpoints.save(&checkpoint).await?;

        log::info!(
            "Resuming {run_id}: {} partition(s) done, {} remaining",
            checkpoint.partitions_completed.len(),
            checkpoint.partitions_remaining.len()
        );
        Ok(checkpoint)
    }

    /// Completed partitions whose raw file is gone or unreadable go back in the queue.
    async fn requeue_missing_raw(&self, checkpoint: &mut Checkpoint) {
        let completed: Vec<String> = checkpoint.partitions_completed.iter().cloned().collect();
        for key in completed {
            let readable = match checkpoint.raw_record_locations.get(&key) {
                Some(location) => matches!(
                    self.storage
                        .read_json::<Vec<RawRecord>>(&in_run(&checkpoint.run_id, location))
                        .await,
                    Ok(Some(_))
                ),
                None => false,
            };
            if !readable {
                log::warn!("Raw records for {key} missing or unreadable; re-harvesting");
                checkpoint.requeue(&key);
            }
        }
    }

    /// Harvest every remaining partition. Returns `false` when cancelled.
    ///
    /// A partition already being fetched is finished, retries included,
    /// before cancellation is honored.
    async fn harvest(&self, checkpoint: &mut Checkpoint, cancel: &CancellationToken) -> Result<bool> {
        let queue: Vec<Partition> = checkpoint
            .partitions_remaining
            .iter()
            .map(|key| self.partition(key))
            .collect();
        // pages are paced by the connector through the shared gate
        let unpaced = RateGate::unpaced();

        for partition in queue {
            if cancel.is_cancelled() {
                self.checkpoints.save(checkpoint).await?;
                return Ok(false);
            }

            let attempted = run_with_retry(&self.policy, &unpaced, || {
                self.source.fetch_partition(&partition, &self.gate)
            })
            .await;

            let records = match attempted.result {
                Ok(records) => records,
                Err(e) => {
                    self.checkpoints.save(checkpoint).await?;
                    return Err(AppError::source(
                        format!("partition {}", partition.key),
                        format!("{e} after {} attempt(s)", attempted.attempts),
                    ));
                }
            };

            let location = raw_location(&partition.key);
            self.storage
                .write_json(&in_run(&checkpoint.run_id, &location), &records)
                .await?;
            *checkpoint = checkpoint
                .clone()
                .mark_partition_complete(&partition.key, location);
            self.checkpoints.save(checkpoint).await?;

            console::sub_item(&format!(
                "{}: {} records",
                partition.display_name,
                records.len()
            ));
        }
        Ok(true)
    }

    /// Configured partition for a key, or a bare one if the config no longer lists it.
    fn partition(&self, key: &str) -> Partition {
        self.config
            .source
            .partitions
            .iter()
            .find(|p| p.key == key)
            .cloned()
            .unwrap_or_else(|| Partition::new(key, key))
    }

    /// All persisted raw records, in partition key order.
    async fn load_raw_records(&self, checkpoint: &Checkpoint) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for (key, location) in &checkpoint.raw_record_locations {
            let path = in_run(&checkpoint.run_id, location);
            let batch: Vec<RawRecord> = self.storage.read_json(&path).await?.ok_or_else(|| {
                AppError::source(format!("partition {key}"), format!("{path} disappeared"))
            })?;
            records.extend(batch);
        }
        Ok(records)
    }

    /// Collapse duplicate URLs (first wins) and drop blocked titles.
    fn admit(&self, records: Vec<RawRecord>) -> Admitted {
        let mut seen = HashSet::new();
        let mut admitted = Admitted {
            records: Vec::with_capacity(records.len()),
            duplicates: 0,
            skipped: 0,
        };

        for record in records {
            if !seen.insert(record.source_url.clone()) {
                admitted.duplicates += 1;
                continue;
            }
            if self.moderation.is_blocked(&record.title) {
                log::debug!("Blocked by moderation: {}", record.title);
                admitted.skipped += 1;
                continue;
            }
            admitted.records.push(record);
        }
        admitted
    }
}

/// Diff-derived counters; the caller fills in the enrichment and admission counts.
fn summarize(run_id: &str, diff: &DiffOutcome) -> RunSummary {
    RunSummary {
        run_id: run_id.to_string(),
        new: diff.new.len(),
        updated: diff.updated.len(),
        price_updates: diff.count_reason(UpdateReason::Price),
        type_updates: diff.count_reason(UpdateReason::Types),
        description_updates: diff.count_reason(UpdateReason::Description),
        unchanged: diff.unchanged.len(),
        ..RunSummary::default()
    }
}

fn report_summary(summary: &RunSummary) {
    console::separator();
    console::summary(
        &format!("Run {}", summary.run_id),
        &[
            ("new", summary.new.to_string()),
            ("updated", summary.updated.to_string()),
            ("  price", summary.price_updates.to_string()),
            ("  types", summary.type_updates.to_string()),
            ("  description", summary.description_updates.to_string()),
            ("unchanged", summary.unchanged.to_string()),
            ("failed", summary.failed.to_string()),
            ("skipped", summary.skipped.to_string()),
            ("duplicates", summary.duplicates.to_string()),
            ("total processed", summary.total_processed.to_string()),
        ],
    );
}
