//! Output batch artifacts of a run.

use serde::{Deserialize, Serialize};

use super::diff::{ClassifiedRecord, DiffOutcome};
use super::enrich::{EnrichmentFailure, EnrichmentResult};
use super::publish::PublishLedger;
use crate::error::{AppError, Result};
use crate::models::RunSummary;
use crate::storage::LocalStorage;
use crate::storage::layout::{
    FAILURES_FILE, NEW_LISTINGS_FILE, PUBLISH_LEDGER_FILE, RUN_SUMMARY_FILE,
    UPDATED_LISTINGS_FILE, in_run,
};

/// One failed enrichment, as written for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source_url: String,
    pub title: String,
    pub attempts: u32,
    pub error: Option<EnrichmentFailure>,
}

impl From<&EnrichmentResult> for FailureRecord {
    fn from(result: &EnrichmentResult) -> Self {
        Self {
            source_url: result.record.source_url().to_string(),
            title: result.record.title().to_string(),
            attempts: result.attempts,
            error: result.error.clone(),
        }
    }
}

/// Reads and writes the per-run artifact files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    storage: LocalStorage,
}

impl ArtifactStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    pub async fn write(
        &self,
        run_id: &str,
        diff: &DiffOutcome,
        failures: &[FailureRecord],
        summary: &RunSummary,
    ) -> Result<()> {
        self.storage
            .write_json(&in_run(run_id, NEW_LISTINGS_FILE), &diff.new)
            .await?;
        self.storage
            .write_json(&in_run(run_id, UPDATED_LISTINGS_FILE), &diff.updated)
            .await?;
        self.storage
            .write_json(&in_run(run_id, FAILURES_FILE), failures)
            .await?;
        // summary last: its presence marks a complete artifact set
        self.storage
            .write_json(&in_run(run_id, RUN_SUMMARY_FILE), summary)
            .await
    }

    pub async fn read_summary(&self, run_id: &str) -> Result<Option<RunSummary>> {
        self.storage.read_json(&in_run(run_id, RUN_SUMMARY_FILE)).await
    }

    /// New and updated batches of a finished run.
    pub async fn read_batches(
        &self,
        run_id: &str,
    ) -> Result<(Vec<ClassifiedRecord>, Vec<ClassifiedRecord>)> {
        if self.read_summary(run_id).await?.is_none() {
            return Err(AppError::validation(format!(
                "run {run_id} has no artifacts; it has not finished"
            )));
        }
        let new = self
            .storage
            .read_json(&in_run(run_id, NEW_LISTINGS_FILE))
            .await?
            .unwrap_or_default();
        let updated = self
            .storage
            .read_json(&in_run(run_id, UPDATED_LISTINGS_FILE))
            .await?
            .unwrap_or_default();
        Ok((new, updated))
    }

    /// Publish ledger of a run; empty before the first publish.
    pub async fn read_ledger(&self, run_id: &str) -> Result<PublishLedger> {
        Ok(self
            .storage
            .read_json(&in_run(run_id, PUBLISH_LEDGER_FILE))
            .await?
            .unwrap_or_default())
    }

    pub async fn write_ledger(&self, run_id: &str, ledger: &PublishLedger) -> Result<()> {
        self.storage
            .write_json(&in_run(run_id, PUBLISH_LEDGER_FILE), ledger)
            .await
    }
}
