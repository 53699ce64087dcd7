//! Pipeline stages for a sync run.
//!
//! - `sync`: orchestrates harvest, snapshot, enrichment, diff and artifacts
//! - `publish`: pushes a finished run's batches to the destination

pub mod diff;
pub mod enrich;
pub mod output;
pub mod publish;
pub mod retry;
pub mod snapshot;
pub mod sync;

pub use diff::{ClassifiedRecord, DiffCalculator, DiffOutcome, DiffResult, UpdateReason, classify};
pub use enrich::{EnrichmentProgress, EnrichmentReport, EnrichmentResult, EnrichmentScheduler};
pub use output::{ArtifactStore, FailureRecord};
pub use publish::{PublishReport, Publisher, publish_run};
pub use retry::RetryPolicy;
pub use snapshot::SnapshotCache;
pub use sync::{RunOptions, RunOutcome, SyncPipeline};

pub use crate::utils::RateGate;
