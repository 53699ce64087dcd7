//! End-of-run counters.

use serde::{Deserialize, Serialize};

/// Counts reported at the end of a run.
///
/// `failed`, `skipped` and `unchanged` are always reported separately.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub new: usize,
    pub updated: usize,
    pub price_updates: usize,
    pub type_updates: usize,
    pub description_updates: usize,
    pub unchanged: usize,
    /// Enrichment units that ended in permanent failure
    pub failed: usize,
    /// Records blocked by moderation
    pub skipped: usize,
    /// Duplicate listings collapsed across partitions
    pub duplicates: usize,
    pub total_processed: usize,
}
