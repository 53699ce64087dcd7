//! Persisted run progress.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::Partition;

/// Run lifecycle marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Complete,
}

/// Durable record of which partitions a run has harvested.
///
/// A partition only enters `partitions_completed` together with the
/// location of its persisted raw records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,

    #[serde(default)]
    pub partitions_completed: BTreeSet<String>,

    #[serde(default)]
    pub partitions_remaining: Vec<String>,

    /// Partition key to raw record file, relative to the run directory
    #[serde(default)]
    pub raw_record_locations: BTreeMap<String, String>,

    #[serde(default)]
    pub status: Option<RunStatus>,
}

impl Checkpoint {
    /// Fresh checkpoint with every partition remaining.
    pub fn new(run_id: impl Into<String>, partitions: &[Partition]) -> Self {
        Self {
            run_id: run_id.into(),
            partitions_completed: BTreeSet::new(),
            partitions_remaining: partitions.iter().map(|p| p.key.clone()).collect(),
            raw_record_locations: BTreeMap::new(),
            status: Some(RunStatus::InProgress),
        }
    }

    /// Record a partition as durably harvested.
    #[must_use]
    pub fn mark_partition_complete(mut self, key: &str, location: impl Into<String>) -> Self {
        self.partitions_remaining.retain(|k| k != key);
        self.partitions_completed.insert(key.to_string());
        self.raw_record_locations
            .insert(key.to_string(), location.into());
        self
    }

    /// Move a completed partition back to the queue.
    pub fn requeue(&mut self, key: &str) {
        self.partitions_completed.remove(key);
        self.raw_record_locations.remove(key);
        if !self.is_remaining(key) {
            self.partitions_remaining.push(key.to_string());
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == Some(RunStatus::Complete)
    }

    pub fn is_remaining(&self, key: &str) -> bool {
        self.partitions_remaining.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partitions() -> Vec<Partition> {
        vec![Partition::new("AZ", "Arizona"), Partition::new("UT", "Utah")]
    }

    #[test]
    fn new_checkpoint_queues_everything() {
        let cp = Checkpoint::new("20250101_000000", &partitions());
        assert_eq!(cp.partitions_remaining, vec!["AZ", "UT"]);
        assert!(cp.partitions_completed.is_empty());
        assert_eq!(cp.status, Some(RunStatus::InProgress));
    }

    #[test]
    fn mark_complete_moves_partition_and_records_location() {
        let cp = Checkpoint::new("r", &partitions()).mark_partition_complete("AZ", "raw/AZ.json");
        assert_eq!(cp.partitions_remaining, vec!["UT"]);
        assert!(cp.partitions_completed.contains("AZ"));
        assert_eq!(cp.raw_record_locations["AZ"], "raw/AZ.json");
    }

    #[test]
    fn requeue_reverses_completion_once() {
        let mut cp =
            Checkpoint::new("r", &partitions()).mark_partition_complete("AZ", "raw/AZ.json");
        cp.requeue("AZ");
        cp.requeue("AZ");
        assert_eq!(cp.partitions_remaining, vec!["UT", "AZ"]);
        assert!(cp.partitions_completed.is_empty());
        assert!(cp.raw_record_locations.is_empty());
    }

    #[test]
    fn status_serializes_snake_case() {
        let mut cp = Checkpoint::new("r", &partitions());
        cp.status = Some(RunStatus::Complete);
        let json = serde_json::to_string(&cp).unwrap();
        assert!(json.contains("\"status\":\"complete\""));
    }
}
