//! Checkpoint manager.

use super::LocalStorage;
use super::layout::{CHECKPOINT_FILE, in_run};
use crate::error::{AppError, Result};
use crate::models::Checkpoint;

/// Loads and saves run checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    storage: LocalStorage,
}

impl CheckpointStore {
    pub fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    fn key(run_id: &str) -> String {
        in_run(run_id, CHECKPOINT_FILE)
    }

    /// Load a run's checkpoint, `None` if the run has none.
    ///
    /// A file that exists but cannot be parsed is `CheckpointUnreadable`.
    pub async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let key = Self::key(run_id);
        let path = self.storage.path(&key);
        let Some(bytes) = self
            .storage
            .read_bytes(&key)
            .await
            .map_err(|e| AppError::checkpoint_unreadable(&path, e))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::checkpoint_unreadable(&path, e))
    }

    /// Load a checkpoint the operator asked to resume; absence is an error.
    pub async fn load_for_resume(&self, run_id: &str) -> Result<Checkpoint> {
        self.load(run_id).await?.ok_or_else(|| {
            AppError::checkpoint_unreadable(&self.storage.path(&Self::key(run_id)), "not found")
        })
    }

    /// Atomically overwrite the run's checkpoint.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.storage
            .write_json(&Self::key(&checkpoint.run_id), checkpoint)
            .await
    }
}
