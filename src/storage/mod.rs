//! Run persistence on the local filesystem.
//!
//! ## Directory Structure
//!
//! ```text
//! {output_dir}/
//! └── {run_id}/
//!     ├── resume_checkpoint.json   # Checkpoint
//!     ├── raw/
//!     │   ├── AZ.json              # RawRecords per partition
//!     │   └── UT.json
//!     ├── new_listings.json        # Artifacts
//!     ├── updated_listings.json
//!     ├── enrichment_failures.json
//!     ├── run_summary.json
//!     └── publish_ledger.json      # What `publish` already sent
//! ```
//!
//! Every write is temp-file-then-rename, so readers never observe a torn file.

pub mod checkpoint;
pub mod local;

pub use checkpoint::CheckpointStore;
pub use local::LocalStorage;

/// Relative keys inside the output directory.
pub mod layout {
    pub const CHECKPOINT_FILE: &str = "resume_checkpoint.json";
    pub const NEW_LISTINGS_FILE: &str = "new_listings.json";
    pub const UPDATED_LISTINGS_FILE: &str = "updated_listings.json";
    pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
    pub const FAILURES_FILE: &str = "enrichment_failures.json";
    pub const PUBLISH_LEDGER_FILE: &str = "publish_ledger.json";

    /// Raw record location for a partition, relative to the run directory.
    pub fn raw_location(partition_key: &str) -> String {
        format!("raw/{partition_key}.json")
    }

    /// Key of a run-relative file.
    pub fn in_run(run_id: &str, relative: &str) -> String {
        format!("{run_id}/{relative}")
    }
}
