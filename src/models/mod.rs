// src/models/mod.rs

//! Domain models for the sync engine.
//!
//! Records are typed end to end; `source_url` is the identity key shared by
//! every stage.

mod care_type;
mod checkpoint;
mod config;
mod partition;
mod record;
mod snapshot;
mod summary;

pub use care_type::CareType;
pub use checkpoint::{Checkpoint, RunStatus};
pub use config::{
    CacheConfig, CanonicalConfig, Config, CrawlerConfig, DestinationConfig, FallbackRule,
    MAX_PAGES_CAP, ModerationConfig, PathsConfig, SourceConfig, SourceSelectors, TypeMapping,
};
pub use partition::Partition;
pub use record::{AddressParts, CanonicalRecord, DetailFields, EnrichedRecord, RawRecord};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use summary::RunSummary;
