//! Destination-side state for one listing.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CareType;

/// Current destination record for a `source_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub destination_id: u64,

    pub source_url: String,

    #[serde(default)]
    pub destination_modified_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub current_price: Option<String>,

    #[serde(default)]
    pub current_canonical_types: BTreeSet<CareType>,

    #[serde(default)]
    pub current_description: Option<String>,
}

/// Whole destination snapshot keyed by source URL.
pub type Snapshot = HashMap<String, SnapshotEntry>;
