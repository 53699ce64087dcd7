//! Units of crawl work.

use serde::{Deserialize, Serialize};

/// A named unit of crawl work (one region).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    /// Stable key used in checkpoints and file names (e.g. "AZ")
    pub key: String,

    pub display_name: String,
}

impl Partition {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
        }
    }
}
