//! Listing records as they move through the pipeline.
//!
//! `source_url` is the identity key at every stage and is never rewritten.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CareType;

/// One listing as harvested from a partition, before detail enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRecord {
    /// Stable identity key
    pub source_url: String,

    pub title: String,

    /// Street line, or the whole address blob when the source does not split it
    #[serde(default)]
    pub street_address: String,

    #[serde(default)]
    pub city: String,

    #[serde(default)]
    pub region_code: String,

    #[serde(default)]
    pub postal_code: String,

    #[serde(default)]
    pub image_url: String,

    /// Attribute labels in the order the source shows them
    #[serde(default)]
    pub raw_attribute_labels: Vec<String>,
}

/// Secondary fields fetched from a record's own detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailFields {
    #[serde(default)]
    pub price_primary: String,

    #[serde(default)]
    pub price_secondary: String,

    #[serde(default)]
    pub second_occupant_fee: String,

    #[serde(default)]
    pub description: String,

    /// Full label list from the detail page (superset of the listing's)
    #[serde(default)]
    pub raw_attribute_labels: Vec<String>,

    #[serde(default)]
    pub source_last_modified: Option<DateTime<Utc>>,
}

/// A raw record merged with its detail fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(flatten)]
    pub raw: RawRecord,

    pub price_primary: String,
    pub price_secondary: String,
    pub second_occupant_fee: String,
    pub description: String,
    pub source_last_modified: Option<DateTime<Utc>>,
}

impl EnrichedRecord {
    /// Merge detail fields into a raw record.
    ///
    /// Detail labels replace the listing labels when present; listing labels
    /// that the detail page dropped are kept after them.
    pub fn merge(mut raw: RawRecord, details: DetailFields) -> Self {
        if !details.raw_attribute_labels.is_empty() {
            let mut labels = details.raw_attribute_labels;
            for label in raw.raw_attribute_labels.drain(..) {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            raw.raw_attribute_labels = labels;
        }

        Self {
            raw,
            price_primary: details.price_primary,
            price_secondary: details.price_secondary,
            second_occupant_fee: details.second_occupant_fee,
            description: details.description,
            source_last_modified: details.source_last_modified,
        }
    }

    /// Carry a record forward without detail fields (enrichment failed).
    pub fn unenriched(raw: RawRecord) -> Self {
        Self::merge(raw, DetailFields::default())
    }

    pub fn source_url(&self) -> &str {
        &self.raw.source_url
    }

    pub fn title(&self) -> &str {
        &self.raw.title
    }
}

/// Address split into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressParts {
    pub street: String,
    pub city: String,
    pub region: String,
    pub postal: String,
}

impl AddressParts {
    /// Rebuild `street[, city][, region postal]`, omitting absent parts.
    pub fn full(&self) -> String {
        let region_postal = [self.region.as_str(), self.postal.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        [self.street.as_str(), self.city.as_str(), region_postal.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.street.is_empty()
            && self.city.is_empty()
            && self.region.is_empty()
            && self.postal.is_empty()
    }
}

/// An enriched record after canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source_url: String,
    pub canonical_types: BTreeSet<CareType>,
    pub normalized_address: AddressParts,
}
