// src/canonical/mod.rs

//! Canonicalization of enriched records.
//!
//! Both halves are pure: the same record always yields the same
//! [`CanonicalRecord`].

mod address;
mod types;

pub use address::AddressParser;
pub use types::TypeMapper;

use crate::error::Result;
use crate::models::{CanonicalConfig, CanonicalRecord, EnrichedRecord};

/// Applies type mapping and address parsing to enriched records.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    types: TypeMapper,
    address: AddressParser,
}

impl Canonicalizer {
    pub fn new(config: &CanonicalConfig) -> Result<Self> {
        Ok(Self {
            types: TypeMapper::new(config),
            address: AddressParser::new()?,
        })
    }

    pub fn canonicalize(&self, record: &EnrichedRecord) -> CanonicalRecord {
        let raw = &record.raw;
        CanonicalRecord {
            source_url: raw.source_url.clone(),
            canonical_types: self.types.map_types(&raw.raw_attribute_labels),
            normalized_address: self.address.parse(
                &raw.street_address,
                &raw.city,
                &raw.region_code,
                &raw.postal_code,
            ),
        }
    }
}
