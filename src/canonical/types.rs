//! Raw attribute labels to canonical care types.

use std::collections::{BTreeSet, HashMap};

use crate::models::{CanonicalConfig, CareType};

/// Maps source attribute labels onto [`CareType`]s.
///
/// Rules are applied per label in a fixed order:
/// 1. lowercase and trim
/// 2. drop the label if it contains any noise substring
/// 3. exact lookup in the direct table
/// 4. first matching substring fallback, in configured order
///
/// Labels that survive all four steps without a match are dropped.
/// When a home-scale type and its facility-scale peer are both present,
/// only the home-scale type is kept.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    noise: Vec<String>,
    direct: HashMap<String, CareType>,
    fallbacks: Vec<(String, CareType)>,
}

impl TypeMapper {
    pub fn new(config: &CanonicalConfig) -> Self {
        Self {
            noise: config
                .noise_patterns
                .iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            direct: config
                .mappings
                .iter()
                .map(|m| (m.label.trim().to_lowercase(), m.care_type))
                .collect(),
            fallbacks: config
                .fallbacks
                .iter()
                .map(|r| (r.contains.trim().to_lowercase(), r.care_type))
                .filter(|(needle, _)| !needle.is_empty())
                .collect(),
        }
    }

    /// Map one label, `None` for noise or unknown labels.
    pub fn map_label(&self, label: &str) -> Option<CareType> {
        let label = label.trim().to_lowercase();
        if label.is_empty() || self.noise.iter().any(|n| label.contains(n.as_str())) {
            return None;
        }

        if let Some(care_type) = self.direct.get(&label) {
            return Some(*care_type);
        }

        let hit = self
            .fallbacks
            .iter()
            .find(|(needle, _)| label.contains(needle.as_str()))
            .map(|(_, care_type)| *care_type);

        if hit.is_none() {
            log::debug!("No care type for label '{label}'");
        }
        hit
    }

    /// Map a label list to a deduplicated, sorted type set.
    pub fn map_types<S: AsRef<str>>(&self, labels: &[S]) -> BTreeSet<CareType> {
        let mut types: BTreeSet<CareType> = labels
            .iter()
            .filter_map(|l| self.map_label(l.as_ref()))
            .collect();

        let outranked: Vec<CareType> = types
            .iter()
            .filter_map(|t| t.facility_scale_peer())
            .collect();
        for peer in outranked {
            types.remove(&peer);
        }
        types
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new(&CanonicalConfig::default())
    }
}
