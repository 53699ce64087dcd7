//! Diff engine.
//!
//! Classifies each enriched record against the destination snapshot as
//! new, updated (with reasons) or unchanged. Classification is a pure
//! function of the record, its canonical form and the snapshot entry.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::canonical::Canonicalizer;
use crate::models::{CanonicalRecord, EnrichedRecord, Snapshot, SnapshotEntry};
use crate::utils::normalize_price;

/// Why an existing destination record needs an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    Price,
    Types,
    Description,
}

/// Per-record classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reasons", rename_all = "snake_case")]
pub enum DiffResult {
    New,
    Updated(BTreeSet<UpdateReason>),
    Unchanged,
}

/// Classify one record.
///
/// Price differences always count. Type and description differences are
/// ignored when the source's last-modified marker is not strictly newer
/// than the destination's modification time.
pub fn classify(
    enriched: &EnrichedRecord,
    canonical: &CanonicalRecord,
    snapshot: Option<&SnapshotEntry>,
) -> DiffResult {
    let Some(entry) = snapshot else {
        return DiffResult::New;
    };

    let mut reasons = BTreeSet::new();

    if price_differs(&enriched.price_primary, entry.current_price.as_deref()) {
        reasons.insert(UpdateReason::Price);
    }

    let stale = matches!(
        (enriched.source_last_modified, entry.destination_modified_at),
        (Some(source), Some(destination)) if source <= destination
    );

    if !stale {
        if canonical
            .canonical_types
            .symmetric_difference(&entry.current_canonical_types)
            .next()
            .is_some()
        {
            reasons.insert(UpdateReason::Types);
        }
        if description_differs(&enriched.description, entry.current_description.as_deref()) {
            reasons.insert(UpdateReason::Description);
        }
    }

    if reasons.is_empty() {
        DiffResult::Unchanged
    } else {
        DiffResult::Updated(reasons)
    }
}

/// Numeric comparison after stripping currency punctuation.
///
/// No usable source price means nothing to push. A usable source price
/// against a missing or unreadable destination price is a difference.
fn price_differs(source: &str, destination: Option<&str>) -> bool {
    let Some(source) = parse_price(source) else {
        return false;
    };
    match destination.and_then(parse_price) {
        Some(destination) => (source - destination).abs() >= 0.005,
        None => true,
    }
}

fn parse_price(raw: &str) -> Option<f64> {
    let normalized = normalize_price(raw);
    if normalized.is_empty() {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Only compared when both sides carry text.
fn description_differs(source: &str, destination: Option<&str>) -> bool {
    let source = collapse_whitespace(source);
    match destination.map(collapse_whitespace) {
        Some(destination) if !source.is_empty() && !destination.is_empty() => {
            source != destination
        }
        _ => false,
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A classified record with everything the output batches need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub record: EnrichedRecord,
    pub canonical: CanonicalRecord,
    /// Present for updates
    pub destination_id: Option<u64>,
    pub result: DiffResult,
}

impl ClassifiedRecord {
    pub fn reasons(&self) -> BTreeSet<UpdateReason> {
        match &self.result {
            DiffResult::Updated(reasons) => reasons.clone(),
            _ => BTreeSet::new(),
        }
    }
}

/// Batch classification result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffOutcome {
    pub new: Vec<ClassifiedRecord>,
    pub updated: Vec<ClassifiedRecord>,
    pub unchanged: Vec<String>,
}

impl DiffOutcome {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty()
    }

    /// Number of updates carrying `reason`.
    pub fn count_reason(&self, reason: UpdateReason) -> usize {
        self.updated
            .iter()
            .filter(|c| matches!(&c.result, DiffResult::Updated(r) if r.contains(&reason)))
            .count()
    }
}

/// Canonicalizes and classifies a batch of enriched records.
#[derive(Debug, Clone)]
pub struct DiffCalculator {
    canonicalizer: Canonicalizer,
}

impl DiffCalculator {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    /// Classify every record against the snapshot, preserving input order.
    pub fn calculate(&self, records: &[EnrichedRecord], snapshot: &Snapshot) -> DiffOutcome {
        let mut outcome = DiffOutcome::default();

        for record in records {
            let canonical = self.canonicalizer.canonicalize(record);
            let entry = snapshot.get(record.source_url());
            let result = classify(record, &canonical, entry);

            match result {
                DiffResult::Unchanged => outcome.unchanged.push(record.source_url().to_string()),
                DiffResult::New | DiffResult::Updated(_) => {
                    let classified = ClassifiedRecord {
                        record: record.clone(),
                        canonical,
                        destination_id: entry.map(|e| e.destination_id),
                        result,
                    };
                    if classified.destination_id.is_some() {
                        outcome.updated.push(classified);
                    } else {
                        outcome.new.push(classified);
                    }
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::models::{AddressParts, CanonicalConfig, CareType, RawRecord};

    fn enriched(url: &str, price: &str) -> EnrichedRecord {
        let mut record = EnrichedRecord::unenriched(RawRecord {
            source_url: url.into(),
            title: "Desert Rose".into(),
            street_address: "1 Main St".into(),
            city: "Phoenix".into(),
            region_code: "AZ".into(),
            postal_code: "85001".into(),
            image_url: String::new(),
            raw_attribute_labels: vec!["Memory Care".into()],
        });
        record.price_primary = price.into();
        record
    }

    fn canonical(url: &str, types: &[CareType]) -> CanonicalRecord {
        CanonicalRecord {
            source_url: url.into(),
            canonical_types: types.iter().copied().collect(),
            normalized_address: AddressParts::default(),
        }
    }

    fn entry(url: &str, price: Option<&str>, types: &[CareType]) -> SnapshotEntry {
        SnapshotEntry {
            destination_id: 9,
            source_url: url.into(),
            destination_modified_at: None,
            current_price: price.map(String::from),
            current_canonical_types: types.iter().copied().collect(),
            current_description: None,
        }
    }

    fn reasons(list: &[UpdateReason]) -> DiffResult {
        DiffResult::Updated(list.iter().copied().collect())
    }

    #[test]
    fn absent_snapshot_is_new() {
        let r = enriched("https://src/x", "");
        let c = canonical("https://src/x", &[]);
        assert_eq!(classify(&r, &c, None), DiffResult::New);
    }

    #[test]
    fn price_difference_after_stripping_punctuation() {
        let r = enriched("https://src/x", "4,500");
        let c = canonical("https://src/x", &[CareType::MemoryCare]);
        let e = entry("https://src/x", Some("4000"), &[CareType::MemoryCare]);
        assert_eq!(classify(&r, &c, Some(&e)), reasons(&[UpdateReason::Price]));

        let same = entry("https://src/x", Some("$4,500.00"), &[CareType::MemoryCare]);
        assert_eq!(classify(&r, &c, Some(&same)), DiffResult::Unchanged);
    }

    #[test]
    fn missing_source_price_is_not_compared() {
        let r = enriched("https://src/x", "Call for pricing");
        let c = canonical("https://src/x", &[]);
        let e = entry("https://src/x", Some("4000"), &[]);
        assert_eq!(classify(&r, &c, Some(&e)), DiffResult::Unchanged);
    }

    #[test]
    fn type_difference_is_an_update() {
        let r = enriched("https://src/x", "");
        let c = canonical("https://src/x", &[CareType::MemoryCare, CareType::HomeCare]);
        let e = entry("https://src/x", None, &[CareType::MemoryCare]);
        assert_eq!(classify(&r, &c, Some(&e)), reasons(&[UpdateReason::Types]));
    }

    #[test]
    fn stale_source_suppresses_types_but_not_price() {
        let mut r = enriched("https://src/x", "");
        r.source_last_modified = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let c = canonical("https://src/x", &[CareType::NursingHome]);
        let mut e = entry("https://src/x", Some("3000"), &[CareType::MemoryCare]);
        e.destination_modified_at = Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());

        assert_eq!(classify(&r, &c, Some(&e)), DiffResult::Unchanged);

        r.price_primary = "3,200".into();
        assert_eq!(classify(&r, &c, Some(&e)), reasons(&[UpdateReason::Price]));
    }

    #[test]
    fn equal_timestamps_count_as_stale() {
        let when = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut r = enriched("https://src/x", "");
        r.source_last_modified = Some(when);
        let c = canonical("https://src/x", &[CareType::NursingHome]);
        let mut e = entry("https://src/x", None, &[]);
        e.destination_modified_at = Some(when);
        assert_eq!(classify(&r, &c, Some(&e)), DiffResult::Unchanged);

        r.source_last_modified = Some(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap());
        assert_eq!(classify(&r, &c, Some(&e)), reasons(&[UpdateReason::Types]));
    }

    #[test]
    fn description_compared_only_when_destination_has_one() {
        let mut r = enriched("https://src/x", "");
        r.description = "A  calm home\nwith a garden".into();
        let c = canonical("https://src/x", &[]);
        let mut e = entry("https://src/x", None, &[]);
        assert_eq!(classify(&r, &c, Some(&e)), DiffResult::Unchanged);

        e.current_description = Some("A calm home with a garden".into());
        assert_eq!(classify(&r, &c, Some(&e)), DiffResult::Unchanged);

        e.current_description = Some("A calm home".into());
        assert_eq!(
            classify(&r, &c, Some(&e)),
            reasons(&[UpdateReason::Description])
        );
    }

    #[test]
    fn calculator_splits_batches_and_is_idempotent() {
        let calc = DiffCalculator::new(Canonicalizer::new(&CanonicalConfig::default()).unwrap());
        let records = vec![
            enriched("https://src/new", "100"),
            enriched("https://src/same", "4000"),
            enriched("https://src/price", "4,500"),
        ];
        let snapshot: Snapshot = [
            entry("https://src/same", Some("4000"), &[CareType::MemoryCare]),
            entry("https://src/price", Some("4000"), &[CareType::MemoryCare]),
        ]
        .into_iter()
        .map(|e| (e.source_url.clone(), e))
        .collect();

        let first = calc.calculate(&records, &snapshot);
        assert_eq!(first.new.len(), 1);
        assert_eq!(first.new[0].record.source_url(), "https://src/new");
        assert_eq!(first.updated.len(), 1);
        assert_eq!(first.updated[0].destination_id, Some(9));
        assert_eq!(first.unchanged, vec!["https://src/same"]);
        assert_eq!(first.count_reason(UpdateReason::Price), 1);
        assert_eq!(first.count_reason(UpdateReason::Types), 0);

        let second = calc.calculate(&records, &snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn diff_result_serializes_with_reasons() {
        let json = serde_json::to_value(reasons(&[UpdateReason::Types, UpdateReason::Price]))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "kind": "updated", "reasons": ["price", "types"] })
        );
    }
}
