//! Canonical care categories shared with the destination taxonomy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// One normalized care category.
///
/// Variant order is the sort order used for every emitted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CareType {
    #[serde(rename = "Assisted Living Community")]
    AssistedLivingCommunity,
    #[serde(rename = "Assisted Living Home")]
    AssistedLivingHome,
    #[serde(rename = "Independent Living")]
    IndependentLiving,
    #[serde(rename = "Memory Care")]
    MemoryCare,
    #[serde(rename = "Nursing Home")]
    NursingHome,
    #[serde(rename = "Home Care")]
    HomeCare,
}

impl CareType {
    /// Every canonical type, in sort order.
    pub const ALL: [CareType; 6] = [
        CareType::AssistedLivingCommunity,
        CareType::AssistedLivingHome,
        CareType::IndependentLiving,
        CareType::MemoryCare,
        CareType::NursingHome,
        CareType::HomeCare,
    ];

    /// Destination display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CareType::AssistedLivingCommunity => "Assisted Living Community",
            CareType::AssistedLivingHome => "Assisted Living Home",
            CareType::IndependentLiving => "Independent Living",
            CareType::MemoryCare => "Memory Care",
            CareType::NursingHome => "Nursing Home",
            CareType::HomeCare => "Home Care",
        }
    }

    /// The facility-scale type this home-scale type outranks, if any.
    pub fn facility_scale_peer(&self) -> Option<CareType> {
        match self {
            CareType::AssistedLivingHome => Some(CareType::AssistedLivingCommunity),
            _ => None,
        }
    }
}

impl fmt::Display for CareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CareType {
    type Err = AppError;

    /// Parse a destination display name (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        CareType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| AppError::validation(format!("unknown care type '{needle}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_display_names_case_insensitively() {
        assert_eq!(
            "memory care".parse::<CareType>().unwrap(),
            CareType::MemoryCare
        );
        assert_eq!(
            " Assisted Living Home ".parse::<CareType>().unwrap(),
            CareType::AssistedLivingHome
        );
        assert!("Day Spa".parse::<CareType>().is_err());
    }

    #[test]
    fn serde_uses_display_names() {
        let json = serde_json::to_string(&CareType::NursingHome).unwrap();
        assert_eq!(json, "\"Nursing Home\"");
        let back: CareType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CareType::NursingHome);
    }
}
