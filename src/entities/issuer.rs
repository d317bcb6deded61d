// 🏢 Issuer Entity - one master row per legal entity
//
// "Registry id is IDENTITY (never changes), everything else is a VALUE"
//
// The trading code is deliberately not the key: it can be absent (unlisted
// issuers) or reassigned to a different company after a delisting.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// LISTING STATUS
// ============================================================================

/// Tri-state lifecycle status.
///
/// `Unknown` is a real state, not a missing value: it means no baseline
/// registry has ever vouched for the issuer, so we refuse to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum ListingStatus {
    Active,
    Inactive,
    #[default]
    Unknown,
}

impl ListingStatus {
    /// Columnar form: nullable boolean.
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => ListingStatus::Active,
            Some(false) => ListingStatus::Inactive,
            None => ListingStatus::Unknown,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ListingStatus::Active => Some(true),
            ListingStatus::Inactive => Some(false),
            ListingStatus::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != ListingStatus::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Active => "Active",
            ListingStatus::Inactive => "Inactive",
            ListingStatus::Unknown => "Unknown",
        }
    }
}

// ============================================================================
// MASTER ENTITY
// ============================================================================

/// One row of the issuer master table.
///
/// Rows are rebuilt wholesale on every run; nothing patches a field in place.
/// The `baseline_*` columns remember what the baseline registry last said,
/// separately from the resolved values, so that the next run can tell a
/// baseline-sourced attribute from a fallback one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterEntity {
    pub registry_id: String,
    pub national_id: Option<String>,
    pub trading_code: Option<String>,
    pub name: String,
    pub name_en: Option<String>,
    pub sector: Option<String>,
    pub market: Option<String>,
    pub status: ListingStatus,

    /// Has this issuer ever appeared in the baseline source?
    pub in_baseline: bool,
    pub baseline_status: ListingStatus,
    pub baseline_sector: Option<String>,
    pub baseline_market: Option<String>,

    /// Date of the newest dated observation folded into this row.
    pub last_observed_at: Option<NaiveDate>,

    /// Deprecated registry ids merged into this row, sorted.
    pub former_registry_ids: Vec<String>,
}

impl MasterEntity {
    /// Minimal row, used by tests and by callers that fill fields afterwards.
    pub fn new(registry_id: impl Into<String>, name: impl Into<String>) -> Self {
        MasterEntity {
            registry_id: registry_id.into(),
            national_id: None,
            trading_code: None,
            name: name.into(),
            name_en: None,
            sector: None,
            market: None,
            status: ListingStatus::Unknown,
            in_baseline: false,
            baseline_status: ListingStatus::Unknown,
            baseline_sector: None,
            baseline_market: None,
            last_observed_at: None,
            former_registry_ids: Vec::new(),
        }
    }

    /// Record a deprecated id; keeps the list sorted and unique.
    pub fn add_former_id(&mut self, id: &str) {
        if id.is_empty() || id == self.registry_id {
            return;
        }
        if let Err(pos) = self.former_registry_ids.binary_search_by(|x| x.as_str().cmp(id)) {
            self.former_registry_ids.insert(pos, id.to_string());
        }
    }

    /// Comma-joined form used in the columnar file.
    pub fn former_ids_joined(&self) -> Option<String> {
        if self.former_registry_ids.is_empty() {
            None
        } else {
            Some(self.former_registry_ids.join(","))
        }
    }

    pub fn parse_former_ids(joined: Option<&str>) -> Vec<String> {
        let mut ids: Vec<String> = joined
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

// ============================================================================
// IDENTITY BRIDGE
// ============================================================================

/// Deprecated → successor registry id (corporate restructuring, code reissue).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityBridge {
    pub deprecated_id: String,
    pub successor_id: String,
}

impl IdentityBridge {
    pub fn new(deprecated_id: impl Into<String>, successor_id: impl Into<String>) -> Self {
        IdentityBridge {
            deprecated_id: deprecated_id.into(),
            successor_id: successor_id.into(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flag_round_trip() {
        for status in [ListingStatus::Active, ListingStatus::Inactive, ListingStatus::Unknown] {
            assert_eq!(ListingStatus::from_flag(status.as_flag()), status);
        }
        assert!(!ListingStatus::Unknown.is_known());
    }

    #[test]
    fn test_former_ids_sorted_and_unique() {
        let mut row = MasterEntity::new("E00003", "C社");
        row.add_former_id("E00009");
        row.add_former_id("E00001");
        row.add_former_id("E00009");
        row.add_former_id("E00003"); // own id is never a former id

        assert_eq!(row.former_registry_ids, vec!["E00001", "E00009"]);
        assert_eq!(row.former_ids_joined().as_deref(), Some("E00001,E00009"));
    }

    #[test]
    fn test_parse_former_ids() {
        assert_eq!(
            MasterEntity::parse_former_ids(Some(" E2 ,E1,,E2")),
            vec!["E1".to_string(), "E2".to_string()]
        );
        assert!(MasterEntity::parse_former_ids(None).is_empty());
    }
}
