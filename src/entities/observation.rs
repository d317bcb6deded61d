// 👁️ Observations - what one source said about one issuer at one time
//
// Two shapes:
// - RawObservation: everything optional, exactly what a worker handed over
// - IssuerObservation: the strict form produced by the repair step
//   (see validation.rs); required identity is guaranteed present

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::issuer::ListingStatus;

// ============================================================================
// RAW OBSERVATION (worker output / delta table row)
// ============================================================================

/// One unvalidated observation row.
///
/// Column names match the CSV headers collaborators emit, so the worker can
/// deserialize straight into this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    #[serde(default)]
    pub registry_id: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub trading_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_en: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    /// Free-form listed flag ("true", "1", "有", "listed", ...).
    #[serde(default)]
    pub is_active: Option<String>,
    /// Date or datetime string; absent for baseline sources.
    #[serde(default)]
    pub observed_at: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

// ============================================================================
// ORIGIN
// ============================================================================

/// Where an observation entered the reconciliation union.
///
/// Ordering matters: it is the tie-break rank on the timeline, so on equal
/// dates recorded history sorts before the master row, which sorts before
/// this run's incoming data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    History,
    Master,
    Incoming,
}

// ============================================================================
// ISSUER OBSERVATION (strict)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuerObservation {
    pub registry_id: String,
    pub name: String,
    pub national_id: Option<String>,
    pub trading_code: Option<String>,
    pub name_en: Option<String>,
    pub sector: Option<String>,
    pub market: Option<String>,
    pub status: ListingStatus,
    pub observed_at: Option<NaiveDate>,
    pub source: String,
    #[serde(skip, default = "default_origin")]
    pub origin: Origin,
}

fn default_origin() -> Origin {
    Origin::Incoming
}

impl IssuerObservation {
    /// Bare observation: identity + name, everything else empty.
    pub fn new(registry_id: impl Into<String>, name: impl Into<String>, source: impl Into<String>) -> Self {
        IssuerObservation {
            registry_id: registry_id.into(),
            name: name.into(),
            national_id: None,
            trading_code: None,
            name_en: None,
            sector: None,
            market: None,
            status: ListingStatus::Unknown,
            observed_at: None,
            source: source.into(),
            origin: Origin::Incoming,
        }
    }

    pub fn dated(mut self, date: NaiveDate) -> Self {
        self.observed_at = Some(date);
        self
    }

    pub fn with_status(mut self, status: ListingStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Content fingerprint (SHA-256 hex) used for deduplication.
    ///
    /// Covers identity, name, date, source and every attribute. The origin is
    /// left out so a fact repeated across chunks or re-runs collapses.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            Some(self.registry_id.as_str()),
            Some(self.name.as_str()),
            self.national_id.as_deref(),
            self.trading_code.as_deref(),
            self.name_en.as_deref(),
            self.sector.as_deref(),
            self.market.as_deref(),
            Some(self.status.as_str()),
            Some(self.source.as_str()),
        ] {
            hasher.update(part.unwrap_or("\u{0}"));
            hasher.update([0x1fu8]);
        }
        if let Some(d) = self.observed_at {
            hasher.update(d.format("%Y-%m-%d").to_string());
        }
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_origin() {
        let a = IssuerObservation::new("E1", "A社", "filings")
            .dated(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        let b = a.clone().with_origin(Origin::Master);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_dates_and_absent_fields() {
        let base = IssuerObservation::new("E1", "A社", "filings");
        let dated = base.clone().dated(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_ne!(base.fingerprint(), dated.fingerprint());

        let mut empty_sector = base.clone();
        empty_sector.sector = Some(String::new());
        assert_ne!(base.fingerprint(), empty_sector.fingerprint());
    }

    #[test]
    fn test_origin_rank() {
        assert!(Origin::History < Origin::Master);
        assert!(Origin::Master < Origin::Incoming);
    }
}
