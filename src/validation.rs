// 📐 Observation Validation - strict record type + explicit repair step
//
// RawObservation → IssuerObservation:
// - optional fields are cleaned (trim, placeholders → None, code formats)
// - required identity (registry_id, name) is never invented; a row missing
//   it becomes a Rejection that the caller logs, the batch carries on
//
// Baseline-source rows are undated by definition, so any date they carry
// is dropped here.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::entities::{IssuerObservation, ListingStatus, Origin, RawObservation};
use crate::names::clean;

/// Source name filled in when a row does not say where it came from.
pub const UNKNOWN_SOURCE: &str = "unknown";

// ============================================================================
// VALIDATION ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn required(field: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            message: "Required field is empty".to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// A row that could not be repaired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position in the incoming batch.
    pub index: usize,
    pub registry_id: Option<String>,
    pub source: Option<String>,
    pub errors: Vec<ValidationError>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reasons: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "row {} (registry_id={}, source={}): {}",
            self.index,
            self.registry_id.as_deref().unwrap_or("-"),
            self.source.as_deref().unwrap_or("-"),
            reasons.join("; ")
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairOutcome {
    pub accepted: Vec<IssuerObservation>,
    pub rejected: Vec<Rejection>,
    /// Optional fields that had to be dropped or rewritten.
    pub repaired_fields: usize,
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct ObservationValidator {
    baseline_source: String,
}

impl ObservationValidator {
    pub fn new(baseline_source: impl Into<String>) -> Self {
        ObservationValidator {
            baseline_source: baseline_source.into(),
        }
    }

    pub fn is_baseline(&self, source: &str) -> bool {
        source == self.baseline_source
    }

    /// Repair every row; rejections are logged and collected.
    pub fn repair_all(&self, rows: &[RawObservation]) -> RepairOutcome {
        let mut outcome = RepairOutcome::default();
        for (index, raw) in rows.iter().enumerate() {
            match self.repair(index, raw) {
                Ok((obs, repaired)) => {
                    outcome.repaired_fields += repaired;
                    outcome.accepted.push(obs);
                }
                Err(rejection) => {
                    warn!(rejection = %rejection, "rejected observation");
                    outcome.rejected.push(rejection);
                }
            }
        }
        outcome
    }

    /// Repair one row. Returns the strict observation and how many optional
    /// fields were dropped or rewritten along the way.
    pub fn repair(&self, index: usize, raw: &RawObservation) -> Result<(IssuerObservation, usize), Rejection> {
        let registry_id = clean(raw.registry_id.as_deref());
        let name = clean(raw.name.as_deref());
        let source = clean(raw.source.as_deref());

        let mut errors = Vec::new();
        if registry_id.is_none() {
            errors.push(ValidationError::required("registry_id"));
        }
        if name.is_none() {
            errors.push(ValidationError::required("name"));
        }
        let (Some(registry_id), Some(name)) = (registry_id.clone(), name) else {
            return Err(Rejection {
                index,
                registry_id,
                source,
                errors,
            });
        };

        let mut repaired = 0;
        let source = source.unwrap_or_else(|| {
            repaired += 1;
            UNKNOWN_SOURCE.to_string()
        });

        let national_id = repair_national_id(raw.national_id.as_deref(), &mut repaired);
        let trading_code = repair_trading_code(raw.trading_code.as_deref(), &mut repaired);

        let status = match clean(raw.is_active.as_deref()) {
            None => ListingStatus::Unknown,
            Some(flag) => match parse_flag(&flag) {
                Some(b) => ListingStatus::from_flag(Some(b)),
                None => {
                    repaired += 1;
                    ListingStatus::Unknown
                }
            },
        };

        let mut observed_at = match clean(raw.observed_at.as_deref()) {
            None => None,
            Some(text) => {
                let parsed = parse_observed_date(&text);
                if parsed.is_none() {
                    repaired += 1;
                }
                parsed
            }
        };
        if self.is_baseline(&source) && observed_at.is_some() {
            observed_at = None;
            repaired += 1;
        }

        Ok((
            IssuerObservation {
                registry_id,
                name,
                national_id,
                trading_code,
                name_en: clean(raw.name_en.as_deref()),
                sector: clean(raw.sector.as_deref()),
                market: clean(raw.market.as_deref()),
                status,
                observed_at,
                source,
                origin: Origin::Incoming,
            },
            repaired,
        ))
    }
}

// ============================================================================
// FIELD REPAIRS
// ============================================================================

/// Digits only ("1010-0010-08846" → "1010001008846").
fn repair_national_id(raw: Option<&str>, repaired: &mut usize) -> Option<String> {
    let value = clean(raw)?;
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits != value {
        *repaired += 1;
    }
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Four-character securities codes get the trailing check digit slot ("7203" → "72030").
fn repair_trading_code(raw: Option<&str>, repaired: &mut usize) -> Option<String> {
    let mut value = clean(raw)?;
    // spreadsheets turn 7203 into 7203.0
    if let Some(stripped) = value.strip_suffix(".0") {
        value = stripped.to_string();
        *repaired += 1;
    }
    if value.chars().count() == 4 && value.chars().all(|c| c.is_ascii_alphanumeric()) {
        value.push('0');
    }
    Some(value)
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "有" | "listed" | "active" | "上場" => Some(true),
        "false" | "0" | "no" | "n" | "無" | "delisted" | "inactive" | "上場廃止" => Some(false),
        _ => None,
    }
}

/// `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, or any datetime starting with one.
pub fn parse_observed_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let head: String = value.chars().take(10).collect();
    for fmt in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(&head, fmt) {
            return Some(d);
        }
    }
    let compact: String = value.chars().take(8).collect();
    if compact.len() == 8 && compact.chars().all(|c| c.is_ascii_digit()) {
        return NaiveDate::parse_from_str(&compact, "%Y%m%d").ok();
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================
