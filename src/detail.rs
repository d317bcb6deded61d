// 🧮 Detail Bins - merge + audit for dynamic-schema detail tables
//
// Per kind, a DetailSpec names the key columns and the recency column.
// Merging a bin:
//   1. incoming rows are re-routed by bin_of_row (misplaced → warn + move)
//   2. existing bin rows + incoming rows are concatenated, existing first
//   3. dedup on the key: the greatest recency wins, ties go to the later row
//
// A kind with no key columns dedups on the whole row.

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::bins::{bin_of_row, BinId};
use crate::entities::{cell_str, DetailFrame, DetailRow};

// ============================================================================
// DETAIL SPEC
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DetailSpec {
    pub kind: String,
    pub key_columns: Vec<String>,
    pub recency_column: Option<String>,
}

impl DetailSpec {
    pub fn new(kind: impl Into<String>, key_columns: &[&str], recency_column: Option<&str>) -> Self {
        DetailSpec {
            kind: kind.into(),
            key_columns: key_columns.iter().map(|c| c.to_string()).collect(),
            recency_column: recency_column.map(str::to_string),
        }
    }

    /// Whole-row dedup, no recency.
    pub fn whole_row(kind: impl Into<String>) -> Self {
        DetailSpec {
            kind: kind.into(),
            key_columns: Vec::new(),
            recency_column: None,
        }
    }

    pub fn defaults() -> Vec<DetailSpec> {
        vec![
            DetailSpec::new(
                "financial_values",
                &["doc_id", "key", "context_ref"],
                Some("submitted_at"),
            ),
            DetailSpec::new("qualitative_text", &["doc_id", "section"], Some("submitted_at")),
        ]
    }

    /// Configured spec for `kind`, else whole-row dedup.
    pub fn lookup(specs: &[DetailSpec], kind: &str) -> DetailSpec {
        specs
            .iter()
            .find(|s| s.kind == kind)
            .cloned()
            .unwrap_or_else(|| DetailSpec::whole_row(kind))
    }

    fn key_of(&self, row: &DetailRow) -> String {
        if self.key_columns.is_empty() {
            // null and blank cells are the same as an absent column: a stored
            // bin fills every column of its schema
            return row
                .keys()
                .filter_map(|c| cell_str(row, c).map(|v| format!("{c}\u{1e}{v}")))
                .collect::<Vec<_>>()
                .join("\u{1f}");
        }
        self.key_columns
            .iter()
            .map(|c| cell_str(row, c).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    fn recency<'a>(&self, row: &'a DetailRow) -> Option<&'a Value> {
        let column = self.recency_column.as_deref()?;
        row.get(column).filter(|v| !v.is_null())
    }
}

/// Missing < present; numbers compare numerically, everything else as text.
fn compare_recency(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// ROUTING
// ============================================================================

/// Incoming rows for one kind, regrouped by the bin each row really
/// belongs to. Rows a worker filed under the wrong bin are moved.
#[derive(Debug, Clone, Default)]
pub struct RoutedDetail {
    pub bins: BTreeMap<BinId, DetailFrame>,
    pub misplaced: usize,
}

pub fn route_incoming(kind: &str, declared: BTreeMap<BinId, DetailFrame>) -> RoutedDetail {
    let mut routed = RoutedDetail::default();
    for (declared_bin, frame) in declared {
        for row in frame.rows {
            let actual = bin_of_row(&row);
            if actual != declared_bin {
                routed.misplaced += 1;
            }
            routed.bins.entry(actual).or_default().rows.push(row);
        }
    }
    if routed.misplaced > 0 {
        warn!(kind, misplaced = routed.misplaced, "detail rows filed under the wrong bin were rerouted");
    }
    routed
}

// ============================================================================
// MERGE
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinMerge {
    pub frame: DetailFrame,
    pub duplicates_dropped: usize,
}

/// Merge incoming rows into an existing bin frame.
pub fn merge_bin(spec: &DetailSpec, existing: DetailFrame, incoming: DetailFrame) -> BinMerge {
    let mut rows: Vec<DetailRow> = Vec::with_capacity(existing.len() + incoming.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0;

    for row in existing.rows.into_iter().chain(incoming.rows) {
        let key = spec.key_of(&row);
        match index.get(&key) {
            Some(&at) => {
                dropped += 1;
                if compare_recency(spec.recency(&row), spec.recency(&rows[at])) != Ordering::Less {
                    rows[at] = row;
                }
            }
            None => {
                index.insert(key, rows.len());
                rows.push(row);
            }
        }
    }

    BinMerge {
        frame: DetailFrame::new(rows),
        duplicates_dropped: dropped,
    }
}

// ============================================================================
// AUDIT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinAudit {
    pub rows: usize,
    /// Rows whose re-derived bin differs from the bin they sit in.
    pub misplaced: usize,
    /// Keys that occur more than once.
    pub duplicate_keys: usize,
}

impl BinAudit {
    pub fn is_clean(&self) -> bool {
        self.misplaced == 0 && self.duplicate_keys == 0
    }
}

pub fn audit_bin(spec: &DetailSpec, bin: &BinId, frame: &DetailFrame) -> BinAudit {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut misplaced = 0;
    for row in &frame.rows {
        if bin_of_row(row) != *bin {
            misplaced += 1;
        }
        *counts.entry(spec.key_of(row)).or_insert(0) += 1;
    }
    BinAudit {
        rows: frame.len(),
        misplaced,
        duplicate_keys: counts.values().filter(|n| **n > 1).count(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{TableData, TableKind};
    use serde_json::json;

    fn fin_row(national: &str, key: &str, value: i64, submitted: &str) -> DetailRow {
        let mut r = DetailRow::new();
        r.insert("national_id".into(), json!(national));
        r.insert("doc_id".into(), json!("S100ABCD"));
        r.insert("key".into(), json!(key));
        r.insert("context_ref".into(), json!("CurrentYear"));
        r.insert("value".into(), json!(value));
        r.insert("submitted_at".into(), json!(submitted));
        r
    }

    fn spec() -> DetailSpec {
        DetailSpec::lookup(&DetailSpec::defaults(), "financial_values")
    }

    #[test]
    fn test_merge_keeps_most_recent_per_key() {
        let existing = DetailFrame::new(vec![
            fin_row("1010001008846", "NetSales", 100, "2024-06-01"),
            fin_row("1010001008846", "OperatingIncome", 10, "2024-06-01"),
        ]);
        let incoming = DetailFrame::new(vec![
            fin_row("1010001008846", "NetSales", 120, "2024-07-01"),
            fin_row("1010001008846", "OperatingIncome", 9, "2024-05-01"),
        ]);

        let merged = merge_bin(&spec(), existing, incoming);
        assert_eq!(merged.frame.len(), 2);
        assert_eq!(merged.duplicates_dropped, 2);
        assert_eq!(merged.frame.rows[0]["value"], json!(120));
        // the older incoming row loses
        assert_eq!(merged.frame.rows[1]["value"], json!(10));
    }

    #[test]
    fn test_merge_tie_goes_to_incoming() {
        let existing = DetailFrame::new(vec![fin_row("1010001008846", "NetSales", 1, "2024-06-01")]);
        let incoming = DetailFrame::new(vec![fin_row("1010001008846", "NetSales", 2, "2024-06-01")]);
        let merged = merge_bin(&spec(), existing, incoming);
        assert_eq!(merged.frame.rows[0]["value"], json!(2));
    }

    #[test]
    fn test_merging_same_rows_twice_is_idempotent() {
        let rows = DetailFrame::new(vec![fin_row("1010001008846", "NetSales", 1, "2024-06-01")]);
        let once = merge_bin(&spec(), DetailFrame::default(), rows.clone());
        let twice = merge_bin(&spec(), once.frame.clone(), rows);
        assert_eq!(once.frame, twice.frame);
    }

    #[test]
    fn test_route_incoming_moves_misplaced_rows() {
        let mut declared = BTreeMap::new();
        declared.insert(
            BinId::National("46".into()),
            DetailFrame::new(vec![
                fin_row("1010001008846", "NetSales", 1, "2024-06-01"),
                fin_row("1010001008899", "NetSales", 2, "2024-06-01"),
            ]),
        );

        let routed = route_incoming("financial_values", declared);
        assert_eq!(routed.misplaced, 1);
        assert_eq!(routed.bins[&BinId::National("46".into())].len(), 1);
        assert_eq!(routed.bins[&BinId::National("99".into())].len(), 1);
    }

    #[test]
    fn test_audit_reports_problems() {
        let frame = DetailFrame::new(vec![
            fin_row("1010001008846", "NetSales", 1, "2024-06-01"),
            fin_row("1010001008846", "NetSales", 2, "2024-06-02"),
            fin_row("1010001008811", "NetSales", 3, "2024-06-01"),
        ]);
        let audit = audit_bin(&spec(), &BinId::National("46".into()), &frame);
        assert_eq!(audit.rows, 3);
        assert_eq!(audit.misplaced, 1);
        assert_eq!(audit.duplicate_keys, 1);
        assert!(!audit.is_clean());
    }

    #[test]
    fn test_unknown_kind_dedups_whole_rows() {
        let s = DetailSpec::lookup(&DetailSpec::defaults(), "custom_notes");
        assert!(s.key_columns.is_empty());
        let row = fin_row("1010001008846", "NetSales", 1, "2024-06-01");
        let merged = merge_bin(&s, DetailFrame::new(vec![row.clone()]), DetailFrame::new(vec![row]));
        assert_eq!(merged.frame.len(), 1);
    }

    #[test]
    fn test_whole_row_remerge_after_storing_adds_nothing() {
        let s = DetailSpec::whole_row("custom_notes");
        let mut a = DetailRow::new();
        a.insert("national_id".into(), json!("1010001008846"));
        a.insert("x".into(), json!("left"));
        let mut b = DetailRow::new();
        b.insert("national_id".into(), json!("1010001008846"));
        b.insert("y".into(), json!("right"));
        let incoming = DetailFrame::new(vec![a, b]);

        let first = merge_bin(&s, DetailFrame::default(), incoming.clone());
        assert_eq!(first.frame.len(), 2);

        // stored rows come back with nulls for the columns they never had
        let bytes = crate::codec::encode(&TableData::Detail(first.frame)).unwrap();
        let stored = crate::codec::decode(TableKind::Detail, &bytes).unwrap().into_detail().unwrap();
        assert_eq!(stored.rows[0]["y"], Value::Null);

        let again = merge_bin(&s, stored, incoming);
        assert_eq!(again.frame.len(), 2);
        assert_eq!(again.duplicates_dropped, 2);
        assert!(audit_bin(&s, &BinId::National("46".into()), &again.frame).is_clean());
    }
}
