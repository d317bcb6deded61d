// 🗂️ Bin Partitioner - deterministic shard routing for detail tables
//
// bin_of(issuer):
//   national registration number present → "J" + last two characters
//   else registry id present             → "E" + last two characters
//   else                                 → "No" (unassigned)
//
// The tag keeps the two identifier namespaces from colliding. Workers use
// this to name their delta files, and the merge path calls the very same
// function to verify placement, so there is exactly one implementation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::entities::{cell_str, DetailFrame, DetailRow};
use crate::names::is_placeholder;

/// Column names used to route dynamic detail rows.
pub const NATIONAL_ID_COLUMN: &str = "national_id";
pub const REGISTRY_ID_COLUMN: &str = "registry_id";

// ============================================================================
// BIN ID
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BinId {
    /// Derived from the national registration number.
    National(String),
    /// Derived from the registry-issued identifier.
    Registry(String),
    /// Neither identifier usable.
    Unassigned,
}

impl BinId {
    /// Parse the rendered form back ("J07", "E3A", "No").
    pub fn parse(s: &str) -> Option<Self> {
        if s == "No" {
            return Some(BinId::Unassigned);
        }
        let mut chars = s.chars();
        let tag = chars.next()?;
        let suffix: String = chars.collect();
        if suffix.chars().count() != 2 {
            return None;
        }
        match tag {
            'J' => Some(BinId::National(suffix)),
            'E' => Some(BinId::Registry(suffix)),
            _ => None,
        }
    }
}

impl fmt::Display for BinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinId::National(s) => write!(f, "J{s}"),
            BinId::Registry(s) => write!(f, "E{s}"),
            BinId::Unassigned => f.write_str("No"),
        }
    }
}

// ============================================================================
// ROUTING
// ============================================================================

/// Last two characters of a usable identifier.
fn tail2(id: Option<&str>) -> Option<String> {
    let id = id?.trim();
    if is_placeholder(id) || id.chars().count() < 2 {
        return None;
    }
    let mut tail: Vec<char> = id.chars().rev().take(2).collect();
    tail.reverse();
    Some(tail.into_iter().collect())
}

/// Route an issuer identity to its bin.
pub fn bin_of(national_id: Option<&str>, registry_id: Option<&str>) -> BinId {
    if let Some(t) = tail2(national_id) {
        return BinId::National(t);
    }
    if let Some(t) = tail2(registry_id) {
        return BinId::Registry(t);
    }
    BinId::Unassigned
}

/// Route a dynamic detail row by its identifier columns.
pub fn bin_of_row(row: &DetailRow) -> BinId {
    bin_of(
        cell_str(row, NATIONAL_ID_COLUMN).as_deref(),
        cell_str(row, REGISTRY_ID_COLUMN).as_deref(),
    )
}

/// Group rows by bin (worker side, and merge-side re-routing).
pub fn partition_rows(frame: DetailFrame) -> BTreeMap<BinId, DetailFrame> {
    let mut bins: BTreeMap<BinId, DetailFrame> = BTreeMap::new();
    for row in frame.rows {
        bins.entry(bin_of_row(&row)).or_default().rows.push(row);
    }
    bins
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(national: Option<&str>, registry: Option<&str>) -> DetailRow {
        let mut r = DetailRow::new();
        if let Some(n) = national {
            r.insert(NATIONAL_ID_COLUMN.into(), json!(n));
        }
        if let Some(e) = registry {
            r.insert(REGISTRY_ID_COLUMN.into(), json!(e));
        }
        r.insert("value".into(), json!(1));
        r
    }

    #[test]
    fn test_prefers_national_id() {
        assert_eq!(
            bin_of(Some("1010401089234"), Some("E02144")),
            BinId::National("34".into())
        );
        assert_eq!(bin_of(None, Some("E02144")), BinId::Registry("44".into()));
        assert_eq!(bin_of(None, None), BinId::Unassigned);
    }

    #[test]
    fn test_placeholders_and_short_ids_fall_through() {
        assert_eq!(bin_of(Some("nan"), Some("E02144")), BinId::Registry("44".into()));
        assert_eq!(bin_of(Some("7"), Some("None")), BinId::Unassigned);
        assert_eq!(bin_of(Some("  "), Some("E1")), BinId::Registry("E1".into()));
    }

    #[test]
    fn test_namespaces_never_collide() {
        let a = bin_of(Some("00044"), None);
        let b = bin_of(None, Some("E00044"));
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_render_and_parse() {
        for bin in [
            BinId::National("07".into()),
            BinId::Registry("3A".into()),
            BinId::Unassigned,
        ] {
            assert_eq!(BinId::parse(&bin.to_string()), Some(bin));
        }
        assert_eq!(BinId::parse("X12"), None);
        assert_eq!(BinId::parse("J123"), None);
    }

    #[test]
    fn test_stable_across_calls() {
        let first = bin_of(Some("5010001008846"), None);
        for _ in 0..10 {
            assert_eq!(bin_of(Some("5010001008846"), None), first);
        }
        assert_eq!(first.to_string(), "J46");
    }

    #[test]
    fn test_partition_rows_matches_bin_of() {
        let frame = DetailFrame::new(vec![
            row(Some("1010401089234"), Some("E02144")),
            row(None, Some("E02144")),
            row(None, None),
            row(Some("2000000000034"), None),
        ]);

        let bins = partition_rows(frame);
        assert_eq!(bins.len(), 3);
        assert_eq!(bins[&BinId::National("34".into())].len(), 2);
        assert_eq!(bins[&BinId::Registry("44".into())].len(), 1);
        assert_eq!(bins[&BinId::Unassigned].len(), 1);

        for (bin, frame) in &bins {
            for r in &frame.rows {
                assert_eq!(&bin_of_row(r), bin);
            }
        }
    }
}
