// 🧾 Detail Frame - rows with source-dependent columns
//
// Detail tables (financial values, text blocks, ...) carry whatever columns
// the extracting collaborator produced. They are stored with an inferred
// schema; see codec.rs.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// One detail row: column name → value (`Value::Null` for missing).
pub type DetailRow = BTreeMap<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailFrame {
    pub rows: Vec<DetailRow>,
}

impl DetailFrame {
    pub fn new(rows: Vec<DetailRow>) -> Self {
        DetailFrame { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Sorted union of every column seen in any row.
    pub fn columns(&self) -> BTreeSet<String> {
        self.rows.iter().flat_map(|r| r.keys().cloned()).collect()
    }

    pub fn extend(&mut self, other: DetailFrame) {
        self.rows.extend(other.rows);
    }
}

/// String view of a cell, treating null and empty strings as absent.
pub fn cell_str(row: &DetailRow, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_columns_union() {
        let mut a = DetailRow::new();
        a.insert("doc_id".into(), json!("S100"));
        let mut b = DetailRow::new();
        b.insert("value".into(), json!(12));
        let frame = DetailFrame::new(vec![a, b]);

        let cols: Vec<_> = frame.columns().into_iter().collect();
        assert_eq!(cols, vec!["doc_id".to_string(), "value".to_string()]);
    }

    #[test]
    fn test_cell_str() {
        let mut row = DetailRow::new();
        row.insert("a".into(), json!(" x "));
        row.insert("b".into(), json!(""));
        row.insert("c".into(), Value::Null);
        row.insert("d".into(), json!(42));

        assert_eq!(cell_str(&row, "a").as_deref(), Some("x"));
        assert_eq!(cell_str(&row, "b"), None);
        assert_eq!(cell_str(&row, "c"), None);
        assert_eq!(cell_str(&row, "d").as_deref(), Some("42"));
        assert_eq!(cell_str(&row, "missing"), None);
    }
}
