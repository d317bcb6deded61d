// 🗂️ Document Catalog - one row per filed document
//
// The catalog is keyed by doc_id. A later record for the same document
// replaces the earlier one outright (status updates, amendments).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub doc_id: String,
    #[serde(default)]
    pub registry_id: Option<String>,
    #[serde(default)]
    pub national_id: Option<String>,
    #[serde(default)]
    pub trading_code: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub period_end: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<String>,
    /// Document this one amends.
    #[serde(default)]
    pub parent_doc_id: Option<String>,
    #[serde(default)]
    pub processed_status: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl CatalogRecord {
    pub fn new(doc_id: impl Into<String>) -> Self {
        CatalogRecord {
            doc_id: doc_id.into(),
            ..CatalogRecord::default()
        }
    }
}

/// Fold new records into the catalog. The last record per doc_id wins;
/// records without a doc_id are dropped. Output is sorted by doc_id.
pub fn merge_catalog(existing: Vec<CatalogRecord>, incoming: Vec<CatalogRecord>) -> Vec<CatalogRecord> {
    let mut by_doc: BTreeMap<String, CatalogRecord> = BTreeMap::new();
    let mut dropped = 0;
    for record in existing.into_iter().chain(incoming) {
        let doc_id = record.doc_id.trim().to_string();
        if doc_id.is_empty() {
            dropped += 1;
            continue;
        }
        by_doc.insert(doc_id.clone(), CatalogRecord { doc_id, ..record });
    }
    if dropped > 0 {
        warn!(dropped, "catalog records without doc_id dropped");
    }
    by_doc.into_values().collect()
}
