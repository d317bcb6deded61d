// 📋 Tables - logical tables, where they live, and their in-memory form
//
// Repository layout:
//   catalog/documents_index.parquet         document catalog (fixed schema)
//   meta/issuer_master.parquet              master (fixed schema)
//   meta/name_history.parquet               name history (fixed schema)
//   meta/listing_history.parquet            listing history (fixed schema)
//   meta/index_history.parquet              index membership history (fixed schema)
//   master/{kind}/bin={bin}/data.parquet    detail bins (inferred schema)
//   {staging}/{run}/{chunk}/{file}          deltas, plus _SUCCESS

use crate::bins::BinId;
use crate::entities::{
    CatalogRecord, DetailFrame, IdentityBridge, IndexEvent, ListingEvent, MasterEntity,
    NameChangeEvent, RawObservation,
};
use crate::error::{Error, Result};

pub const MASTER_PATH: &str = "meta/issuer_master.parquet";
pub const NAME_HISTORY_PATH: &str = "meta/name_history.parquet";
pub const LISTING_HISTORY_PATH: &str = "meta/listing_history.parquet";
pub const INDEX_HISTORY_PATH: &str = "meta/index_history.parquet";
pub const CATALOG_PATH: &str = "catalog/documents_index.parquet";
pub const DETAIL_ROOT: &str = "master";
pub const SUCCESS_MARKER: &str = "_SUCCESS";
pub const FILE_EXT: &str = "parquet";

// ============================================================================
// TABLE KIND + SCHEMA MODE
// ============================================================================

/// Schema discipline of a table. A table is one or the other, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaMode {
    Fixed { version: u32 },
    Inferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TableKind {
    Catalog,
    Master,
    NameHistory,
    ListingHistory,
    IndexHistory,
    Observations,
    Bridges,
    Detail,
}

impl TableKind {
    pub fn name(&self) -> &'static str {
        match self {
            TableKind::Catalog => "documents_index",
            TableKind::Master => "issuer_master",
            TableKind::NameHistory => "name_history",
            TableKind::ListingHistory => "listing_history",
            TableKind::IndexHistory => "index_history",
            TableKind::Observations => "observations",
            TableKind::Bridges => "bridges",
            TableKind::Detail => "detail",
        }
    }

    pub fn schema_mode(&self) -> SchemaMode {
        match self {
            TableKind::Detail => SchemaMode::Inferred,
            _ => SchemaMode::Fixed { version: 1 },
        }
    }
}

// ============================================================================
// PERSISTENT TABLES
// ============================================================================

/// A table in the shared repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Catalog,
    Master,
    NameHistory,
    ListingHistory,
    IndexHistory,
    DetailBin { kind: String, bin: BinId },
}

impl Table {
    /// The fixed-schema tables every run rewrites, and every snapshot covers.
    pub fn top_level() -> [Table; 5] {
        [
            Table::Catalog,
            Table::Master,
            Table::ListingHistory,
            Table::IndexHistory,
            Table::NameHistory,
        ]
    }

    pub fn path(&self) -> String {
        match self {
            Table::Catalog => CATALOG_PATH.to_string(),
            Table::Master => MASTER_PATH.to_string(),
            Table::NameHistory => NAME_HISTORY_PATH.to_string(),
            Table::ListingHistory => LISTING_HISTORY_PATH.to_string(),
            Table::IndexHistory => INDEX_HISTORY_PATH.to_string(),
            Table::DetailBin { kind, bin } => {
                format!("{DETAIL_ROOT}/{kind}/bin={bin}/data.{FILE_EXT}")
            }
        }
    }

    pub fn kind(&self) -> TableKind {
        match self {
            Table::Catalog => TableKind::Catalog,
            Table::Master => TableKind::Master,
            Table::NameHistory => TableKind::NameHistory,
            Table::ListingHistory => TableKind::ListingHistory,
            Table::IndexHistory => TableKind::IndexHistory,
            Table::DetailBin { .. } => TableKind::Detail,
        }
    }

    /// Inverse of `path()` for detail bins.
    pub fn parse_detail_path(path: &str) -> Option<Table> {
        let rest = path.strip_prefix(DETAIL_ROOT)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let kind = parts.next()?;
        let bin = parts.next()?.strip_prefix("bin=")?;
        let file = parts.next()?;
        if parts.next().is_some() || file != format!("data.{FILE_EXT}") || kind.is_empty() {
            return None;
        }
        Some(Table::DetailBin {
            kind: kind.to_string(),
            bin: BinId::parse(bin)?,
        })
    }
}

// ============================================================================
// DELTA TABLES
// ============================================================================

/// A table a worker writes into its chunk directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeltaTable {
    Observations,
    Bridges,
    Catalog,
    IndexEvents,
    Detail { kind: String, bin: BinId },
}

impl DeltaTable {
    pub fn file_name(&self) -> String {
        match self {
            DeltaTable::Observations => format!("observations.{FILE_EXT}"),
            DeltaTable::Bridges => format!("bridges.{FILE_EXT}"),
            DeltaTable::Catalog => format!("catalog.{FILE_EXT}"),
            DeltaTable::IndexEvents => format!("index_events.{FILE_EXT}"),
            DeltaTable::Detail { kind, bin } => format!("{kind}_bin{bin}.{FILE_EXT}"),
        }
    }

    pub fn from_file_name(name: &str) -> Option<DeltaTable> {
        let stem = name.strip_suffix(&format!(".{FILE_EXT}"))?;
        match stem {
            "observations" => Some(DeltaTable::Observations),
            "bridges" => Some(DeltaTable::Bridges),
            "catalog" => Some(DeltaTable::Catalog),
            "index_events" => Some(DeltaTable::IndexEvents),
            _ => {
                let (kind, bin) = stem.rsplit_once("_bin")?;
                if kind.is_empty() {
                    return None;
                }
                Some(DeltaTable::Detail {
                    kind: kind.to_string(),
                    bin: BinId::parse(bin)?,
                })
            }
        }
    }

    pub fn kind(&self) -> TableKind {
        match self {
            DeltaTable::Observations => TableKind::Observations,
            DeltaTable::Bridges => TableKind::Bridges,
            DeltaTable::Catalog => TableKind::Catalog,
            DeltaTable::IndexEvents => TableKind::IndexHistory,
            DeltaTable::Detail { .. } => TableKind::Detail,
        }
    }
}

/// `{prefix}/{run}/{chunk}` with no trailing slash.
pub fn chunk_dir(prefix: &str, run_id: &str, chunk_id: &str) -> String {
    format!("{}/{}/{}", prefix.trim_end_matches('/'), run_id, chunk_id)
}

pub fn run_dir(prefix: &str, run_id: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), run_id)
}

// ============================================================================
// TABLE DATA
// ============================================================================

/// Decoded content of one table file.
#[derive(Debug, Clone, PartialEq)]
pub enum TableData {
    Catalog(Vec<CatalogRecord>),
    Master(Vec<MasterEntity>),
    NameHistory(Vec<NameChangeEvent>),
    ListingHistory(Vec<ListingEvent>),
    IndexHistory(Vec<IndexEvent>),
    Observations(Vec<RawObservation>),
    Bridges(Vec<IdentityBridge>),
    Detail(DetailFrame),
}

impl TableData {
    pub fn empty(kind: TableKind) -> Self {
        match kind {
            TableKind::Catalog => TableData::Catalog(Vec::new()),
            TableKind::Master => TableData::Master(Vec::new()),
            TableKind::NameHistory => TableData::NameHistory(Vec::new()),
            TableKind::ListingHistory => TableData::ListingHistory(Vec::new()),
            TableKind::IndexHistory => TableData::IndexHistory(Vec::new()),
            TableKind::Observations => TableData::Observations(Vec::new()),
            TableKind::Bridges => TableData::Bridges(Vec::new()),
            TableKind::Detail => TableData::Detail(DetailFrame::default()),
        }
    }

    pub fn kind(&self) -> TableKind {
        match self {
            TableData::Catalog(_) => TableKind::Catalog,
            TableData::Master(_) => TableKind::Master,
            TableData::NameHistory(_) => TableKind::NameHistory,
            TableData::ListingHistory(_) => TableKind::ListingHistory,
            TableData::IndexHistory(_) => TableKind::IndexHistory,
            TableData::Observations(_) => TableKind::Observations,
            TableData::Bridges(_) => TableKind::Bridges,
            TableData::Detail(_) => TableKind::Detail,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TableData::Catalog(v) => v.len(),
            TableData::Master(v) => v.len(),
            TableData::NameHistory(v) => v.len(),
            TableData::ListingHistory(v) => v.len(),
            TableData::IndexHistory(v) => v.len(),
            TableData::Observations(v) => v.len(),
            TableData::Bridges(v) => v.len(),
            TableData::Detail(f) => f.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenate another table of the same kind onto this one.
    pub fn append(&mut self, other: TableData) -> Result<()> {
        match (self, other) {
            (TableData::Catalog(a), TableData::Catalog(b)) => a.extend(b),
            (TableData::Master(a), TableData::Master(b)) => a.extend(b),
            (TableData::NameHistory(a), TableData::NameHistory(b)) => a.extend(b),
            (TableData::ListingHistory(a), TableData::ListingHistory(b)) => a.extend(b),
            (TableData::IndexHistory(a), TableData::IndexHistory(b)) => a.extend(b),
            (TableData::Observations(a), TableData::Observations(b)) => a.extend(b),
            (TableData::Bridges(a), TableData::Bridges(b)) => a.extend(b),
            (TableData::Detail(a), TableData::Detail(b)) => a.extend(b),
            (a, b) => {
                return Err(Error::InvalidInput(format!(
                    "cannot append {} rows to a {} table",
                    b.kind().name(),
                    a.kind().name()
                )))
            }
        }
        Ok(())
    }

    pub fn into_catalog(self) -> Result<Vec<CatalogRecord>> {
        match self {
            TableData::Catalog(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::Catalog, other.kind())),
        }
    }

    pub fn into_master(self) -> Result<Vec<MasterEntity>> {
        match self {
            TableData::Master(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::Master, other.kind())),
        }
    }

    pub fn into_name_history(self) -> Result<Vec<NameChangeEvent>> {
        match self {
            TableData::NameHistory(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::NameHistory, other.kind())),
        }
    }

    pub fn into_listing_history(self) -> Result<Vec<ListingEvent>> {
        match self {
            TableData::ListingHistory(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::ListingHistory, other.kind())),
        }
    }

    pub fn into_index_history(self) -> Result<Vec<IndexEvent>> {
        match self {
            TableData::IndexHistory(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::IndexHistory, other.kind())),
        }
    }

    pub fn into_observations(self) -> Result<Vec<RawObservation>> {
        match self {
            TableData::Observations(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::Observations, other.kind())),
        }
    }

    pub fn into_bridges(self) -> Result<Vec<IdentityBridge>> {
        match self {
            TableData::Bridges(v) => Ok(v),
            other => Err(kind_mismatch(TableKind::Bridges, other.kind())),
        }
    }

    pub fn into_detail(self) -> Result<DetailFrame> {
        match self {
            TableData::Detail(f) => Ok(f),
            other => Err(kind_mismatch(TableKind::Detail, other.kind())),
        }
    }
}

fn kind_mismatch(expected: TableKind, actual: TableKind) -> Error {
    Error::InvalidInput(format!(
        "expected {} table, got {}",
        expected.name(),
        actual.name()
    ))
}

// ============================================================================
// TESTS
// ============================================================================
