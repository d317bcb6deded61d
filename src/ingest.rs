// 📥 Ingest - worker-side CSV readers
//
// Collaborators hand over already-extracted tables as CSV with a header row.
// Five shapes:
// - observations: columns named after RawObservation fields, extras ignored
// - bridges: deprecated_id, successor_id
// - catalog: doc_id plus any CatalogRecord columns
// - index events: index_name, trading_code, event_type (ADD/REMOVE), event_date
// - detail: any columns; every cell kept as text, empty cells become null
//
// Nothing is validated here. Observation repair happens at merge time so a
// bad row never blocks a worker.

use csv::{ReaderBuilder, Trim};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::entities::{CatalogRecord, DetailFrame, DetailRow, IdentityBridge, IndexEvent, RawObservation};
use crate::error::{Error, Result};

// ============================================================================
// FILE READERS
// ============================================================================

pub fn read_observations(path: &Path) -> Result<Vec<RawObservation>> {
    let rows = deserialize_rows(open(path)?, &path.display().to_string())?;
    info!(path = %path.display(), rows = rows.len(), "observations read");
    Ok(rows)
}

pub fn read_bridges(path: &Path) -> Result<Vec<IdentityBridge>> {
    let rows = deserialize_rows(open(path)?, &path.display().to_string())?;
    info!(path = %path.display(), rows = rows.len(), "identity bridges read");
    Ok(rows)
}

pub fn read_catalog(path: &Path) -> Result<Vec<CatalogRecord>> {
    let rows = deserialize_rows(open(path)?, &path.display().to_string())?;
    info!(path = %path.display(), rows = rows.len(), "catalog records read");
    Ok(rows)
}

pub fn read_index_events(path: &Path) -> Result<Vec<IndexEvent>> {
    let rows = deserialize_rows(open(path)?, &path.display().to_string())?;
    info!(path = %path.display(), rows = rows.len(), "index events read");
    Ok(rows)
}

pub fn read_detail(path: &Path) -> Result<DetailFrame> {
    let frame = detail_from_reader(open(path)?)?;
    info!(path = %path.display(), rows = frame.len(), columns = frame.columns().len(), "detail rows read");
    Ok(frame)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::InvalidInput(format!("cannot open {}: {e}", path.display())))
}

// ============================================================================
// READER-BASED PARSING
// ============================================================================

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(input)
}

/// Typed rows. Missing columns deserialize as `None`.
pub fn deserialize_rows<T, R>(input: R, origin: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut rdr = reader(input);
    let mut rows = Vec::new();
    for (line_num, result) in rdr.deserialize().enumerate() {
        // +2: 1-indexed plus the header row
        let row: T = result.map_err(|e| Error::InvalidInput(format!("{origin}: line {}: {e}", line_num + 2)))?;
        rows.push(row);
    }
    Ok(rows)
}

/// Free-form rows keyed by header.
pub fn detail_from_reader<R: Read>(input: R) -> Result<DetailFrame> {
    let mut rdr = reader(input);
    let headers = rdr.headers()?.clone();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let mut row = DetailRow::new();
        for (i, column) in headers.iter().enumerate() {
            if column.is_empty() {
                continue;
            }
            let value = match record.get(i) {
                Some(cell) if !cell.is_empty() => Value::String(cell.to_string()),
                _ => Value::Null,
            };
            row.insert(column.to_string(), value);
        }
        rows.push(row);
    }
    debug!(rows = rows.len(), columns = headers.len(), "detail csv parsed");
    Ok(DetailFrame::new(rows))
}

// ============================================================================
// TESTS
// ============================================================================
