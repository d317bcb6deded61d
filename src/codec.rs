// 🧱 Columnar Codec - TableData <-> Parquet bytes
//
// Fixed-schema tables have an explicit Arrow schema per kind, stamped with
// `issuer_master.schema = fixed:{name}:v{n}` in the schema metadata. Detail
// tables get a schema inferred from their rows and are stamped `inferred`.
// Decoding checks the stamp, so a file written in one mode can never be
// read back through the other.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeStringArray, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Number, Value};

use crate::entities::{
    CatalogRecord, DetailFrame, DetailRow, IdentityBridge, IndexEvent, IndexEventType, ListingEvent,
    ListingEventType, ListingStatus, MasterEntity, NameChangeEvent, RawObservation,
};
use crate::error::{Error, Result};
use crate::table::{SchemaMode, TableData, TableKind};

/// Schema metadata key carrying the schema stamp.
pub const SCHEMA_KEY: &str = "issuer_master.schema";
const INFERRED_STAMP: &str = "inferred";
const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// PUBLIC API
// ============================================================================

pub fn encode(data: &TableData) -> Result<Bytes> {
    let batch = match data {
        TableData::Catalog(rows) => catalog_batch(rows)?,
        TableData::Master(rows) => master_batch(rows)?,
        TableData::NameHistory(rows) => name_history_batch(rows)?,
        TableData::ListingHistory(rows) => listing_batch(rows)?,
        TableData::IndexHistory(rows) => index_history_batch(rows)?,
        TableData::Observations(rows) => observations_batch(rows)?,
        TableData::Bridges(rows) => bridges_batch(rows)?,
        TableData::Detail(frame) => detail_batch(frame)?,
    };
    write_single_batch(&batch)
}

pub fn decode(kind: TableKind, bytes: &Bytes) -> Result<TableData> {
    let (schema, batches) = read_batches(bytes)?;
    check_stamp(kind, &schema)?;

    match kind {
        TableKind::Catalog => collect(&batches, read_catalog).map(TableData::Catalog),
        TableKind::Master => collect(&batches, read_master).map(TableData::Master),
        TableKind::NameHistory => collect(&batches, read_name_history).map(TableData::NameHistory),
        TableKind::ListingHistory => collect(&batches, read_listing).map(TableData::ListingHistory),
        TableKind::IndexHistory => collect(&batches, read_index_history).map(TableData::IndexHistory),
        TableKind::Observations => collect(&batches, read_observations).map(TableData::Observations),
        TableKind::Bridges => collect(&batches, read_bridges).map(TableData::Bridges),
        TableKind::Detail => collect(&batches, read_detail)
            .map(|rows| TableData::Detail(DetailFrame::new(rows))),
    }
}

fn collect<T>(batches: &[RecordBatch], read: fn(&RecordBatch) -> Result<Vec<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for batch in batches {
        out.extend(read(batch)?);
    }
    Ok(out)
}

// ============================================================================
// SCHEMA STAMPS
// ============================================================================

fn stamp(kind: TableKind) -> String {
    match kind.schema_mode() {
        SchemaMode::Fixed { version } => format!("fixed:{}:v{}", kind.name(), version),
        SchemaMode::Inferred => INFERRED_STAMP.to_string(),
    }
}

fn stamped_schema(kind: TableKind, fields: Vec<Field>) -> SchemaRef {
    let metadata = HashMap::from([(SCHEMA_KEY.to_string(), stamp(kind))]);
    Arc::new(Schema::new_with_metadata(fields, metadata))
}

fn check_stamp(kind: TableKind, schema: &Schema) -> Result<()> {
    let expected = stamp(kind);
    match schema.metadata().get(SCHEMA_KEY) {
        Some(found) if *found == expected => Ok(()),
        Some(found) => Err(Error::codec(format!(
            "schema mismatch for {}: expected '{expected}', file says '{found}'",
            kind.name()
        ))),
        None => Err(Error::codec(format!(
            "file has no schema stamp; refusing to read it as {}",
            kind.name()
        ))),
    }
}

pub fn master_schema() -> SchemaRef {
    stamped_schema(
        TableKind::Master,
        vec![
            Field::new("registry_id", DataType::Utf8, false),
            Field::new("national_id", DataType::Utf8, true),
            Field::new("trading_code", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, false),
            Field::new("name_en", DataType::Utf8, true),
            Field::new("sector", DataType::Utf8, true),
            Field::new("market", DataType::Utf8, true),
            Field::new("is_active", DataType::Boolean, true),
            Field::new("in_baseline", DataType::Boolean, false),
            Field::new("baseline_is_active", DataType::Boolean, true),
            Field::new("baseline_sector", DataType::Utf8, true),
            Field::new("baseline_market", DataType::Utf8, true),
            Field::new("last_observed_at", DataType::Utf8, true),
            Field::new("former_registry_ids", DataType::Utf8, true),
        ],
    )
}

pub fn name_history_schema() -> SchemaRef {
    stamped_schema(
        TableKind::NameHistory,
        vec![
            Field::new("registry_id", DataType::Utf8, false),
            Field::new("old_name", DataType::Utf8, false),
            Field::new("new_name", DataType::Utf8, false),
            Field::new("change_date", DataType::Utf8, false),
        ],
    )
}

pub fn listing_schema() -> SchemaRef {
    stamped_schema(
        TableKind::ListingHistory,
        vec![
            Field::new("registry_id", DataType::Utf8, false),
            Field::new("trading_code", DataType::Utf8, true),
            Field::new("event_type", DataType::Utf8, false),
            Field::new("event_date", DataType::Utf8, false),
        ],
    )
}

pub fn index_history_schema() -> SchemaRef {
    stamped_schema(
        TableKind::IndexHistory,
        vec![
            Field::new("index_name", DataType::Utf8, false),
            Field::new("trading_code", DataType::Utf8, false),
            Field::new("event_type", DataType::Utf8, false),
            Field::new("event_date", DataType::Utf8, false),
        ],
    )
}

pub fn catalog_schema() -> SchemaRef {
    let mut fields = vec![Field::new("doc_id", DataType::Utf8, false)];
    fields.extend(
        CATALOG_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true)),
    );
    stamped_schema(TableKind::Catalog, fields)
}

pub fn observations_schema() -> SchemaRef {
    let fields = OBSERVATION_COLUMNS
        .iter()
        .map(|name| Field::new(*name, DataType::Utf8, true))
        .collect();
    stamped_schema(TableKind::Observations, fields)
}

pub fn bridges_schema() -> SchemaRef {
    stamped_schema(
        TableKind::Bridges,
        vec![
            Field::new("deprecated_id", DataType::Utf8, false),
            Field::new("successor_id", DataType::Utf8, false),
        ],
    )
}

const OBSERVATION_COLUMNS: [&str; 10] = [
    "registry_id",
    "national_id",
    "trading_code",
    "name",
    "name_en",
    "sector",
    "market",
    "is_active",
    "observed_at",
    "source",
];

/// Catalog columns after `doc_id`, all optional text.
const CATALOG_COLUMNS: [&str; 11] = [
    "registry_id",
    "national_id",
    "trading_code",
    "company_name",
    "doc_type",
    "title",
    "period_end",
    "submitted_at",
    "parent_doc_id",
    "processed_status",
    "source",
];

// ============================================================================
// FIXED-SCHEMA WRITERS
// ============================================================================

fn strings<'a, T>(rows: &'a [T], f: impl Fn(&'a T) -> Option<&'a str>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn owned_strings<T>(rows: &[T], f: impl Fn(&T) -> Option<String>) -> ArrayRef {
    Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn bools<T>(rows: &[T], f: impl Fn(&T) -> Option<bool>) -> ArrayRef {
    Arc::new(BooleanArray::from(rows.iter().map(f).collect::<Vec<_>>()))
}

fn fmt_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

fn master_batch(rows: &[MasterEntity]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        master_schema(),
        vec![
            strings(rows, |r| Some(r.registry_id.as_str())),
            strings(rows, |r| r.national_id.as_deref()),
            strings(rows, |r| r.trading_code.as_deref()),
            strings(rows, |r| Some(r.name.as_str())),
            strings(rows, |r| r.name_en.as_deref()),
            strings(rows, |r| r.sector.as_deref()),
            strings(rows, |r| r.market.as_deref()),
            bools(rows, |r| r.status.as_flag()),
            bools(rows, |r| Some(r.in_baseline)),
            bools(rows, |r| r.baseline_status.as_flag()),
            strings(rows, |r| r.baseline_sector.as_deref()),
            strings(rows, |r| r.baseline_market.as_deref()),
            owned_strings(rows, |r| r.last_observed_at.map(fmt_date)),
            owned_strings(rows, |r| r.former_ids_joined()),
        ],
    )?;
    Ok(batch)
}

fn name_history_batch(rows: &[NameChangeEvent]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        name_history_schema(),
        vec![
            strings(rows, |r| Some(r.registry_id.as_str())),
            strings(rows, |r| Some(r.old_name.as_str())),
            strings(rows, |r| Some(r.new_name.as_str())),
            owned_strings(rows, |r| Some(fmt_date(r.change_date))),
        ],
    )?;
    Ok(batch)
}

fn listing_batch(rows: &[ListingEvent]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        listing_schema(),
        vec![
            strings(rows, |r| Some(r.registry_id.as_str())),
            strings(rows, |r| r.trading_code.as_deref()),
            strings(rows, |r| Some(r.event_type.as_str())),
            owned_strings(rows, |r| Some(fmt_date(r.event_date))),
        ],
    )?;
    Ok(batch)
}

fn index_history_batch(rows: &[IndexEvent]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        index_history_schema(),
        vec![
            strings(rows, |r| Some(r.index_name.as_str())),
            strings(rows, |r| Some(r.trading_code.as_str())),
            strings(rows, |r| Some(r.event_type.as_str())),
            owned_strings(rows, |r| Some(fmt_date(r.event_date))),
        ],
    )?;
    Ok(batch)
}

fn catalog_batch(rows: &[CatalogRecord]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        catalog_schema(),
        vec![
            strings(rows, |r| Some(r.doc_id.as_str())),
            strings(rows, |r| r.registry_id.as_deref()),
            strings(rows, |r| r.national_id.as_deref()),
            strings(rows, |r| r.trading_code.as_deref()),
            strings(rows, |r| r.company_name.as_deref()),
            strings(rows, |r| r.doc_type.as_deref()),
            strings(rows, |r| r.title.as_deref()),
            strings(rows, |r| r.period_end.as_deref()),
            strings(rows, |r| r.submitted_at.as_deref()),
            strings(rows, |r| r.parent_doc_id.as_deref()),
            strings(rows, |r| r.processed_status.as_deref()),
            strings(rows, |r| r.source.as_deref()),
        ],
    )?;
    Ok(batch)
}

fn observations_batch(rows: &[RawObservation]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        observations_schema(),
        vec![
            strings(rows, |r| r.registry_id.as_deref()),
            strings(rows, |r| r.national_id.as_deref()),
            strings(rows, |r| r.trading_code.as_deref()),
            strings(rows, |r| r.name.as_deref()),
            strings(rows, |r| r.name_en.as_deref()),
            strings(rows, |r| r.sector.as_deref()),
            strings(rows, |r| r.market.as_deref()),
            strings(rows, |r| r.is_active.as_deref()),
            strings(rows, |r| r.observed_at.as_deref()),
            strings(rows, |r| r.source.as_deref()),
        ],
    )?;
    Ok(batch)
}

fn bridges_batch(rows: &[IdentityBridge]) -> Result<RecordBatch> {
    let batch = RecordBatch::try_new(
        bridges_schema(),
        vec![
            strings(rows, |r| Some(r.deprecated_id.as_str())),
            strings(rows, |r| Some(r.successor_id.as_str())),
        ],
    )?;
    Ok(batch)
}

// ============================================================================
// FIXED-SCHEMA READERS
// ============================================================================

fn read_master(batch: &RecordBatch) -> Result<Vec<MasterEntity>> {
    let registry_id = col_string(batch, "registry_id")?;
    let name = col_string(batch, "name")?;
    let national_id = col_string_optional(batch, "national_id")?;
    let trading_code = col_string_optional(batch, "trading_code")?;
    let name_en = col_string_optional(batch, "name_en")?;
    let sector = col_string_optional(batch, "sector")?;
    let market = col_string_optional(batch, "market")?;
    let is_active = col_bool_optional(batch, "is_active")?;
    let in_baseline = col_bool_optional(batch, "in_baseline")?;
    let baseline_is_active = col_bool_optional(batch, "baseline_is_active")?;
    let baseline_sector = col_string_optional(batch, "baseline_sector")?;
    let baseline_market = col_string_optional(batch, "baseline_market")?;
    let last_observed_at = col_string_optional(batch, "last_observed_at")?;
    let former = col_string_optional(batch, "former_registry_ids")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(MasterEntity {
            registry_id: required_str(registry_id, i, "registry_id")?,
            national_id: opt_str(national_id, i),
            trading_code: opt_str(trading_code, i),
            name: required_str(name, i, "name")?,
            name_en: opt_str(name_en, i),
            sector: opt_str(sector, i),
            market: opt_str(market, i),
            status: ListingStatus::from_flag(opt_bool(is_active, i)),
            in_baseline: opt_bool(in_baseline, i).unwrap_or(false),
            baseline_status: ListingStatus::from_flag(opt_bool(baseline_is_active, i)),
            baseline_sector: opt_str(baseline_sector, i),
            baseline_market: opt_str(baseline_market, i),
            last_observed_at: opt_date(last_observed_at, i, "last_observed_at")?,
            former_registry_ids: MasterEntity::parse_former_ids(opt_str(former, i).as_deref()),
        });
    }
    Ok(rows)
}

fn read_name_history(batch: &RecordBatch) -> Result<Vec<NameChangeEvent>> {
    let registry_id = col_string(batch, "registry_id")?;
    let old_name = col_string(batch, "old_name")?;
    let new_name = col_string(batch, "new_name")?;
    let change_date = col_string(batch, "change_date")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(NameChangeEvent {
            registry_id: required_str(registry_id, i, "registry_id")?,
            old_name: required_str(old_name, i, "old_name")?,
            new_name: required_str(new_name, i, "new_name")?,
            change_date: required_date(change_date, i, "change_date")?,
        });
    }
    Ok(rows)
}

fn read_listing(batch: &RecordBatch) -> Result<Vec<ListingEvent>> {
    let registry_id = col_string(batch, "registry_id")?;
    let trading_code = col_string_optional(batch, "trading_code")?;
    let event_type = col_string(batch, "event_type")?;
    let event_date = col_string(batch, "event_date")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let raw_type = required_str(event_type, i, "event_type")?;
        let event_type = ListingEventType::parse(&raw_type)
            .ok_or_else(|| Error::codec(format!("unknown listing event type '{raw_type}'")))?;
        rows.push(ListingEvent {
            registry_id: required_str(registry_id, i, "registry_id")?,
            trading_code: opt_str(trading_code, i),
            event_type,
            event_date: required_date(event_date, i, "event_date")?,
        });
    }
    Ok(rows)
}

fn read_index_history(batch: &RecordBatch) -> Result<Vec<IndexEvent>> {
    let index_name = col_string(batch, "index_name")?;
    let trading_code = col_string(batch, "trading_code")?;
    let event_type = col_string(batch, "event_type")?;
    let event_date = col_string(batch, "event_date")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let raw_type = required_str(event_type, i, "event_type")?;
        let event_type = IndexEventType::parse(&raw_type)
            .ok_or_else(|| Error::codec(format!("unknown index event type '{raw_type}'")))?;
        rows.push(IndexEvent {
            index_name: required_str(index_name, i, "index_name")?,
            trading_code: required_str(trading_code, i, "trading_code")?,
            event_type,
            event_date: required_date(event_date, i, "event_date")?,
        });
    }
    Ok(rows)
}

fn read_catalog(batch: &RecordBatch) -> Result<Vec<CatalogRecord>> {
    let doc_id = col_string(batch, "doc_id")?;
    let mut cols = Vec::with_capacity(CATALOG_COLUMNS.len());
    for name in CATALOG_COLUMNS {
        cols.push(col_string_optional(batch, name)?);
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(CatalogRecord {
            doc_id: required_str(doc_id, i, "doc_id")?,
            registry_id: opt_str(cols[0], i),
            national_id: opt_str(cols[1], i),
            trading_code: opt_str(cols[2], i),
            company_name: opt_str(cols[3], i),
            doc_type: opt_str(cols[4], i),
            title: opt_str(cols[5], i),
            period_end: opt_str(cols[6], i),
            submitted_at: opt_str(cols[7], i),
            parent_doc_id: opt_str(cols[8], i),
            processed_status: opt_str(cols[9], i),
            source: opt_str(cols[10], i),
        });
    }
    Ok(rows)
}

fn read_observations(batch: &RecordBatch) -> Result<Vec<RawObservation>> {
    let mut cols = Vec::with_capacity(OBSERVATION_COLUMNS.len());
    for name in OBSERVATION_COLUMNS {
        cols.push(col_string_optional(batch, name)?);
    }

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(RawObservation {
            registry_id: opt_str(cols[0], i),
            national_id: opt_str(cols[1], i),
            trading_code: opt_str(cols[2], i),
            name: opt_str(cols[3], i),
            name_en: opt_str(cols[4], i),
            sector: opt_str(cols[5], i),
            market: opt_str(cols[6], i),
            is_active: opt_str(cols[7], i),
            observed_at: opt_str(cols[8], i),
            source: opt_str(cols[9], i),
        });
    }
    Ok(rows)
}

fn read_bridges(batch: &RecordBatch) -> Result<Vec<IdentityBridge>> {
    let deprecated = col_string(batch, "deprecated_id")?;
    let successor = col_string(batch, "successor_id")?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        rows.push(IdentityBridge {
            deprecated_id: required_str(deprecated, i, "deprecated_id")?,
            successor_id: required_str(successor, i, "successor_id")?,
        });
    }
    Ok(rows)
}

// ============================================================================
// INFERRED SCHEMA (detail tables)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inferred {
    Bool,
    Int,
    Float,
    Utf8,
}

impl Inferred {
    fn of(value: &Value) -> Option<Inferred> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Inferred::Bool),
            Value::Number(n) if n.is_i64() => Some(Inferred::Int),
            Value::Number(_) => Some(Inferred::Float),
            _ => Some(Inferred::Utf8),
        }
    }

    fn widen(self, other: Inferred) -> Inferred {
        match (self, other) {
            (a, b) if a == b => a,
            (Inferred::Int, Inferred::Float) | (Inferred::Float, Inferred::Int) => Inferred::Float,
            _ => Inferred::Utf8,
        }
    }

    fn data_type(self) -> DataType {
        match self {
            Inferred::Bool => DataType::Boolean,
            Inferred::Int => DataType::Int64,
            Inferred::Float => DataType::Float64,
            Inferred::Utf8 => DataType::Utf8,
        }
    }
}

/// Infer one Arrow field per column from the union of all rows.
pub fn infer_schema(frame: &DetailFrame) -> SchemaRef {
    let fields = frame
        .columns()
        .into_iter()
        .map(|column| {
            let mut ty: Option<Inferred> = None;
            let mut nullable = false;
            for row in &frame.rows {
                match row.get(&column).and_then(Inferred::of) {
                    Some(t) => ty = Some(ty.map_or(t, |cur| cur.widen(t))),
                    None => nullable = true,
                }
            }
            // an all-null column has no type evidence; store it as nullable text
            let nullable = nullable || ty.is_none();
            Field::new(column, ty.unwrap_or(Inferred::Utf8).data_type(), nullable)
        })
        .collect();
    stamped_schema(TableKind::Detail, fields)
}

fn detail_batch(frame: &DetailFrame) -> Result<RecordBatch> {
    let schema = infer_schema(frame);
    if schema.fields().is_empty() {
        return Err(Error::codec("detail frame has no columns"));
    }

    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let cells: Vec<Option<&Value>> = frame
            .rows
            .iter()
            .map(|r| r.get(field.name()).filter(|v| !v.is_null()))
            .collect();

        let array: ArrayRef = match field.data_type() {
            DataType::Boolean => Arc::new(BooleanArray::from(
                cells.iter().map(|v| v.and_then(Value::as_bool)).collect::<Vec<_>>(),
            )),
            DataType::Int64 => Arc::new(Int64Array::from(
                cells.iter().map(|v| v.and_then(Value::as_i64)).collect::<Vec<_>>(),
            )),
            DataType::Float64 => Arc::new(Float64Array::from(
                cells.iter().map(|v| v.and_then(Value::as_f64)).collect::<Vec<_>>(),
            )),
            _ => Arc::new(StringArray::from(
                cells
                    .iter()
                    .map(|v| {
                        v.map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                    })
                    .collect::<Vec<_>>(),
            )),
        };
        columns.push(array);
    }

    let options = RecordBatchOptions::new().with_row_count(Some(frame.len()));
    Ok(RecordBatch::try_new_with_options(schema, columns, &options)?)
}

fn read_detail(batch: &RecordBatch) -> Result<Vec<DetailRow>> {
    let schema = batch.schema();
    let mut rows = vec![DetailRow::new(); batch.num_rows()];

    for (idx, field) in schema.fields().iter().enumerate() {
        let column = batch.column(idx);
        for (i, row) in rows.iter_mut().enumerate() {
            row.insert(field.name().clone(), cell_value(column.as_ref(), field, i)?);
        }
    }
    Ok(rows)
}

fn cell_value(column: &dyn Array, field: &Field, i: usize) -> Result<Value> {
    if column.is_null(i) {
        return Ok(Value::Null);
    }
    let any = column.as_any();
    let unsupported = || {
        Error::codec(format!(
            "column '{}' has unsupported type {:?}",
            field.name(),
            field.data_type()
        ))
    };

    let value = match field.data_type() {
        DataType::Utf8 => Value::String(
            any.downcast_ref::<StringArray>().ok_or_else(unsupported)?.value(i).to_string(),
        ),
        DataType::LargeUtf8 => Value::String(
            any.downcast_ref::<LargeStringArray>().ok_or_else(unsupported)?.value(i).to_string(),
        ),
        DataType::Boolean => Value::Bool(any.downcast_ref::<BooleanArray>().ok_or_else(unsupported)?.value(i)),
        DataType::Int64 => Value::from(any.downcast_ref::<Int64Array>().ok_or_else(unsupported)?.value(i)),
        DataType::Int32 => Value::from(any.downcast_ref::<Int32Array>().ok_or_else(unsupported)?.value(i)),
        DataType::Float64 => float_value(any.downcast_ref::<Float64Array>().ok_or_else(unsupported)?.value(i)),
        DataType::Float32 => float_value(f64::from(
            any.downcast_ref::<Float32Array>().ok_or_else(unsupported)?.value(i),
        )),
        _ => return Err(unsupported()),
    };
    Ok(value)
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

// ============================================================================
// PARQUET I/O + COLUMN HELPERS
// ============================================================================

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

fn write_single_batch(batch: &RecordBatch) -> Result<Bytes> {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, batch.schema(), Some(writer_properties()))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn read_batches(bytes: &Bytes) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch?);
    }
    Ok((schema, batches))
}

fn col_string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    col_string_optional(batch, name)?
        .ok_or_else(|| Error::codec(format!("missing required column '{name}'")))
}

fn col_string_optional<'a>(batch: &'a RecordBatch, name: &str) -> Result<Option<&'a StringArray>> {
    let Ok(idx) = batch.schema().index_of(name) else {
        return Ok(None);
    };
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .map(Some)
        .ok_or_else(|| Error::codec(format!("column '{name}' is not StringArray")))
}

fn col_bool_optional<'a>(batch: &'a RecordBatch, name: &str) -> Result<Option<&'a BooleanArray>> {
    let Ok(idx) = batch.schema().index_of(name) else {
        return Ok(None);
    };
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<BooleanArray>()
        .map(Some)
        .ok_or_else(|| Error::codec(format!("column '{name}' is not BooleanArray")))
}

fn opt_str(col: Option<&StringArray>, i: usize) -> Option<String> {
    let col = col?;
    if col.is_null(i) {
        None
    } else {
        Some(col.value(i).to_string())
    }
}

fn required_str(col: &StringArray, i: usize, name: &str) -> Result<String> {
    opt_str(Some(col), i).ok_or_else(|| Error::codec(format!("null in required column '{name}' at row {i}")))
}

fn opt_bool(col: Option<&BooleanArray>, i: usize) -> Option<bool> {
    let col = col?;
    if col.is_null(i) {
        None
    } else {
        Some(col.value(i))
    }
}

fn parse_date(s: &str, name: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| Error::codec(format!("bad date '{s}' in column '{name}': {e}")))
}

fn opt_date(col: Option<&StringArray>, i: usize, name: &str) -> Result<Option<NaiveDate>> {
    opt_str(col, i).map(|s| parse_date(&s, name)).transpose()
}

fn required_date(col: &StringArray, i: usize, name: &str) -> Result<NaiveDate> {
    parse_date(&required_str(col, i, name)?, name)
}

// ============================================================================
// TESTS
// ============================================================================
