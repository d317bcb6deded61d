// 📦 Delta Store - per-run, per-chunk partial output + completion markers
//
// Layout (remote, and mirrored locally under data_dir):
//   {staging}/{run}/{chunk}/observations.parquet
//   {staging}/{run}/{chunk}/bridges.parquet
//   {staging}/{run}/{chunk}/catalog.parquet
//   {staging}/{run}/{chunk}/index_events.parquet
//   {staging}/{run}/{chunk}/{kind}_bin{bin}.parquet
//   {staging}/{run}/{chunk}/_SUCCESS
//
// `_SUCCESS` is the only completeness signal. A chunk without it is never
// merged, whatever data files it holds, and only the files the marker lists
// are read. The marker is always made durable after (never with) the data it
// vouches for.

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::bins::BinId;
use crate::codec;
use crate::config::Config;
use crate::entities::{CatalogRecord, DetailFrame, IdentityBridge, IndexEvent, RawObservation};
use crate::error::{Error, Result};
use crate::store::{ObjectStore, RemoteRepo};
use crate::table::{chunk_dir, run_dir, DeltaTable, TableData, SUCCESS_MARKER};

// ============================================================================
// TARGET + MARKER
// ============================================================================

/// Where workers write their deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaTarget {
    /// Files under `{data_dir}/{staging}`; the merge host must see them.
    Local,
    /// Committed to the shared repository under `{staging}`.
    Remote,
}

impl DeltaTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Some(DeltaTarget::Local),
            "remote" => Some(DeltaTarget::Remote),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaTarget::Local => "local",
            DeltaTarget::Remote => "remote",
        }
    }
}

/// Content of a `_SUCCESS` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMarker {
    pub run_id: String,
    pub chunk_id: String,
    /// Delta file names the chunk holds.
    pub tables: Vec<String>,
    pub written_at: DateTime<Utc>,
}

// ============================================================================
// COLLECTED RUN
// ============================================================================

/// Everything the complete chunks of one run produced, concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedRun {
    pub observations: Vec<RawObservation>,
    pub bridges: Vec<IdentityBridge>,
    pub catalog: Vec<CatalogRecord>,
    pub index_events: Vec<IndexEvent>,
    /// (detail kind, declared bin) → rows.
    pub details: BTreeMap<(String, BinId), DetailFrame>,
    /// Complete chunks that were merged, sorted.
    pub chunks: Vec<String>,
    /// Chunks skipped for lack of a marker, sorted.
    pub skipped: Vec<String>,
}

impl CollectedRun {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
            && self.bridges.is_empty()
            && self.catalog.is_empty()
            && self.index_events.is_empty()
            && self.details.is_empty()
    }

    /// Detail rows regrouped per kind, still under their declared bins.
    pub fn details_by_kind(&self) -> BTreeMap<String, BTreeMap<BinId, DetailFrame>> {
        let mut by_kind: BTreeMap<String, BTreeMap<BinId, DetailFrame>> = BTreeMap::new();
        for ((kind, bin), frame) in &self.details {
            by_kind
                .entry(kind.clone())
                .or_default()
                .entry(bin.clone())
                .or_default()
                .extend(frame.clone());
        }
        by_kind
    }

    fn absorb(&mut self, table: &DeltaTable, data: TableData) -> Result<()> {
        match (table, data) {
            (DeltaTable::Observations, TableData::Observations(rows)) => self.observations.extend(rows),
            (DeltaTable::Bridges, TableData::Bridges(rows)) => self.bridges.extend(rows),
            (DeltaTable::Catalog, TableData::Catalog(rows)) => self.catalog.extend(rows),
            (DeltaTable::IndexEvents, TableData::IndexHistory(rows)) => self.index_events.extend(rows),
            (DeltaTable::Detail { kind, bin }, TableData::Detail(frame)) => {
                self.details
                    .entry((kind.clone(), bin.clone()))
                    .or_default()
                    .extend(frame);
            }
            (table, data) => {
                return Err(Error::InvalidInput(format!(
                    "delta {} decoded as {} data",
                    table.file_name(),
                    data.kind().name()
                )))
            }
        }
        Ok(())
    }
}

// ============================================================================
// DELTA STORE
// ============================================================================

pub struct DeltaStore<R> {
    store: ObjectStore<R>,
    target: DeltaTarget,
    prefix: String,
    local_root: PathBuf,
    list_retries: u32,
    list_retry_delay: Duration,
    /// chunk dir → delta files written by this process, for the marker.
    written: BTreeMap<String, BTreeSet<String>>,
}

impl<R: RemoteRepo> DeltaStore<R> {
    pub fn new(remote: R, config: &Config) -> Self {
        DeltaStore {
            store: ObjectStore::new(remote, config.retry.clone(), config.commit_batch_size),
            target: config.delta_target,
            prefix: config.staging_prefix.clone(),
            local_root: config.local_staging_root(),
            list_retries: config.list_retries,
            list_retry_delay: config.list_retry_delay,
            written: BTreeMap::new(),
        }
    }

    pub fn target(&self) -> DeltaTarget {
        self.target
    }

    fn local_chunk_dir(&self, run_id: &str, chunk_id: &str) -> PathBuf {
        self.local_root.join(run_id).join(chunk_id)
    }

    // ------------------------------------------------------------------------
    // worker side
    // ------------------------------------------------------------------------

    /// Persist one partition of a chunk's output. Empty data is skipped.
    pub async fn write_delta(
        &mut self,
        table: &DeltaTable,
        run_id: &str,
        chunk_id: &str,
        data: TableData,
    ) -> Result<()> {
        if data.kind() != table.kind() {
            return Err(Error::InvalidInput(format!(
                "cannot write {} data as delta {}",
                data.kind().name(),
                table.file_name()
            )));
        }
        if data.is_empty() {
            debug!(run_id, chunk_id, table = %table.file_name(), "empty delta skipped");
            return Ok(());
        }
        if self.is_sealed(run_id, chunk_id).await? {
            return Err(Error::ChunkSealed {
                run_id: run_id.to_string(),
                chunk_id: chunk_id.to_string(),
            });
        }

        let content = codec::encode(&data)?;
        let file = table.file_name();
        match self.target {
            DeltaTarget::Local => {
                let dir = self.local_chunk_dir(run_id, chunk_id);
                fs::create_dir_all(&dir)?;
                write_atomically(&dir.join(&file), &content)?;
            }
            DeltaTarget::Remote => {
                let path = format!("{}/{}", chunk_dir(&self.prefix, run_id, chunk_id), file);
                self.store.put_file(path, content);
            }
        }

        info!(run_id, chunk_id, table = %file, rows = data.len(), target = self.target.as_str(), "delta written");
        self.written
            .entry(chunk_dir(&self.prefix, run_id, chunk_id))
            .or_default()
            .insert(file);
        Ok(())
    }

    /// Seal a chunk. Data first, marker second, in separate commits.
    pub async fn mark_chunk_done(&mut self, run_id: &str, chunk_id: &str) -> Result<ChunkMarker> {
        let dir = chunk_dir(&self.prefix, run_id, chunk_id);
        let marker = ChunkMarker {
            run_id: run_id.to_string(),
            chunk_id: chunk_id.to_string(),
            tables: self
                .written
                .get(&dir)
                .map(|t| t.iter().cloned().collect())
                .unwrap_or_default(),
            written_at: Utc::now(),
        };
        let content = serde_json::to_vec_pretty(&marker)?;

        match self.target {
            DeltaTarget::Local => {
                let local = self.local_chunk_dir(run_id, chunk_id);
                fs::create_dir_all(&local)?;
                write_atomically(&local.join(SUCCESS_MARKER), &content)?;
            }
            DeltaTarget::Remote => {
                if self.store.has_pending() {
                    self.store.commit(&format!("deltas {run_id}/{chunk_id}")).await?;
                }
                self.store.put_file(format!("{dir}/{SUCCESS_MARKER}"), content.into());
                self.store.commit(&format!("mark {run_id}/{chunk_id} done")).await?;
            }
        }

        info!(run_id, chunk_id, tables = marker.tables.len(), "chunk marked done");
        self.written.remove(&dir);
        Ok(marker)
    }

    pub async fn is_sealed(&self, run_id: &str, chunk_id: &str) -> Result<bool> {
        match self.target {
            DeltaTarget::Local => Ok(self
                .local_chunk_dir(run_id, chunk_id)
                .join(SUCCESS_MARKER)
                .exists()),
            DeltaTarget::Remote => {
                let path = format!("{}/{}", chunk_dir(&self.prefix, run_id, chunk_id), SUCCESS_MARKER);
                Ok(self.store.read_back(&path).await?.is_some())
            }
        }
    }

    // ------------------------------------------------------------------------
    // merge side
    // ------------------------------------------------------------------------

    /// Gather every complete chunk of `run_id`, local first, then remote.
    ///
    /// Any read or decode failure aborts the whole collection: reconciling
    /// against a known-incomplete run is worse than not reconciling.
    pub async fn collect_run(&self, run_id: &str) -> Result<CollectedRun> {
        let mut run = CollectedRun::default();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        self.collect_local(run_id, &mut run, &mut seen)?;
        self.collect_remote(run_id, &mut run, &mut seen).await?;

        // a chunk unsealed on one side but sealed on the other was merged
        run.skipped.retain(|c| !seen.contains(c));
        run.chunks = seen.into_iter().collect();
        run.skipped.sort();
        run.skipped.dedup();
        info!(
            run_id,
            chunks = run.chunks.len(),
            skipped = run.skipped.len(),
            observations = run.observations.len(),
            bridges = run.bridges.len(),
            catalog = run.catalog.len(),
            index_events = run.index_events.len(),
            detail_partitions = run.details.len(),
            "run collected"
        );
        if !run.skipped.is_empty() {
            warn!(run_id, skipped = ?run.skipped, "incomplete chunks ignored");
        }
        Ok(run)
    }

    fn collect_local(&self, run_id: &str, run: &mut CollectedRun, seen: &mut BTreeSet<String>) -> Result<()> {
        let root = self.local_root.join(run_id);
        if !root.is_dir() {
            return Ok(());
        }

        let mut chunk_dirs: Vec<(String, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                chunk_dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
            }
        }
        chunk_dirs.sort();

        for (chunk_id, dir) in chunk_dirs {
            let marker_path = dir.join(SUCCESS_MARKER);
            if !marker_path.exists() {
                run.skipped.push(chunk_id);
                continue;
            }
            let mut present: BTreeSet<String> = BTreeSet::new();
            for entry in fs::read_dir(&dir)? {
                present.insert(entry?.file_name().to_string_lossy().into_owned());
            }
            let origin = dir.display().to_string();
            let marker = parse_marker(&fs::read(&marker_path)?, &origin)?;
            for table in listed_tables(&marker, &present, &origin)? {
                let path = dir.join(table.file_name());
                let content = Bytes::from(fs::read(&path)?);
                let data = codec::decode(table.kind(), &content)
                    .map_err(|e| Error::codec(format!("{}: {e}", path.display())))?;
                run.absorb(&table, data)?;
            }
            debug!(run_id, chunk_id = %chunk_id, "local chunk collected");
            seen.insert(chunk_id);
        }
        Ok(())
    }

    async fn collect_remote(&self, run_id: &str, run: &mut CollectedRun, seen: &mut BTreeSet<String>) -> Result<()> {
        let prefix = format!("{}/", run_dir(&self.prefix, run_id));
        let paths = self.list_with_propagation_retry(&prefix).await?;

        // chunk → file names
        let mut chunks: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for path in paths {
            let Some(rest) = path.strip_prefix(&prefix) else { continue };
            let Some((chunk_id, file)) = rest.split_once('/') else { continue };
            if file.contains('/') {
                continue;
            }
            chunks.entry(chunk_id.to_string()).or_default().insert(file.to_string());
        }

        for (chunk_id, files) in chunks {
            if seen.contains(&chunk_id) {
                debug!(run_id, chunk_id = %chunk_id, "chunk already collected locally");
                continue;
            }
            if !files.contains(SUCCESS_MARKER) {
                run.skipped.push(chunk_id);
                continue;
            }
            let origin = format!("{prefix}{chunk_id}");
            let marker_path = format!("{origin}/{SUCCESS_MARKER}");
            let marker_bytes = self
                .store
                .read_back(&marker_path)
                .await?
                .ok_or_else(|| Error::InvalidInput(format!("listed marker {marker_path} vanished before download")))?;
            let marker = parse_marker(&marker_bytes, &origin)?;
            for table in listed_tables(&marker, &files, &origin)? {
                let path = format!("{prefix}{chunk_id}/{}", table.file_name());
                let content = self
                    .store
                    .read_back(&path)
                    .await?
                    .ok_or_else(|| Error::InvalidInput(format!("listed delta {path} vanished before download")))?;
                let data = codec::decode(table.kind(), &content)
                    .map_err(|e| Error::codec(format!("{path}: {e}")))?;
                run.absorb(&table, data)?;
            }
            debug!(run_id, chunk_id = %chunk_id, "remote chunk collected");
            seen.insert(chunk_id);
        }
        Ok(())
    }

    /// Listings can lag behind commits; an empty listing is retried a few
    /// times with a growing pause before it is believed.
    async fn list_with_propagation_retry(&self, prefix: &str) -> Result<Vec<String>> {
        let mut attempt = 0;
        loop {
            let paths = self.store.list(prefix).await?;
            if !paths.is_empty() || attempt >= self.list_retries {
                return Ok(paths);
            }
            attempt += 1;
            let delay = self.list_retry_delay * attempt;
            debug!(prefix, attempt, delay_ms = delay.as_millis() as u64, "empty listing, waiting for propagation");
            tokio::time::sleep(delay).await;
        }
    }

    // ------------------------------------------------------------------------
    // garbage collection
    // ------------------------------------------------------------------------

    /// Delete every staged delta of `run_id`, remote and local. Returns the
    /// number of remote files removed.
    pub async fn cleanup_run(&mut self, run_id: &str) -> Result<usize> {
        self.cleanup_runs(&[run_id.to_string()], &format!("cleanup deltas for run {run_id}"))
            .await
    }

    /// Delete runs whose id embeds a date older than `ttl`. Runs without a
    /// recognizable date are kept. Returns the removed run ids.
    pub async fn cleanup_expired(&mut self, now: DateTime<Utc>, ttl: Duration) -> Result<Vec<String>> {
        let prefix = format!("{}/", self.prefix.trim_end_matches('/'));
        let mut run_ids: BTreeSet<String> = BTreeSet::new();
        for path in self.store.list(&prefix).await? {
            if let Some((run_id, _)) = path.strip_prefix(&prefix).and_then(|rest| rest.split_once('/')) {
                run_ids.insert(run_id.to_string());
            }
        }
        if self.local_root.is_dir() {
            for entry in fs::read_dir(&self.local_root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    run_ids.insert(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let mut expired = Vec::new();
        for run_id in run_ids {
            match run_timestamp(&run_id) {
                Some(stamp) if now.signed_duration_since(stamp) > ttl => expired.push(run_id),
                Some(_) => {}
                None => info!(run_id = %run_id, "run id carries no date, keeping its deltas"),
            }
        }
        if expired.is_empty() {
            return Ok(expired);
        }

        let message = format!("cleanup expired deltas ({} runs)", expired.len());
        self.cleanup_runs(&expired, &message).await?;
        Ok(expired)
    }

    async fn cleanup_runs(&mut self, run_ids: &[String], message: &str) -> Result<usize> {
        let mut paths = Vec::new();
        for run_id in run_ids {
            paths.extend(self.store.list(&format!("{}/", run_dir(&self.prefix, run_id))).await?);

            let local = self.local_root.join(run_id);
            if local.is_dir() {
                fs::remove_dir_all(&local)?;
                debug!(run_id = %run_id, dir = %local.display(), "local deltas removed");
            }
        }

        let removed = paths.len();
        if removed > 0 {
            self.store.delete(paths);
            self.store.commit(message).await?;
        }
        info!(runs = run_ids.len(), files = removed, "deltas cleaned up");
        Ok(removed)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_marker(content: &[u8], origin: &str) -> Result<ChunkMarker> {
    serde_json::from_slice(content).map_err(|e| Error::InvalidInput(format!("{origin}/{SUCCESS_MARKER}: {e}")))
}

/// The delta files a marker vouches for, sorted.
///
/// A listed file that is absent fails the collection. Delta files the
/// marker does not list are left over from an earlier attempt and ignored.
fn listed_tables(marker: &ChunkMarker, present: &BTreeSet<String>, origin: &str) -> Result<Vec<DeltaTable>> {
    let mut tables = Vec::with_capacity(marker.tables.len());
    for name in &marker.tables {
        let table = DeltaTable::from_file_name(name)
            .ok_or_else(|| Error::InvalidInput(format!("{origin}: marker lists unknown delta '{name}'")))?;
        if !present.contains(name) {
            return Err(Error::InvalidInput(format!("{origin}: marker lists {name} but the file is missing")));
        }
        tables.push(table);
    }
    for name in present {
        if DeltaTable::from_file_name(name).is_some() && !marker.tables.contains(name) {
            warn!(chunk = %origin, file = %name, "delta file not listed in the marker; ignored");
        }
    }
    tables.sort();
    Ok(tables)
}

/// Write via a temp file + rename so a killed worker never leaves a torn file.
fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Fresh run id, `YYYYMMDDHHMMSS-xxxxxxxx`. The leading timestamp is what
/// expired-delta cleanup reads back.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%d%H%M%S"), &uuid[..8])
}

/// Date embedded in a run id: `YYYY-MM-DD`, `YYYYMMDD` (also the head of a
/// longer digit run such as `YYYYMMDDHHMMSS`) or a 10-digit unix timestamp.
pub fn run_timestamp(run_id: &str) -> Option<DateTime<Utc>> {
    let chars: Vec<char> = run_id.chars().collect();

    for window in chars.windows(10) {
        let candidate: String = window.iter().collect();
        if let Ok(date) = NaiveDate::parse_from_str(&candidate, "%Y-%m-%d") {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    let mut digit_runs: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in chars {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            digit_runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        digit_runs.push(current);
    }

    for digits in digit_runs {
        if digits.len() == 10 {
            if let Some(stamp) = digits.parse::<i64>().ok().and_then(|s| DateTime::from_timestamp(s, 0)) {
                return Some(stamp);
            }
        }
        if digits.len() >= 8 {
            if let Ok(date) = NaiveDate::parse_from_str(&digits[..8], "%Y%m%d") {
                return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
            }
        }
    }
    None
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRepo, RetryPolicy};
    use serde_json::json;
    use std::sync::Arc;

    fn config(dir: &Path, target: DeltaTarget) -> Config {
        Config {
            data_dir: dir.to_path_buf(),
            delta_target: target,
            retry: RetryPolicy::immediate(),
            list_retry_delay: Duration::ZERO,
            ..Config::default()
        }
    }

    fn observations(ids: &[&str]) -> TableData {
        TableData::Observations(
            ids.iter()
                .map(|id| RawObservation {
                    registry_id: Some(id.to_string()),
                    name: Some(format!("{id} 株式会社")),
                    source: Some("filings".into()),
                    ..RawObservation::default()
                })
                .collect(),
        )
    }

    fn marker_json(run_id: &str, chunk_id: &str, tables: &[&str]) -> Bytes {
        let marker = ChunkMarker {
            run_id: run_id.into(),
            chunk_id: chunk_id.into(),
            tables: tables.iter().map(|t| t.to_string()).collect(),
            written_at: Utc::now(),
        };
        Bytes::from(serde_json::to_vec(&marker).unwrap())
    }

    fn detail(national: &str) -> TableData {
        let mut row = crate::entities::DetailRow::new();
        row.insert("national_id".into(), json!(national));
        row.insert("doc_id".into(), json!("S1"));
        TableData::Detail(DetailFrame::new(vec![row]))
    }

    #[tokio::test]
    async fn test_local_chunks_without_marker_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        let mut deltas = DeltaStore::new(repo, &config(tmp.path(), DeltaTarget::Local));

        deltas
            .write_delta(&DeltaTable::Observations, "run-20240601", "c1", observations(&["E1", "E2"]))
            .await
            .unwrap();
        let detail_table = DeltaTable::Detail {
            kind: "financial_values".into(),
            bin: BinId::National("46".into()),
        };
        deltas
            .write_delta(&detail_table, "run-20240601", "c1", detail("1010001008846"))
            .await
            .unwrap();
        let marker = deltas.mark_chunk_done("run-20240601", "c1").await.unwrap();
        assert_eq!(marker.tables.len(), 2);

        // crashed worker: data, no marker
        deltas
            .write_delta(&DeltaTable::Observations, "run-20240601", "c2", observations(&["E3"]))
            .await
            .unwrap();

        let run = deltas.collect_run("run-20240601").await.unwrap();
        assert_eq!(run.chunks, vec!["c1"]);
        assert_eq!(run.skipped, vec!["c2"]);
        assert_eq!(run.observations.len(), 2);
        assert_eq!(run.details.len(), 1);
        println!("✅ incomplete chunk ignored");
    }

    #[tokio::test]
    async fn test_remote_marker_commits_after_data() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        let mut deltas = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Remote));

        deltas
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();
        assert!(repo.paths().is_empty());
        deltas.mark_chunk_done("r1", "c1").await.unwrap();

        assert_eq!(repo.commit_messages(), vec!["deltas r1/c1", "mark r1/c1 done"]);
        assert!(repo.get("temp/deltas/r1/c1/_SUCCESS").is_some());
        assert!(repo.get("temp/deltas/r1/c1/observations.parquet").is_some());
    }

    #[tokio::test]
    async fn test_sealed_chunk_rejects_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        let mut deltas = DeltaStore::new(repo, &config(tmp.path(), DeltaTarget::Remote));
        deltas.mark_chunk_done("r1", "c1").await.unwrap();

        let err = deltas
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChunkSealed { .. }));
    }

    #[tokio::test]
    async fn test_collect_waits_for_listing_propagation() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        let mut deltas = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Remote));
        deltas
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();
        deltas.mark_chunk_done("r1", "c1").await.unwrap();

        repo.hide_listings(2);
        let before = repo.list_calls();
        let run = deltas.collect_run("r1").await.unwrap();
        assert_eq!(run.chunks, vec!["c1"]);
        assert_eq!(repo.list_calls() - before, 3);
    }

    #[tokio::test]
    async fn test_local_and_remote_chunks_are_unioned_once() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());

        let mut local = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Local));
        local
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();
        local.mark_chunk_done("r1", "c1").await.unwrap();

        let mut remote = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Remote));
        for chunk in ["c1", "c2"] {
            remote
                .write_delta(&DeltaTable::Observations, "r1", chunk, observations(&["E2"]))
                .await
                .unwrap();
            remote.mark_chunk_done("r1", chunk).await.unwrap();
        }

        let run = remote.collect_run("r1").await.unwrap();
        assert_eq!(run.chunks, vec!["c1", "c2"]);
        // c1 came from local only
        assert_eq!(run.observations.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_delta_aborts_collection() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        repo.insert("temp/deltas/r1/c1/observations.parquet", Bytes::from_static(b"not parquet"));
        repo.insert("temp/deltas/r1/c1/_SUCCESS", marker_json("r1", "c1", &["observations.parquet"]));
        let deltas = DeltaStore::new(repo, &config(tmp.path(), DeltaTarget::Remote));

        let err = deltas.collect_run("r1").await.unwrap_err();
        assert!(err.to_string().contains("observations.parquet"));
    }

    #[tokio::test]
    async fn test_only_files_listed_in_the_marker_are_merged() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        let cfg = config(tmp.path(), DeltaTarget::Local);

        // left behind by an earlier attempt at the same chunk
        let dir = cfg.local_staging_root().join("r1").join("c1");
        fs::create_dir_all(&dir).unwrap();
        let stale = codec::encode(&TableData::Bridges(vec![IdentityBridge::new("E1", "E2")])).unwrap();
        fs::write(dir.join("bridges.parquet"), &stale).unwrap();

        let mut deltas = DeltaStore::new(repo, &cfg);
        deltas
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();
        let marker = deltas.mark_chunk_done("r1", "c1").await.unwrap();
        assert_eq!(marker.tables, vec!["observations.parquet"]);

        let run = deltas.collect_run("r1").await.unwrap();
        assert_eq!(run.observations.len(), 1);
        assert!(run.bridges.is_empty());

        // a vouched-for file that disappeared is an error, not an empty chunk
        fs::remove_file(dir.join("observations.parquet")).unwrap();
        let err = deltas.collect_run("r1").await.unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_remote_marker_limits_collected_files() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        let stale = codec::encode(&TableData::Bridges(vec![IdentityBridge::new("E1", "E2")])).unwrap();
        repo.insert("temp/deltas/r1/c1/bridges.parquet", stale);
        repo.insert(
            "temp/deltas/r1/c1/observations.parquet",
            codec::encode(&observations(&["E1", "E2"])).unwrap(),
        );
        repo.insert("temp/deltas/r1/c1/_SUCCESS", marker_json("r1", "c1", &["observations.parquet"]));
        let deltas = DeltaStore::new(repo, &config(tmp.path(), DeltaTarget::Remote));

        let run = deltas.collect_run("r1").await.unwrap();
        assert_eq!(run.observations.len(), 2);
        assert!(run.bridges.is_empty());
    }

    #[tokio::test]
    async fn test_chunk_sealed_remotely_is_not_also_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());

        // local attempt died before sealing, the remote retry finished
        let mut local = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Local));
        local
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();
        let mut remote = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Remote));
        remote
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();
        remote.mark_chunk_done("r1", "c1").await.unwrap();

        let run = remote.collect_run("r1").await.unwrap();
        assert_eq!(run.chunks, vec!["c1"]);
        assert!(run.skipped.is_empty());
        assert_eq!(run.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired_keeps_recent_and_undated_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        for run in ["run-20240101", "run-2024-06-10", "adhoc"] {
            repo.insert(format!("temp/deltas/{run}/c1/_SUCCESS"), Bytes::from_static(b"{}"));
        }
        let mut deltas = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Remote));

        let now = NaiveDate::from_ymd_opt(2024, 6, 10)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap()
            .and_utc();
        let removed = deltas
            .cleanup_expired(now, Duration::from_secs(24 * 3600))
            .await
            .unwrap();

        assert_eq!(removed, vec!["run-20240101"]);
        assert_eq!(
            repo.paths(),
            vec!["temp/deltas/adhoc/c1/_SUCCESS", "temp/deltas/run-2024-06-10/c1/_SUCCESS"]
        );
    }

    #[tokio::test]
    async fn test_cleanup_run_removes_local_and_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Arc::new(MemoryRepo::new());
        repo.insert("temp/deltas/r1/c9/_SUCCESS", Bytes::from_static(b"{}"));
        let mut deltas = DeltaStore::new(repo.clone(), &config(tmp.path(), DeltaTarget::Local));
        deltas
            .write_delta(&DeltaTable::Observations, "r1", "c1", observations(&["E1"]))
            .await
            .unwrap();

        assert_eq!(deltas.cleanup_run("r1").await.unwrap(), 1);
        assert!(repo.paths().is_empty());
        assert!(!tmp.path().join("temp/deltas/r1").exists());
    }

    #[test]
    fn test_run_timestamp_forms() {
        let day = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());
        assert_eq!(run_timestamp("daily-20240601"), day(2024, 6, 1));
        assert_eq!(run_timestamp("20240601093000"), day(2024, 6, 1));
        assert_eq!(run_timestamp("backfill_2023-12-31_b"), day(2023, 12, 31));
        assert_eq!(run_timestamp("job-1717200000"), DateTime::from_timestamp(1_717_200_000, 0));
        assert_eq!(run_timestamp("adhoc"), None);
        assert_eq!(run_timestamp("c42"), None);
    }

    #[test]
    fn test_generated_run_ids_carry_their_date() {
        let now = DateTime::parse_from_rfc3339("2024-06-01T09:30:00Z").unwrap().with_timezone(&Utc);
        let id = new_run_id(now);
        assert!(id.starts_with("20240601093000-"));
        assert_ne!(id, new_run_id(now));
        assert_eq!(run_timestamp(&id).map(|t| t.date_naive()), Some(now.date_naive()));
    }

    #[test]
    fn test_delta_target_parse() {
        assert_eq!(DeltaTarget::parse("Remote"), Some(DeltaTarget::Remote));
        assert_eq!(DeltaTarget::parse("s3"), None);
    }
}
