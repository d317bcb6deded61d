// 🧭 Merge Coordinator - one run, all or nothing
//
// run(run_id, as_of):
//   snapshot the five top-level tables → collect complete chunks → load
//   state → reconcile → merge catalog, listing and index history → merge
//   detail bins → stage → commit → read back and verify → clean up the
//   run's deltas
//
// Any failure after the snapshot triggers rollback: discard staged writes,
// re-stage the snapshot verbatim (deleting files the run created), commit,
// read back. A commit only counts once it has been re-observed remotely.
//
// Exactly one coordinator mutates the master tables for a given run; the
// remote's conflict detection is the only lock.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::delta::{CollectedRun, DeltaStore};
use crate::detail::{audit_bin, merge_bin, route_incoming, DetailSpec};
use crate::entities::{merge_catalog, merge_index_history, merge_listing_history};
use crate::error::{Error, Result};
use crate::reconciliation::{ReconcileInput, ReconcileStats, ReconciliationEngine};
use crate::snapshot::Snapshot;
use crate::store::{sha256_hex, CommitReport, ObjectStore, RemoteRepo};
use crate::table::{Table, TableData};

/// Longest failure cause quoted in a rollback commit message.
const MAX_CAUSE_IN_MESSAGE: usize = 120;

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub run_id: String,
    pub snapshot_id: String,
    pub stats: ReconcileStats,
    pub chunks: Vec<String>,
    pub skipped_chunks: Vec<String>,
    pub detail_bins: usize,
    pub misplaced_rows: usize,
    pub batches: usize,
    pub files_written: usize,
    pub files_verified: usize,
}

impl MergeReport {
    pub fn summary(&self) -> String {
        format!(
            "Run {}: {} chunks merged ({} skipped), {} detail bins, {} files in {} batches, {} verified",
            self.run_id,
            self.chunks.len(),
            self.skipped_chunks.len(),
            self.detail_bins,
            self.files_written,
            self.batches,
            self.files_verified
        )
    }
}

/// How a failed run ended. The exit code tells an operator whether a bare
/// re-run is safe (1) or the repository needs a human (2).
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Failed before anything was staged; nothing to undo.
    #[error("merge run {run_id} aborted before staging: {cause}")]
    Aborted {
        run_id: String,
        #[source]
        cause: Error,
    },

    /// Failed, and the pre-run state was restored and verified.
    #[error("merge run {run_id} failed and was rolled back: {cause}")]
    RolledBack {
        run_id: String,
        #[source]
        cause: Error,
    },

    /// Failed, and restoring the snapshot failed too.
    #[error("merge run {run_id} failed ({cause}) and rollback failed: {rollback}")]
    RollbackFailed {
        run_id: String,
        cause: Error,
        #[source]
        rollback: Error,
    },
}

impl MergeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            MergeError::Aborted { .. } | MergeError::RolledBack { .. } => 1,
            MergeError::RollbackFailed { .. } => 2,
        }
    }
}

// ============================================================================
// MERGE COORDINATOR
// ============================================================================

pub struct MergeCoordinator<R> {
    store: ObjectStore<R>,
    deltas: DeltaStore<R>,
    engine: ReconciliationEngine,
    detail_specs: Vec<DetailSpec>,
    verify_sample: usize,
}

impl<R: RemoteRepo + Clone> MergeCoordinator<R> {
    pub fn new(remote: R, config: &Config) -> Self {
        MergeCoordinator {
            store: ObjectStore::new(remote.clone(), config.retry.clone(), config.commit_batch_size),
            deltas: DeltaStore::new(remote, config),
            engine: ReconciliationEngine::with_baseline_source(config.baseline_source.clone()),
            detail_specs: config.detail_specs.clone(),
            verify_sample: config.verify_sample,
        }
    }

    pub fn store(&self) -> &ObjectStore<R> {
        &self.store
    }

    pub async fn run(&mut self, run_id: &str, as_of: NaiveDate) -> std::result::Result<MergeReport, MergeError> {
        info!(run_id, %as_of, "merge run started");

        let top_level: Vec<String> = Table::top_level().iter().map(Table::path).collect();
        let mut snapshot = Snapshot::capture(&self.store, run_id, &top_level)
            .await
            .map_err(|cause| MergeError::Aborted {
                run_id: run_id.to_string(),
                cause,
            })?;

        match self.apply(run_id, as_of, &mut snapshot).await {
            Ok(report) => {
                info!("{}", report.summary());
                if !report.chunks.is_empty() {
                    if let Err(e) = self.deltas.cleanup_run(run_id).await {
                        warn!(run_id, error = %e, "delta cleanup failed; gc will retry");
                    }
                }
                Ok(report)
            }
            Err(cause) => {
                error!(run_id, error = %cause, "merge run failed, rolling back");
                match self.rollback(run_id, &snapshot, &cause).await {
                    Ok(()) => {
                        warn!(run_id, snapshot_id = %snapshot.snapshot_id, "rollback complete; a re-run is safe");
                        Err(MergeError::RolledBack {
                            run_id: run_id.to_string(),
                            cause,
                        })
                    }
                    Err(rollback) => {
                        error!(run_id, error = %rollback, "ROLLBACK FAILED; repository needs manual repair");
                        Err(MergeError::RollbackFailed {
                            run_id: run_id.to_string(),
                            cause,
                            rollback,
                        })
                    }
                }
            }
        }
    }

    async fn apply(&mut self, run_id: &str, as_of: NaiveDate, snapshot: &mut Snapshot) -> Result<MergeReport> {
        let collected = self.deltas.collect_run(run_id).await?;
        let mut report = MergeReport {
            run_id: run_id.to_string(),
            snapshot_id: snapshot.snapshot_id.clone(),
            chunks: collected.chunks.clone(),
            skipped_chunks: collected.skipped.clone(),
            ..MergeReport::default()
        };
        if collected.is_empty() {
            info!(run_id, "no complete chunks with data; nothing to merge");
            return Ok(report);
        }

        // state
        let catalog = self.store.load(&Table::Catalog).await?.into_catalog()?;
        let master = self.store.load(&Table::Master).await?.into_master()?;
        let name_history = self.store.load(&Table::NameHistory).await?.into_name_history()?;
        let listing_history = self.store.load(&Table::ListingHistory).await?.into_listing_history()?;
        let index_history = self.store.load(&Table::IndexHistory).await?.into_index_history()?;

        // reconcile
        let detail_bins = self.plan_detail_bins(&collected, &mut report);
        let outcome = self.engine.update_master(ReconcileInput {
            master,
            name_history,
            observations: collected.observations,
            bridges: collected.bridges,
            as_of,
        });
        for rejection in &outcome.rejections {
            warn!(run_id, %rejection, "observation rejected");
        }
        let listing = merge_listing_history(listing_history, outcome.listing_events);
        let catalog = merge_catalog(catalog, collected.catalog);
        let index_history = merge_index_history(index_history, collected.index_events);

        // every path about to be staged must be in the snapshot first
        let bin_paths: Vec<String> = detail_bins.keys().map(Table::path).collect();
        snapshot.capture_more(&self.store, &bin_paths).await?;

        // detail bins
        for (table, (spec, incoming)) in detail_bins {
            let existing = self.store.load(&table).await?.into_detail()?;
            let merged = merge_bin(&spec, existing, incoming);
            if let Table::DetailBin { bin, .. } = &table {
                let audit = audit_bin(&spec, bin, &merged.frame);
                if !audit.is_clean() {
                    warn!(path = %table.path(), misplaced = audit.misplaced, duplicate_keys = audit.duplicate_keys, "detail bin audit found problems");
                }
            }
            self.store.stage(&table, TableData::Detail(merged.frame))?;
            report.detail_bins += 1;
        }

        // top-level
        self.store.stage(&Table::Catalog, TableData::Catalog(catalog))?;
        self.store.stage(&Table::Master, TableData::Master(outcome.master))?;
        self.store.stage(&Table::NameHistory, TableData::NameHistory(outcome.name_history))?;
        self.store.stage(&Table::ListingHistory, TableData::ListingHistory(listing))?;
        self.store.stage(&Table::IndexHistory, TableData::IndexHistory(index_history))?;
        report.stats = outcome.stats;

        let commit = self.store.commit(&format!("merge run {run_id}")).await?;
        report.batches = commit.batches;
        report.files_written = commit.written.len();
        report.files_verified = self.verify(&commit).await?;
        Ok(report)
    }

    /// Route incoming detail rows to the bins they really belong to.
    fn plan_detail_bins(
        &self,
        collected: &CollectedRun,
        report: &mut MergeReport,
    ) -> BTreeMap<Table, (DetailSpec, crate::entities::DetailFrame)> {
        let mut plan = BTreeMap::new();
        for (kind, declared) in collected.details_by_kind() {
            let spec = DetailSpec::lookup(&self.detail_specs, &kind);
            let routed = route_incoming(&kind, declared);
            report.misplaced_rows += routed.misplaced;
            for (bin, frame) in routed.bins {
                plan.insert(
                    Table::DetailBin {
                        kind: kind.clone(),
                        bin,
                    },
                    (spec.clone(), frame),
                );
            }
        }
        plan
    }

    /// Read back the top-level files plus a sample of the rest, bypassing
    /// the write buffer, and compare hashes with what was sent.
    async fn verify(&self, commit: &CommitReport) -> Result<usize> {
        let top_level: Vec<String> = Table::top_level().iter().map(Table::path).collect();
        let others: Vec<&String> = commit.written.keys().filter(|p| !top_level.contains(p)).collect();
        let step = (others.len() / self.verify_sample.max(1)).max(1);

        let mut targets: Vec<&String> = top_level.iter().filter(|p| commit.written.contains_key(*p)).collect();
        targets.extend(others.into_iter().step_by(step).take(self.verify_sample));

        for path in &targets {
            let expected = &commit.written[*path];
            let actual = self
                .store
                .read_back(path)
                .await?
                .map(|bytes| sha256_hex(&bytes));
            match actual {
                Some(hash) if &hash == expected => {}
                Some(hash) => {
                    return Err(Error::Verification {
                        path: path.to_string(),
                        reason: format!("sha256 {hash} does not match committed {expected}"),
                    })
                }
                None => {
                    return Err(Error::Verification {
                        path: path.to_string(),
                        reason: "file missing after commit".to_string(),
                    })
                }
            }
        }
        info!(files = targets.len(), "commit verified by read-back");
        Ok(targets.len())
    }

    async fn rollback(&mut self, run_id: &str, snapshot: &Snapshot, cause: &Error) -> Result<()> {
        self.store.discard_pending();
        let ops = snapshot.stage_restore(&mut self.store).await?;
        if ops > 0 {
            let mut reason = cause.to_string();
            if reason.len() > MAX_CAUSE_IN_MESSAGE {
                let cut = (0..=MAX_CAUSE_IN_MESSAGE)
                    .rev()
                    .find(|i| reason.is_char_boundary(*i))
                    .unwrap_or(0);
                reason.truncate(cut);
            }
            self.store
                .commit(&format!("ROLLBACK: merge run {run_id} ({reason})"))
                .await?;
        }
        snapshot.verify_restored(&self.store).await?;
        info!(run_id, files = snapshot.count(), "pre-run state restored");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
