// 📸 Snapshot - pre-run copy of every file a merge run may touch
//
// "Snapshot = consistent view at point in time"
//
// Captured before anything is staged. Each path maps to its raw bytes, or to
// None when the file did not exist yet. Rollback re-stages the bytes verbatim
// and deletes whatever the failed run created, then the restored state is
// verified by reading it back from the remote.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{ObjectStore, RemoteRepo};

#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Unique snapshot ID
    pub snapshot_id: String,
    pub taken_at: DateTime<Utc>,
    /// Usually the run id.
    pub label: String,
    files: BTreeMap<String, Option<Bytes>>,
}

impl Snapshot {
    pub fn new(label: impl Into<String>) -> Self {
        Snapshot {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            taken_at: Utc::now(),
            label: label.into(),
            files: BTreeMap::new(),
        }
    }

    /// Take a snapshot of `paths`, straight from the remote.
    pub async fn capture<R: RemoteRepo>(store: &ObjectStore<R>, label: &str, paths: &[String]) -> Result<Self> {
        let mut snapshot = Snapshot::new(label);
        snapshot.capture_more(store, paths).await?;
        info!(
            snapshot_id = %snapshot.snapshot_id,
            label,
            present = snapshot.present_count(),
            absent = snapshot.count() - snapshot.present_count(),
            "snapshot taken"
        );
        Ok(snapshot)
    }

    /// Add paths not captured yet. Already captured paths keep their
    /// original content.
    pub async fn capture_more<R: RemoteRepo>(&mut self, store: &ObjectStore<R>, paths: &[String]) -> Result<()> {
        for path in paths {
            if self.files.contains_key(path) {
                continue;
            }
            let content = store.read_back(path).await?;
            debug!(path = %path, present = content.is_some(), "captured");
            self.files.insert(path.clone(), content);
        }
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// `Some(None)` means captured as absent.
    pub fn get(&self, path: &str) -> Option<&Option<Bytes>> {
        self.files.get(path)
    }

    pub fn count(&self) -> usize {
        self.files.len()
    }

    pub fn present_count(&self) -> usize {
        self.files.values().filter(|c| c.is_some()).count()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.files.keys()
    }

    /// Stage the snapshot back onto `store`: captured bytes are re-put,
    /// files captured as absent are deleted if they exist now. Returns the
    /// number of staged ops. The caller commits.
    pub async fn stage_restore<R: RemoteRepo>(&self, store: &mut ObjectStore<R>) -> Result<usize> {
        let mut ops = 0;
        let mut created = Vec::new();
        for (path, content) in &self.files {
            match content {
                Some(bytes) => {
                    store.put_file(path.clone(), bytes.clone());
                    ops += 1;
                }
                None => {
                    if store.read_back(path).await?.is_some() {
                        created.push(path.clone());
                    }
                }
            }
        }
        ops += created.len();
        if !created.is_empty() {
            debug!(files = ?created, "removing files created by the failed run");
            store.delete(created);
        }
        Ok(ops)
    }

    /// Read every captured path back from the remote and compare.
    pub async fn verify_restored<R: RemoteRepo>(&self, store: &ObjectStore<R>) -> Result<()> {
        for (path, expected) in &self.files {
            let actual = store.read_back(path).await?;
            let ok = match (expected, &actual) {
                (Some(e), Some(a)) => e == a,
                (None, None) => true,
                _ => false,
            };
            if !ok {
                return Err(Error::Verification {
                    path: path.clone(),
                    reason: format!(
                        "expected {}, found {}",
                        describe(expected.as_ref()),
                        describe(actual.as_ref())
                    ),
                });
            }
        }
        Ok(())
    }
}

fn describe(content: Option<&Bytes>) -> String {
    match content {
        Some(b) => format!("{} bytes", b.len()),
        None => "no file".to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
