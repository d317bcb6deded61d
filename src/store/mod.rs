// 🗄️ Object Store Client - buffered, batched access to the shared repository
//
// Writes never go straight to the remote. `stage()` / `put_file()` /
// `delete()` record an op in PendingWrites; `load()` consults that buffer
// first (read-your-own-writes); `commit()` flushes it in fixed-size batches.
//
// Each batch is one atomic remote commit. The batches of a single
// `commit()` are NOT jointly atomic: if batch 4 of 5 fails, batches 1-3
// stay applied. Every op is a whole-file put or delete, so repeating a
// batch is harmless, and a failed commit keeps the full buffer for that.

pub mod memory;
pub mod retry;

#[cfg(feature = "remote")]
pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{Error, RemoteError, Result};
use crate::table::{Table, TableData};

pub use memory::MemoryRepo;
pub use retry::RetryPolicy;

#[cfg(feature = "remote")]
pub use http::HubRepo;

// ============================================================================
// REMOTE REPOSITORY SEAM
// ============================================================================

/// One file operation inside a remote commit.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOp {
    Put { path: String, content: Bytes },
    Delete { path: String },
}

impl CommitOp {
    pub fn path(&self) -> &str {
        match self {
            CommitOp::Put { path, .. } => path,
            CommitOp::Delete { path } => path,
        }
    }
}

/// A versioned dataset repository.
///
/// Implementations classify every failure into an `ErrorKind`; nothing
/// above this trait looks at HTTP status codes.
#[async_trait]
pub trait RemoteRepo: Send + Sync + 'static {
    /// Every file path under `prefix` (recursive).
    async fn list_files(&self, prefix: &str) -> std::result::Result<Vec<String>, RemoteError>;

    async fn download(&self, path: &str) -> std::result::Result<Bytes, RemoteError>;

    /// Apply `ops` as one atomic commit.
    async fn create_commit(&self, message: &str, ops: &[CommitOp]) -> std::result::Result<(), RemoteError>;
}

#[async_trait]
impl<T: RemoteRepo + ?Sized> RemoteRepo for Arc<T> {
    async fn list_files(&self, prefix: &str) -> std::result::Result<Vec<String>, RemoteError> {
        (**self).list_files(prefix).await
    }

    async fn download(&self, path: &str) -> std::result::Result<Bytes, RemoteError> {
        (**self).download(path).await
    }

    async fn create_commit(&self, message: &str, ops: &[CommitOp]) -> std::result::Result<(), RemoteError> {
        (**self).create_commit(message, ops).await
    }
}

// ============================================================================
// PENDING WRITES
// ============================================================================

#[derive(Debug, Clone)]
enum Staged {
    /// Encoded table plus its decoded form, so `load()` skips a decode.
    Table { content: Bytes, data: TableData },
    File { content: Bytes },
    Delete,
}

/// The write buffer. Keyed by path, so the last staged op for a path wins.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    ops: BTreeMap<String, Staged>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.ops.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    fn put_table(&mut self, path: String, content: Bytes, data: TableData) {
        self.ops.insert(path, Staged::Table { content, data });
    }

    fn put_file(&mut self, path: String, content: Bytes) {
        self.ops.insert(path, Staged::File { content });
    }

    fn delete(&mut self, path: String) {
        self.ops.insert(path, Staged::Delete);
    }

    fn get(&self, path: &str) -> Option<&Staged> {
        self.ops.get(path)
    }

    /// Ops in path order; deterministic batch composition across retries.
    fn to_ops(&self) -> Vec<CommitOp> {
        self.ops
            .iter()
            .map(|(path, staged)| match staged {
                Staged::Table { content, .. } | Staged::File { content } => CommitOp::Put {
                    path: path.clone(),
                    content: content.clone(),
                },
                Staged::Delete => CommitOp::Delete { path: path.clone() },
            })
            .collect()
    }
}

// ============================================================================
// COMMIT REPORT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    pub batches: usize,
    /// Written path → SHA-256 hex of the bytes sent.
    pub written: BTreeMap<String, String>,
    pub deleted: Vec<String>,
}

pub fn sha256_hex(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

// ============================================================================
// OBJECT STORE
// ============================================================================

pub struct ObjectStore<R> {
    remote: R,
    pending: PendingWrites,
    policy: RetryPolicy,
    batch_size: usize,
}

impl<R: RemoteRepo> ObjectStore<R> {
    pub fn new(remote: R, policy: RetryPolicy, batch_size: usize) -> Self {
        ObjectStore {
            remote,
            pending: PendingWrites::new(),
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // ------------------------------------------------------------------------
    // reads
    // ------------------------------------------------------------------------

    /// Latest content of `table`: the staged value if one exists, else the
    /// remote file. A table that does not exist yet loads as empty.
    pub async fn load(&self, table: &Table) -> Result<TableData> {
        let path = table.path();
        match self.pending.get(&path) {
            Some(Staged::Table { data, .. }) => return Ok(data.clone()),
            Some(Staged::File { content }) => return codec::decode(table.kind(), content),
            Some(Staged::Delete) => return Ok(TableData::empty(table.kind())),
            None => {}
        }

        match self.read_back(&path).await? {
            Some(content) => codec::decode(table.kind(), &content),
            None => {
                debug!(path = %path, "table not found remotely, starting empty");
                Ok(TableData::empty(table.kind()))
            }
        }
    }

    /// Raw bytes of `path`, buffer first. `None` if absent everywhere.
    pub async fn load_bytes(&self, path: &str) -> Result<Option<Bytes>> {
        match self.pending.get(path) {
            Some(Staged::Table { content, .. }) | Some(Staged::File { content }) => {
                Ok(Some(content.clone()))
            }
            Some(Staged::Delete) => Ok(None),
            None => self.read_back(path).await,
        }
    }

    /// Remote bytes of `path`, ignoring the buffer entirely.
    pub async fn read_back(&self, path: &str) -> Result<Option<Bytes>> {
        let result = self
            .policy
            .run("download", || self.remote.download(path))
            .await;
        match result {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .policy
            .run("list_files", || self.remote.list_files(prefix))
            .await?)
    }

    // ------------------------------------------------------------------------
    // buffered writes
    // ------------------------------------------------------------------------

    pub fn stage(&mut self, table: &Table, data: TableData) -> Result<()> {
        if data.kind() != table.kind() {
            return Err(Error::InvalidInput(format!(
                "cannot stage {} data into {}",
                data.kind().name(),
                table.path()
            )));
        }
        let content = codec::encode(&data)?;
        debug!(path = %table.path(), rows = data.len(), bytes = content.len(), "staged table");
        self.pending.put_table(table.path(), content, data);
        Ok(())
    }

    /// Stage a raw file (markers, snapshot bytes, delta files).
    pub fn put_file(&mut self, path: impl Into<String>, content: Bytes) {
        self.pending.put_file(path.into(), content);
    }

    pub fn delete<I, S>(&mut self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for path in paths {
            self.pending.delete(path.into());
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_paths(&self) -> Vec<String> {
        self.pending.paths()
    }

    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            warn!(ops = self.pending.len(), "discarding staged writes");
        }
        self.pending.clear();
    }

    // ------------------------------------------------------------------------
    // commit
    // ------------------------------------------------------------------------

    /// Flush the buffer in batches of `batch_size` ops.
    ///
    /// On success the buffer is cleared. On failure nothing is cleared and
    /// the error says how many batches were already applied.
    pub async fn commit(&mut self, message: &str) -> Result<CommitReport> {
        let ops = self.pending.to_ops();
        if ops.is_empty() {
            debug!("nothing to commit");
            return Ok(CommitReport::default());
        }

        let batches: Vec<&[CommitOp]> = ops.chunks(self.batch_size).collect();
        let total = batches.len();
        let mut report = CommitReport {
            batches: total,
            ..CommitReport::default()
        };

        for (i, batch) in batches.iter().enumerate() {
            let batch_message = if total == 1 {
                message.to_string()
            } else {
                format!("{message} (part {}/{total})", i + 1)
            };

            let result = self
                .policy
                .run("create_commit", || self.remote.create_commit(&batch_message, batch))
                .await;

            if let Err(source) = result {
                warn!(
                    applied = i,
                    total,
                    kind = %source.kind,
                    "commit aborted; staged writes kept for retry"
                );
                return Err(Error::Commit {
                    applied: i,
                    total,
                    source,
                });
            }
            debug!(part = i + 1, total, ops = batch.len(), "batch committed");
        }

        for op in &ops {
            match op {
                CommitOp::Put { path, content } => {
                    report.written.insert(path.clone(), sha256_hex(content));
                }
                CommitOp::Delete { path } => report.deleted.push(path.clone()),
            }
        }

        info!(
            message,
            batches = total,
            written = report.written.len(),
            deleted = report.deleted.len(),
            "commit complete"
        );
        self.pending.clear();
        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::MasterEntity;
    use crate::error::ErrorKind;

    fn store(repo: Arc<MemoryRepo>, batch_size: usize) -> ObjectStore<Arc<MemoryRepo>> {
        ObjectStore::new(repo, RetryPolicy::immediate(), batch_size)
    }

    fn master(names: &[&str]) -> TableData {
        TableData::Master(
            names
                .iter()
                .enumerate()
                .map(|(i, n)| MasterEntity::new(format!("E{i:05}"), *n))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_load_missing_table_is_empty() {
        let s = store(Arc::new(MemoryRepo::new()), 10);
        let data = s.load(&Table::Master).await.unwrap();
        assert_eq!(data, TableData::Master(Vec::new()));
    }

    #[tokio::test]
    async fn test_read_your_own_writes() {
        let repo = Arc::new(MemoryRepo::new());
        let mut s = store(repo.clone(), 10);

        s.stage(&Table::Master, master(&["A"])).unwrap();
        assert_eq!(s.load(&Table::Master).await.unwrap(), master(&["A"]));
        // nothing reached the remote yet
        assert!(repo.get(crate::table::MASTER_PATH).is_none());
        assert!(s.read_back(crate::table::MASTER_PATH).await.unwrap().is_none());

        s.commit("first").await.unwrap();
        assert!(!s.has_pending());
        assert_eq!(s.load(&Table::Master).await.unwrap(), master(&["A"]));
    }

    #[tokio::test]
    async fn test_stage_rejects_wrong_kind() {
        let mut s = store(Arc::new(MemoryRepo::new()), 10);
        assert!(s.stage(&Table::NameHistory, master(&["A"])).is_err());
    }

    #[tokio::test]
    async fn test_commit_splits_into_batches() {
        let repo = Arc::new(MemoryRepo::new());
        let mut s = store(repo.clone(), 2);
        for i in 0..5 {
            s.put_file(format!("f/{i}"), Bytes::from(vec![i as u8]));
        }

        let report = s.commit("bulk").await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(report.written.len(), 5);
        assert_eq!(repo.commit_messages(), vec!["bulk (part 1/3)", "bulk (part 2/3)", "bulk (part 3/3)"]);
    }

    #[tokio::test]
    async fn test_fatal_commit_keeps_buffer_and_earlier_batches() {
        let repo = Arc::new(MemoryRepo::new());
        repo.script_commit_failures(vec![None, Some(ErrorKind::Fatal)]);
        let mut s = store(repo.clone(), 1);
        s.put_file("a", Bytes::from_static(b"1"));
        s.put_file("b", Bytes::from_static(b"2"));
        s.put_file("c", Bytes::from_static(b"3"));

        let err = s.commit("three").await.unwrap_err();
        match err {
            Error::Commit { applied, total, .. } => {
                assert_eq!(applied, 1);
                assert_eq!(total, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(repo.get("a").is_some());
        assert!(repo.get("b").is_none());
        assert_eq!(s.pending_paths(), vec!["a", "b", "c"]);

        // repeating the whole commit is safe
        let report = s.commit("three").await.unwrap();
        assert_eq!(report.batches, 3);
        assert_eq!(repo.get("c"), Some(Bytes::from_static(b"3")));
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let repo = Arc::new(MemoryRepo::new());
        repo.script_commit_failures(vec![Some(ErrorKind::Conflict), Some(ErrorKind::Conflict)]);
        let mut s = store(repo.clone(), 10);
        s.put_file("x", Bytes::from_static(b"x"));

        s.commit("race").await.unwrap();
        assert_eq!(repo.commit_attempts(), 3);
        assert!(repo.get("x").is_some());
    }

    #[tokio::test]
    async fn test_staged_delete_hides_remote_content() {
        let repo = Arc::new(MemoryRepo::new());
        repo.insert("gone", Bytes::from_static(b"old"));
        let mut s = store(repo.clone(), 10);

        s.delete(["gone"]);
        assert_eq!(s.load_bytes("gone").await.unwrap(), None);
        let report = s.commit("drop").await.unwrap();
        assert_eq!(report.deleted, vec!["gone"]);
        assert!(repo.get("gone").is_none());
    }

    #[tokio::test]
    async fn test_commit_report_hashes_content() {
        let mut s = store(Arc::new(MemoryRepo::new()), 10);
        s.put_file("h", Bytes::from_static(b"abc"));
        let report = s.commit("hash").await.unwrap();
        assert_eq!(
            report.written["h"],
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
