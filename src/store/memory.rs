// 🧪 In-memory repository - same contract as the HTTP repo, no network
//
// Commits are atomic per call, exactly like the real service. Test hooks let
// a caller script commit failures, hide listings for a while (propagation
// delay) and make a commit "succeed" without persisting anything.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CommitOp, RemoteRepo};
use crate::error::{ErrorKind, RemoteError};

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, Bytes>,
    /// One entry per upcoming commit attempt; `Some(kind)` fails it.
    commit_script: VecDeque<Option<ErrorKind>>,
    commit_attempts: usize,
    commit_messages: Vec<String>,
    /// Listing calls that still return nothing.
    hidden_listings: usize,
    list_calls: usize,
    drop_next_commit: bool,
}

#[derive(Debug, Default)]
pub struct MemoryRepo {
    state: Mutex<State>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, path: impl Into<String>, content: Bytes) {
        self.lock().files.insert(path.into(), content);
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.lock().files.get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().files.keys().cloned().collect()
    }

    /// Full copy of the repository contents.
    pub fn contents(&self) -> BTreeMap<String, Bytes> {
        self.lock().files.clone()
    }

    /// Outcomes for the next commit attempts, in order. Attempts beyond the
    /// script succeed.
    pub fn script_commit_failures(&self, script: Vec<Option<ErrorKind>>) {
        self.lock().commit_script = script.into();
    }

    /// Make the next `n` listing calls return nothing.
    pub fn hide_listings(&self, n: usize) {
        self.lock().hidden_listings = n;
    }

    /// The next successful commit reports success but persists nothing.
    pub fn drop_next_commit(&self) {
        self.lock().drop_next_commit = true;
    }

    pub fn commit_attempts(&self) -> usize {
        self.lock().commit_attempts
    }

    /// Messages of commits that were applied.
    pub fn commit_messages(&self) -> Vec<String> {
        self.lock().commit_messages.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }
}

#[async_trait]
impl RemoteRepo for MemoryRepo {
    async fn list_files(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let mut state = self.lock();
        state.list_calls += 1;
        if state.hidden_listings > 0 {
            state.hidden_listings -= 1;
            return Ok(Vec::new());
        }
        Ok(state
            .files
            .keys()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn download(&self, path: &str) -> Result<Bytes, RemoteError> {
        self.lock()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(path))
    }

    async fn create_commit(&self, message: &str, ops: &[CommitOp]) -> Result<(), RemoteError> {
        let mut state = self.lock();
        state.commit_attempts += 1;

        if let Some(Some(kind)) = state.commit_script.pop_front() {
            return Err(RemoteError::new(kind, format!("scripted failure for '{message}'")));
        }

        if state.drop_next_commit {
            state.drop_next_commit = false;
            return Ok(());
        }

        for op in ops {
            match op {
                CommitOp::Put { path, content } => {
                    state.files.insert(path.clone(), content.clone());
                }
                CommitOp::Delete { path } => {
                    state.files.remove(path);
                }
            }
        }
        state.commit_messages.push(message.to_string());
        Ok(())
    }
}
