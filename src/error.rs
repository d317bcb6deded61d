// 🧯 Error Types - one taxonomy for remote, codec and merge failures
//
// Remote failures are classified exactly once, where the HTTP response is
// read, into an ErrorKind. Everything above that boundary (retry policy,
// commit, delta collection) matches on the kind instead of re-parsing
// status codes or message strings.

use std::fmt;
use std::time::Duration;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// REMOTE ERROR KIND
// ============================================================================

/// Classification of a failed remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The path does not exist (404).
    NotFound,

    /// Rate limited (429), with the server's wait hint if it sent one.
    RateLimited { retry_after: Option<Duration> },

    /// Version conflict (409/412): another writer committed first.
    Conflict,

    /// Remote server error (5xx).
    ServerError,

    /// Connection reset, timeout, DNS failure and friends.
    Transport,

    /// Anything else. Never retried.
    Fatal,
}

impl ErrorKind {
    /// Map an HTTP status code to a kind.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            404 => ErrorKind::NotFound,
            429 => ErrorKind::RateLimited { retry_after },
            409 | 412 => ErrorKind::Conflict,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorKind::NotFound | ErrorKind::Fatal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::Conflict => "conflict",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Transport => "transport",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call against the remote repository.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RemoteError {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(path: impl fmt::Display) -> Self {
        RemoteError::new(ErrorKind::NotFound, format!("not found: {path}"))
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

// ============================================================================
// CRATE ERROR
// ============================================================================

/// Errors that can occur while staging, committing or merging.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A remote call failed (after retries, where retries apply).
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A multi-batch commit stopped part way through.
    ///
    /// `applied` batches are durable on the remote; the pending buffer still
    /// holds every staged write so the whole commit can be repeated.
    #[error("commit failed after {applied} of {total} batches: {source}")]
    Commit {
        applied: usize,
        total: usize,
        #[source]
        source: RemoteError,
    },

    /// Arrow/Parquet encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A delta was written to a chunk whose completion marker already exists.
    #[error("chunk {run_id}/{chunk_id} is already sealed")]
    ChunkSealed { run_id: String, chunk_id: String },

    /// Post-commit read-back did not match what was committed.
    #[error("verification failed for {path}: {reason}")]
    Verification { path: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec {
            message: message.into(),
        }
    }

    /// The remote kind behind this error, if it came from the remote.
    pub fn remote_kind(&self) -> Option<&ErrorKind> {
        match self {
            Error::Remote(e) => Some(&e.kind),
            Error::Commit { source, .. } => Some(&source.kind),
            _ => None,
        }
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Error::codec(e.to_string())
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Error::codec(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::codec(e.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
