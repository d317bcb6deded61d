// Issuer Master - Core Library
// Exposes all modules for use in the worker/merge binary and tests

pub mod bins;           // Bin Partitioner - identifier → bin routing
pub mod codec;          // Parquet encode/decode for every table
pub mod config;
pub mod coordinator;    // Merge Coordinator - snapshot, commit, verify, rollback
pub mod delta;          // Delta Store - per-chunk worker output
pub mod detail;         // Detail bin merge + audit
pub mod entities;
pub mod error;
pub mod history;        // Name-change history rebuild
pub mod ingest;         // Worker-side CSV readers
pub mod names;
pub mod reconciliation; // Reconciliation Engine
pub mod snapshot;
pub mod store;          // Object Store Client
pub mod table;
pub mod timeline;
pub mod validation;

// Re-export commonly used types
pub use bins::{bin_of, bin_of_row, partition_rows, BinId};
pub use config::{Config, RemoteConfig};
pub use coordinator::{MergeCoordinator, MergeError, MergeReport};
pub use delta::{ChunkMarker, CollectedRun, DeltaStore, DeltaTarget};
pub use detail::{audit_bin, merge_bin, route_incoming, BinAudit, DetailSpec};
pub use entities::{
    CatalogRecord, DetailFrame, DetailRow, IdentityBridge, IndexEvent, IndexEventType,
    IssuerObservation, ListingEvent, ListingEventType, ListingStatus, MasterEntity,
    NameChangeEvent, Origin, RawObservation,
};
pub use error::{Error, ErrorKind, RemoteError, Result};
pub use history::{rebuild_issuer_history, rebuild_name_history};
pub use names::{normalize_name, same_name};
pub use reconciliation::{ReconcileInput, ReconcileOutcome, ReconcileStats, ReconciliationEngine};
pub use snapshot::Snapshot;
pub use store::{CommitOp, CommitReport, MemoryRepo, ObjectStore, RemoteRepo, RetryPolicy};
#[cfg(feature = "remote")]
pub use store::HubRepo;
pub use table::{DeltaTable, Table, TableData, TableKind};
pub use validation::{ObservationValidator, Rejection, ValidationError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
