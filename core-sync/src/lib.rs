//! # Bulk Transfer Module
//!
//! Resumable, cancellable bulk import and export of catalog items.
//!
//! ## Overview
//!
//! This module manages the lifecycle of transfer jobs, including:
//! - Reading source records and resolving them against the catalog
//! - Remote lookup of unknown records, with per-record failure absorption
//! - Writing catalog items to the export sink
//! - Snapshotting in-flight jobs and resuming them from their cursor
//!
//! ## Components
//!
//! - **Transfer Job State Machine** (`job`): lifecycle, cursor, counters and logs
//! - **Record Formats** (`record`): native and external source records
//! - **Kind Adapter** (`adapter`): per-kind parsing, lookup and mapping
//! - **Pipelines** (`pipeline`): the import and export loops
//! - **Persisted Job State** (`snapshot`): versioned snapshot codec
//! - **Repository** (`repository`): snapshot storage in SQLite
//! - **Transfer Coordinator** (`coordinator`): one transfer per kind, host entry point

pub mod adapter;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod record;
pub mod repository;
pub mod snapshot;

pub use adapter::{DefaultKindAdapter, MediaKindAdapter};
pub use coordinator::{JobHandle, TransferCoordinator};
pub use error::{Result, SyncError};
pub use job::{
    TransferCounters, TransferDirection, TransferId, TransferItems, TransferJob, TransferLogs,
    TransferProgress, TransferReport, TransferStatus, NO_BARCODE_MARKER,
};
pub use pipeline::{ExportPipeline, ImportPipeline, TransferContext};
pub use record::{protect_id, unprotect_id, ImportRecord, SourceFormat};
pub use repository::{SnapshotRepository, SqliteSnapshotRepository, StoredSnapshot};
pub use snapshot::PersistedJobState;
