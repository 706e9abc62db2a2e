//! # Transfer Job State Machine
//!
//! Lifecycle, cursor and counters of one bulk import or export.
//!
//! ## State Machine
//!
//! ```text
//! Created → Running → Completed
//!    ↓         ↓
//!    └─────→ Failed
//!    └─────→ Cancelled
//! ```
//!
//! Terminal states never transition. The cursor is the index of the next
//! unprocessed item: it only moves forward, one item at a time, and never past
//! the end of the item list. Counters and logs only grow while the job runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{TransferJob, TransferStatus};
//!
//! let mut job = TransferJob::new_import(MediaKind::Books, None);
//! job.start()?;
//! job.set_items(TransferItems::Records(records));
//! job.counters.imported += 1;
//! job.advance()?;
//! job.complete()?;
//! ```

use crate::{Result, SyncError};
use bridge_traits::MediaKind;
use core_runtime::events::TransferTally;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Marker logged for records that carry no usable identifier.
pub const NO_BARCODE_MARKER: &str = "no barcode";

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Built or restored, not yet run
    Created,
    Running,
    Completed,
    /// Import source missing or export sink broken
    Failed,
    /// Stopped by request; cursor and counters are preserved
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Created => "created",
            TransferStatus::Running => "running",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TransferStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "created" => Ok(TransferStatus::Created),
            "running" => Ok(TransferStatus::Running),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            "cancelled" => Ok(TransferStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Import,
    Export,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Import => "import",
            TransferDirection::Export => "export",
        }
    }
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Counters, Logs, Items
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounters {
    pub imported: u64,
    pub already_exists: u64,
    pub missing: u64,
    pub manually_added: u64,
    pub exported: u64,
}

impl TransferCounters {
    pub fn tally(&self) -> TransferTally {
        TransferTally {
            imported: self.imported,
            already_exists: self.already_exists,
            missing: self.missing,
            manually_added: self.manually_added,
            exported: self.exported,
        }
    }
}

/// Keys of records that matched an existing item or could not be resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLogs {
    pub existing_ids: Vec<String>,
    pub missing_ids: Vec<String>,
}

/// Ordered work list of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "items", rename_all = "snake_case")]
pub enum TransferItems {
    /// Raw source records of an import
    Records(Vec<Value>),
    /// Internal ids of an export
    Ids(Vec<String>),
}

impl TransferItems {
    pub fn len(&self) -> usize {
        match self {
            TransferItems::Records(records) => records.len(),
            TransferItems::Ids(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches(&self, direction: TransferDirection) -> bool {
        matches!(
            (self, direction),
            (TransferItems::Records(_), TransferDirection::Import)
                | (TransferItems::Ids(_), TransferDirection::Export)
        )
    }
}

/// Progress snapshot published while a job runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub processed: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.processed as f64 / self.total as f64) * 100.0).min(100.0) as u8
    }
}

/// Structured outcome handed to the host when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub job_id: TransferId,
    pub kind: MediaKind,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub counters: TransferCounters,
    pub logs: TransferLogs,
    /// Items processed before the job stopped
    pub processed: u64,
    pub total: u64,
    pub error_message: Option<String>,
}

// ============================================================================
// Transfer Job Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferJob {
    pub id: TransferId,
    pub kind: MediaKind,
    pub direction: TransferDirection,
    /// `None` until loaded from the source or the catalog
    pub items: Option<TransferItems>,
    cursor: usize,
    pub counters: TransferCounters,
    pub logs: TransferLogs,
    /// Sub-type applied to imported items that do not carry their own
    pub sub_type: Option<String>,
    /// Export every item of the kind instead of a selection
    pub mass_export: bool,
    status: TransferStatus,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

impl TransferJob {
    fn blank(kind: MediaKind, direction: TransferDirection) -> Self {
        Self {
            id: TransferId::new(),
            kind,
            direction,
            items: None,
            cursor: 0,
            counters: TransferCounters::default(),
            logs: TransferLogs::default(),
            sub_type: None,
            mass_export: false,
            status: TransferStatus::Created,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Fresh import; the source records are read when the job runs.
    pub fn new_import(kind: MediaKind, sub_type: Option<String>) -> Self {
        let mut job = Self::blank(kind, TransferDirection::Import);
        job.sub_type = sub_type;
        job
    }

    /// Fresh export of `selection`, or of every item when `mass_export` is set.
    pub fn new_export(kind: MediaKind, selection: Vec<String>, mass_export: bool) -> Self {
        let mut job = Self::blank(kind, TransferDirection::Export);
        job.mass_export = mass_export;
        if !mass_export {
            job.items = Some(TransferItems::Ids(selection));
        }
        job
    }

    /// Import that continues at `cursor` over already-read source records.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::CursorOutOfRange`] if `cursor > records.len()`
    pub fn resumed_import(
        kind: MediaKind,
        records: Vec<Value>,
        cursor: usize,
        sub_type: Option<String>,
    ) -> Result<Self> {
        let mut job = Self::new_import(kind, sub_type);
        job.items = Some(TransferItems::Records(records));
        job.seek(cursor)?;
        Ok(job)
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn total(&self) -> usize {
        self.items.as_ref().map(TransferItems::len).unwrap_or(0)
    }

    pub fn progress(&self) -> TransferProgress {
        TransferProgress {
            processed: self.cursor as u64,
            total: self.total() as u64,
        }
    }

    /// Whether the work list still has to be loaded.
    pub fn needs_items(&self) -> bool {
        self.items.as_ref().map(TransferItems::is_empty).unwrap_or(true)
    }

    /// Install the work list of a job that has not processed anything yet.
    ///
    /// # Errors
    ///
    /// Returns an error if items of the other direction are given
    pub fn set_items(&mut self, items: TransferItems) -> Result<()> {
        if !items.matches(self.direction) {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: "set_items".to_string(),
                reason: format!("{} job cannot take these items", self.direction),
            });
        }
        self.items = Some(items);
        self.cursor = self.cursor.min(self.total());
        Ok(())
    }

    /// Move the cursor to `cursor`. Used when restoring a job.
    pub(crate) fn seek(&mut self, cursor: usize) -> Result<()> {
        let len = self.total();
        if cursor > len {
            return Err(SyncError::CursorOutOfRange { cursor, len });
        }
        self.cursor = cursor;
        Ok(())
    }

    /// Mark the item under the cursor as fully processed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not running or the cursor is at the end
    pub fn advance(&mut self) -> Result<()> {
        self.require_running("advance")?;
        let len = self.total();
        if self.cursor >= len {
            return Err(SyncError::CursorOutOfRange {
                cursor: self.cursor + 1,
                len,
            });
        }
        self.cursor += 1;
        Ok(())
    }

    pub fn record_existing(&mut self, key: impl Into<String>) {
        self.counters.already_exists += 1;
        self.logs.existing_ids.push(key.into());
    }

    pub fn record_missing(&mut self, key: Option<&str>) {
        self.counters.missing += 1;
        self.logs
            .missing_ids
            .push(key.unwrap_or(NO_BARCODE_MARKER).to_string());
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TransferStatus::Running)?;
        self.started_at = Some(current_timestamp());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(TransferStatus::Completed)?;
        self.completed_at = Some(current_timestamp());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.transition(TransferStatus::Cancelled)?;
        self.completed_at = Some(current_timestamp());
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(TransferStatus::Failed)?;
        self.completed_at = Some(current_timestamp());
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn report(&self) -> TransferReport {
        TransferReport {
            job_id: self.id,
            kind: self.kind,
            direction: self.direction,
            status: self.status,
            counters: self.counters,
            logs: self.logs.clone(),
            processed: self.cursor as u64,
            total: self.total() as u64,
            error_message: self.error_message.clone(),
        }
    }

    fn require_running(&self, action: &str) -> Result<()> {
        if self.status != TransferStatus::Running {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: action.to_string(),
                reason: "Job must be running".to_string(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: TransferStatus) -> Result<()> {
        let valid = matches!(
            (self.status, to),
            (TransferStatus::Created, TransferStatus::Running)
                | (TransferStatus::Created, TransferStatus::Cancelled)
                | (TransferStatus::Created, TransferStatus::Failed)
                | (TransferStatus::Running, TransferStatus::Completed)
                | (TransferStatus::Running, TransferStatus::Failed)
                | (TransferStatus::Running, TransferStatus::Cancelled)
        );

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!("Cannot transition from {} to {}", self.status, to),
            });
        }

        self.status = to;
        Ok(())
    }
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Tests
// ============================================================================
