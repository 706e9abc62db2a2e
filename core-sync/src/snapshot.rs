//! # Persisted Job State
//!
//! Serialises an in-flight transfer so it can be resumed after the host
//! discards it.
//!
//! The blob is a versioned JSON document carrying everything a resumed run
//! needs: kind, direction, cursor, the full item list (so the import source
//! is not read again), sub-type, mass-export flag, counters and logs.
//! [`PersistedJobState::restore`] is pure: it rebuilds a `Created` job and
//! never touches the catalog; the caller runs it.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::job::{
    TransferCounters, TransferDirection, TransferId, TransferItems, TransferJob, TransferLogs,
};
use crate::Result;
use bridge_traits::MediaKind;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotV1 {
    version: u32,
    job_id: TransferId,
    kind: MediaKind,
    direction: TransferDirection,
    cursor: usize,
    #[serde(default)]
    items: Option<TransferItems>,
    #[serde(default)]
    sub_type: Option<String>,
    #[serde(default)]
    mass_export: bool,
    #[serde(default)]
    counters: TransferCounters,
    #[serde(default)]
    logs: TransferLogs,
}

pub struct PersistedJobState;

impl PersistedJobState {
    pub fn save(job: &TransferJob) -> Result<Vec<u8>> {
        let snapshot = SnapshotV1 {
            version: SNAPSHOT_VERSION,
            job_id: job.id,
            kind: job.kind,
            direction: job.direction,
            cursor: job.cursor(),
            items: job.items.clone(),
            sub_type: job.sub_type.clone(),
            mass_export: job.mass_export,
            counters: job.counters,
            logs: job.logs.clone(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Rebuild a runnable job. `None` for corrupt, unknown-version or
    /// inconsistent blobs.
    pub fn restore(blob: &[u8]) -> Option<TransferJob> {
        let snapshot: SnapshotV1 = match serde_json::from_slice(blob) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable transfer snapshot");
                return None;
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(version = snapshot.version, "Discarding transfer snapshot of unknown version");
            return None;
        }

        let mut job = match snapshot.direction {
            TransferDirection::Import => TransferJob::new_import(snapshot.kind, snapshot.sub_type),
            TransferDirection::Export => {
                let mut job = TransferJob::new_export(snapshot.kind, Vec::new(), snapshot.mass_export);
                job.items = None;
                job
            }
        };
        job.id = snapshot.job_id;
        if let Some(items) = snapshot.items {
            if job.set_items(items).is_err() {
                warn!("Discarding transfer snapshot with mismatched items");
                return None;
            }
        }
        if job.seek(snapshot.cursor).is_err() {
            warn!(cursor = snapshot.cursor, "Discarding transfer snapshot with cursor past its items");
            return None;
        }
        job.counters = snapshot.counters;
        job.logs = snapshot.logs;
        Some(job)
    }
}
