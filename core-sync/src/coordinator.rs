//! # Transfer Coordinator
//!
//! Host-facing entry point for bulk imports and exports.
//!
//! ## Overview
//!
//! The coordinator owns one [`TransferContext`] per registered kind and runs
//! at most one transfer per kind at a time, each on its own tokio task. A
//! second start for a busy kind is rejected with
//! [`SyncError::TransferInProgress`]; the running job is left untouched.
//!
//! Callers get a [`JobHandle`] back immediately. It exposes a `watch`
//! receiver with `(processed, total)` and resolves to the terminal
//! [`TransferReport`]. Every transition is also published on the event bus.
//!
//! ## Suspend and resume
//!
//! When the host is about to discard an in-flight transfer it calls
//! [`TransferCoordinator::suspend`]: the run is cancelled, awaited, and its
//! [`PersistedJobState`] blob returned (and stored, when a
//! [`SnapshotRepository`] is configured). [`TransferCoordinator::resume`]
//! rebuilds the job from a blob and continues from its cursor.
//!
//! The kind stays busy until the suspended task has stopped and its snapshot
//! is stored; only the task itself releases its slot.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let coordinator = TransferCoordinator::new(events);
//! coordinator.register_kind(context).await;
//!
//! let handle = coordinator.start_import(MediaKind::Books, None).await?;
//! let mut progress = handle.progress();
//! let report = handle.wait().await?;
//! println!("imported {}", report.counters.imported);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bridge_traits::MediaKind;
use core_runtime::events::EventBus;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::job::{
    TransferDirection, TransferId, TransferJob, TransferProgress, TransferReport, TransferStatus,
};
use crate::pipeline::{ExportPipeline, ImportPipeline, TransferContext};
use crate::repository::SnapshotRepository;
use crate::snapshot::PersistedJobState;
use crate::{Result, SyncError};

/// Caller's view of a started transfer.
pub struct JobHandle {
    id: TransferId,
    kind: MediaKind,
    direction: TransferDirection,
    progress: watch::Receiver<TransferProgress>,
    report: oneshot::Receiver<TransferReport>,
}

impl JobHandle {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Latest `(processed, total)`; await `changed()` on it for updates.
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.progress.clone()
    }

    /// Wait for the terminal report.
    pub async fn wait(self) -> Result<TransferReport> {
        self.report.await.map_err(|_| SyncError::TaskAborted)
    }
}

type SuspendReply = oneshot::Sender<Result<Option<Vec<u8>>>>;

struct ActiveTransfer {
    job_id: TransferId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    /// Taken by the first `suspend`; the task answers it before releasing the slot.
    suspend: Option<oneshot::Sender<SuspendReply>>,
}

pub struct TransferCoordinator {
    contexts: RwLock<HashMap<MediaKind, TransferContext>>,
    active: Arc<Mutex<HashMap<MediaKind, ActiveTransfer>>>,
    snapshots: Option<Arc<dyn SnapshotRepository>>,
    events: EventBus,
}

impl TransferCoordinator {
    pub fn new(events: EventBus) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            snapshots: None,
            events,
        }
    }

    /// Store suspended transfers so they survive process death.
    pub fn with_snapshot_repository(mut self, snapshots: Arc<dyn SnapshotRepository>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register (or replace) the collaborators for the context's kind.
    pub async fn register_kind(&self, context: TransferContext) {
        let kind = context.manager.kind();
        self.contexts.write().await.insert(kind, context);
        info!(kind = %kind, "Registered transfer context");
    }

    pub async fn registered_kinds(&self) -> Vec<MediaKind> {
        let mut kinds: Vec<_> = self.contexts.read().await.keys().copied().collect();
        kinds.sort();
        kinds
    }

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn start_import(&self, kind: MediaKind, sub_type: Option<String>) -> Result<JobHandle> {
        self.launch(TransferJob::new_import(kind, sub_type)).await
    }

    #[instrument(skip(self, selection), fields(kind = %kind, selected = selection.len()))]
    pub async fn start_export(
        &self,
        kind: MediaKind,
        selection: Vec<String>,
        mass_export: bool,
    ) -> Result<JobHandle> {
        self.launch(TransferJob::new_export(kind, selection, mass_export))
            .await
    }

    /// Continue a suspended transfer from its snapshot.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidSnapshot`] if the blob cannot be restored
    pub async fn resume(&self, blob: &[u8]) -> Result<JobHandle> {
        let job = PersistedJobState::restore(blob).ok_or(SyncError::InvalidSnapshot)?;
        info!(
            kind = %job.kind,
            direction = %job.direction,
            cursor = job.cursor(),
            total = job.total(),
            "Resuming transfer"
        );
        self.launch(job).await
    }

    /// Resume the stored snapshot of `kind`, if any, and drop it from the store.
    pub async fn resume_stored(&self, kind: MediaKind) -> Result<Option<JobHandle>> {
        let Some(snapshots) = &self.snapshots else {
            return Ok(None);
        };
        let Some(stored) = snapshots.load(kind).await? else {
            return Ok(None);
        };
        let handle = self.resume(&stored.blob).await;
        if matches!(handle, Ok(_) | Err(SyncError::InvalidSnapshot)) {
            snapshots.delete(kind).await?;
        }
        handle.map(Some)
    }

    /// Request cancellation of the job behind `handle`. Returns `false` if it
    /// is no longer running.
    pub async fn cancel(&self, handle: &JobHandle) -> bool {
        let active = self.active.lock().await;
        match active.get(&handle.kind) {
            Some(transfer) if transfer.job_id == handle.id => {
                transfer.cancel.cancel();
                debug!(job_id = %handle.id, "Cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Request cancellation of whatever transfer runs for `kind`.
    pub async fn cancel_kind(&self, kind: MediaKind) -> bool {
        match self.active.lock().await.get(&kind) {
            Some(transfer) => {
                transfer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the running transfer of `kind`, wait for it to stop, and return
    /// its snapshot. `None` if nothing was running or the job already finished.
    ///
    /// The kind is not released until the snapshot is stored, so no other
    /// transfer for `kind` can start in between.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn suspend(&self, kind: MediaKind) -> Result<Option<Vec<u8>>> {
        let reply = {
            let mut active = self.active.lock().await;
            let Some(transfer) = active.get_mut(&kind) else {
                return Ok(None);
            };
            let Some(request) = transfer.suspend.take() else {
                debug!(job_id = %transfer.job_id, "Suspend already requested");
                return Ok(None);
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            if request.send(reply_tx).is_err() {
                warn!(job_id = %transfer.job_id, "Transfer task is gone");
                active.remove(&kind);
                return Ok(None);
            }
            transfer.cancel.cancel();
            reply_rx
        };

        reply.await.map_err(|_| {
            warn!("Transfer task stopped without answering the suspend");
            SyncError::TaskAborted
        })?
    }

    pub async fn is_running(&self, kind: MediaKind) -> bool {
        self.active
            .lock()
            .await
            .get(&kind)
            .map(|t| !t.task.is_finished())
            .unwrap_or(false)
    }

    pub async fn active_job(&self, kind: MediaKind) -> Option<TransferId> {
        self.active.lock().await.get(&kind).map(|t| t.job_id)
    }

    async fn launch(&self, job: TransferJob) -> Result<JobHandle> {
        let kind = job.kind;
        let context = self
            .contexts
            .read()
            .await
            .get(&kind)
            .cloned()
            .ok_or(SyncError::KindNotRegistered(kind))?;

        // Check and insert under one lock so two starts cannot both pass.
        let mut active = self.active.lock().await;
        if let Some(running) = active.get(&kind) {
            if !running.task.is_finished() {
                warn!(kind = %kind, running = %running.job_id, "Transfer already in progress");
                return Err(SyncError::TransferInProgress { kind });
            }
        }

        let job_id = job.id;
        let direction = job.direction;
        let (progress_tx, progress_rx) = watch::channel(job.progress());
        let (report_tx, report_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let runner = match direction {
            TransferDirection::Import => {
                let pipeline = ImportPipeline::new(context, job)?.with_progress(progress_tx);
                Runner::Import(pipeline)
            }
            TransferDirection::Export => {
                let pipeline = ExportPipeline::new(context, job)?.with_progress(progress_tx);
                Runner::Export(pipeline)
            }
        };

        let token = cancel.clone();
        let registry = Arc::clone(&self.active);
        let snapshots = self.snapshots.clone();
        let (suspend_tx, mut suspend_rx) = oneshot::channel::<SuspendReply>();
        let task = tokio::spawn(async move {
            let job = runner.run(&token).await;

            // A suspend is answered while the slot is still held.
            let answered = {
                let mut active = registry.lock().await;
                let answered = match suspend_rx.try_recv() {
                    Ok(reply) => Some((reply, store_snapshot(&job, snapshots.as_deref()).await)),
                    Err(_) => None,
                };
                if active.get(&kind).map(|t| t.job_id) == Some(job_id) {
                    active.remove(&kind);
                }
                answered
            };

            if let Some((reply, outcome)) = answered {
                reply.send(outcome).ok();
            }
            report_tx.send(job.report()).ok();
        });

        active.insert(
            kind,
            ActiveTransfer {
                job_id,
                cancel,
                task,
                suspend: Some(suspend_tx),
            },
        );
        info!(kind = %kind, job_id = %job_id, direction = %direction, "Transfer started");

        Ok(JobHandle {
            id: job_id,
            kind,
            direction,
            progress: progress_rx,
            report: report_rx,
        })
    }
}

/// Snapshot a cancelled job, storing it when a repository is configured.
async fn store_snapshot(
    job: &TransferJob,
    snapshots: Option<&dyn SnapshotRepository>,
) -> Result<Option<Vec<u8>>> {
    if job.status() != TransferStatus::Cancelled {
        debug!(job_id = %job.id, status = %job.status(), "Nothing left to resume");
        return Ok(None);
    }

    let blob = PersistedJobState::save(job)?;
    if let Some(snapshots) = snapshots {
        snapshots.save(job.kind, job.direction, &blob).await?;
    }
    info!(
        kind = %job.kind,
        cursor = job.cursor(),
        total = job.total(),
        "Transfer suspended"
    );
    Ok(Some(blob))
}

enum Runner {
    Import(ImportPipeline),
    Export(ExportPipeline),
}

impl Runner {
    async fn run(self, cancel: &CancellationToken) -> TransferJob {
        match self {
            Runner::Import(pipeline) => pipeline.run(cancel).await,
            Runner::Export(pipeline) => pipeline.run(cancel).await,
        }
    }
}
