//! Export loop.
//!
//! Items are internal ids: the caller's selection or, for a mass export,
//! every id of the kind in id order. Each item still in the catalog is
//! written to the sink in the native record format. Items deleted since the
//! selection was made are skipped. A resumed export appends to what the
//! earlier run wrote.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{throttle, ProgressReporter, TransferContext};
use crate::job::{TransferDirection, TransferItems, TransferJob, TransferProgress};
use crate::{Result, SyncError};

pub struct ExportPipeline {
    ctx: TransferContext,
    job: TransferJob,
    reporter: ProgressReporter,
}

impl ExportPipeline {
    /// # Errors
    ///
    /// Returns an error if `job` is not an export of the context's kind
    pub fn new(ctx: TransferContext, job: TransferJob) -> Result<Self> {
        if job.direction != TransferDirection::Export || job.kind != ctx.manager.kind() {
            return Err(SyncError::InvalidStateTransition {
                from: job.status().to_string(),
                to: "export".to_string(),
                reason: format!("{} {} job given to the {} exporter", job.kind, job.direction, ctx.manager.kind()),
            });
        }
        let reporter = ProgressReporter::new(ctx.events.clone());
        Ok(Self { ctx, job, reporter })
    }

    pub fn with_progress(mut self, watch: watch::Sender<TransferProgress>) -> Self {
        self.reporter.set_watch(watch);
        self
    }

    pub fn job(&self) -> &TransferJob {
        &self.job
    }

    #[instrument(skip_all, fields(job_id = %self.job.id, kind = %self.job.kind))]
    pub async fn run(mut self, cancel: &CancellationToken) -> TransferJob {
        if let Err(e) = self.job.start() {
            warn!(error = %e, "Export job cannot start");
            return self.job;
        }
        self.reporter.started(&self.job);

        if self.job.needs_items() {
            let ids = if self.job.mass_export {
                match self.ctx.manager.list_ids().await {
                    Ok(ids) => ids,
                    Err(e) => return self.fail(e.into()),
                }
            } else {
                Vec::new()
            };
            if let Err(e) = self.job.set_items(TransferItems::Ids(ids)) {
                return self.fail(e);
            }
        }

        let kind = self.job.kind;
        let fresh = self.job.cursor() == 0;
        if let Err(e) = self.ctx.sink.begin(kind, fresh).await {
            return self.fail(e.into());
        }

        let total = self.job.total();
        info!(total, cursor = self.job.cursor(), mass_export = self.job.mass_export, "Export running");

        while self.job.cursor() < total {
            self.reporter.progress(&self.job);
            if cancel.is_cancelled() {
                return self.cancelled().await;
            }

            if let Some(id) = self.id_at(self.job.cursor()) {
                if let Err(e) = self.export_one(&id).await {
                    warn!(internal_id = %id, error = %e, "Export failed");
                    return self.abort(e).await;
                }
            }
            if let Err(e) = self.job.advance() {
                return self.fail(e);
            }

            if self.job.cursor() < total {
                throttle(self.ctx.settings.throttle, cancel).await;
            }
        }

        if let Err(e) = self.ctx.sink.finish(kind).await {
            return self.fail(e.into());
        }

        self.reporter.progress(&self.job);
        if let Err(e) = self.job.complete() {
            warn!(error = %e, "Export job cannot complete");
        }
        info!(exported = self.job.counters.exported, "Export completed");
        self.reporter.finished(&self.job);
        self.job
    }

    fn id_at(&self, index: usize) -> Option<String> {
        match &self.job.items {
            Some(TransferItems::Ids(ids)) => ids.get(index).cloned(),
            _ => None,
        }
    }

    async fn export_one(&mut self, internal_id: &str) -> Result<()> {
        let Some(item) = self.ctx.manager.find_by_id(internal_id).await? else {
            debug!(internal_id, "Item deleted since selection, skipping");
            return Ok(());
        };
        let record = self.ctx.adapter.export_record(&item)?;
        self.ctx.sink.append(self.job.kind, record).await?;
        self.job.counters.exported += 1;
        Ok(())
    }

    async fn cancelled(mut self) -> TransferJob {
        if let Err(e) = self.ctx.sink.finish(self.job.kind).await {
            warn!(error = %e, "Failed to flush export sink");
        }
        if let Err(e) = self.job.cancel() {
            warn!(error = %e, "Export job cannot be cancelled");
        }
        info!(cursor = self.job.cursor(), "Export cancelled");
        self.reporter.finished(&self.job);
        self.job
    }

    /// Fail after the sink was opened; flush what was written so far.
    async fn abort(self, error: SyncError) -> TransferJob {
        if let Err(e) = self.ctx.sink.finish(self.job.kind).await {
            warn!(error = %e, "Failed to flush export sink");
        }
        self.fail(error)
    }

    fn fail(mut self, error: SyncError) -> TransferJob {
        if let Err(e) = self.job.fail(error.to_string()) {
            warn!(error = %e, "Export job cannot be failed");
        }
        self.reporter.finished(&self.job);
        self.job
    }
}
