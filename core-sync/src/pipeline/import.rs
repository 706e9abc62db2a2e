//! Import loop.
//!
//! Per record: derive the identity key, then
//!
//! - known key: count it as already existing, log the key and, when the
//!   `import.override_existing` preference is set, overwrite the stored item
//!   from the record
//! - unknown key, manual record: insert a manual placeholder
//! - unknown key otherwise: resolve it remotely; a hit is inserted and its
//!   cover cached, a miss or a remote failure is counted as missing
//!
//! Per-record failures never stop the job. Only an unreadable import source
//! fails it.

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{throttle, ProgressReporter, TransferContext};
use crate::job::{TransferDirection, TransferItems, TransferJob, TransferProgress};
use crate::record::ImportRecord;
use crate::{Result, SyncError};
use core_runtime::config::OVERRIDE_EXISTING_KEY;

pub struct ImportPipeline {
    ctx: TransferContext,
    job: TransferJob,
    reporter: ProgressReporter,
}

impl ImportPipeline {
    /// # Errors
    ///
    /// Returns an error if `job` is not an import of the context's kind
    pub fn new(ctx: TransferContext, job: TransferJob) -> Result<Self> {
        if job.direction != TransferDirection::Import || job.kind != ctx.manager.kind() {
            return Err(SyncError::InvalidStateTransition {
                from: job.status().to_string(),
                to: "import".to_string(),
                reason: format!("{} {} job given to the {} importer", job.kind, job.direction, ctx.manager.kind()),
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

    /// Run to a terminal state and return the job.
    #[instrument(skip_all, fields(job_id = %self.job.id, kind = %self.job.kind))]
    pub async fn run(mut self, cancel: &CancellationToken) -> TransferJob {
        if let Err(e) = self.job.start() {
            warn!(error = %e, "Import job cannot start");
            return self.job;
        }
        self.reporter.started(&self.job);

        if self.job.needs_items() {
            let loaded = self
                .ctx
                .source
                .read_records(self.job.kind)
                .await
                .map_err(|e| SyncError::SourceUnavailable(e.to_string()))
                .and_then(|records| self.job.set_items(TransferItems::Records(records)));
            if let Err(e) = loaded {
                warn!(error = %e, "Import source unavailable");
                return self.fail(e);
            }
        }

        let override_existing = self.override_existing().await;
        let total = self.job.total();
        info!(total, cursor = self.job.cursor(), override_existing, "Import running");

        while self.job.cursor() < total {
            self.reporter.progress(&self.job);
            if cancel.is_cancelled() {
                return self.cancelled();
            }

            if let Some(value) = self.record_at(self.job.cursor()) {
                self.process(&value, override_existing).await;
            }
            if let Err(e) = self.job.advance() {
                return self.fail(e);
            }

            if self.job.cursor() < total {
                throttle(self.ctx.settings.throttle, cancel).await;
            }
        }

        self.reporter.progress(&self.job);
        if let Err(e) = self.job.complete() {
            warn!(error = %e, "Import job cannot complete");
        }
        info!(
            imported = self.job.counters.imported,
            already_exists = self.job.counters.already_exists,
            missing = self.job.counters.missing,
            manually_added = self.job.counters.manually_added,
            "Import completed"
        );
        self.reporter.finished(&self.job);
        self.job
    }

    fn record_at(&self, index: usize) -> Option<Value> {
        match &self.job.items {
            Some(TransferItems::Records(records)) => records.get(index).cloned(),
            _ => None,
        }
    }

    async fn process(&mut self, value: &Value, override_existing: bool) {
        let record = match self.ctx.adapter.parse_record(value) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable record");
                self.job.record_missing(None);
                return;
            }
        };

        let key = self.ctx.adapter.identity_key(&record);
        let existing = match key.as_deref() {
            Some(key) => match self.ctx.manager.find_id(key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(key, error = %e, "Identity lookup failed");
                    self.job.record_missing(Some(key));
                    return;
                }
            },
            None => None,
        };

        match (existing, key) {
            (Some(internal_id), Some(key)) => {
                debug!(key = %key, internal_id = %internal_id, "Record already in catalog");
                self.job.record_existing(key);
                if override_existing {
                    self.overwrite(&internal_id, &record).await;
                }
            }
            _ if record.is_manual() => self.add_manual(&record).await,
            _ => self.add_resolved(&record).await,
        }
    }

    async fn add_manual(&mut self, record: &ImportRecord) {
        let item = self
            .ctx
            .adapter
            .manual_item(record, self.job.sub_type.as_deref());
        match self.ctx.manager.insert(item).await {
            Ok(item) => {
                debug!(internal_id = %item.internal_id, "Manual placeholder added");
                self.job.counters.manually_added += 1;
                self.job.counters.imported += 1;
            }
            Err(e) => {
                warn!(error = %e, "Failed to add manual placeholder");
                self.job.record_missing(record.identity_key().as_deref());
            }
        }
    }

    async fn add_resolved(&mut self, record: &ImportRecord) {
        let lookup_key = record.lookup_key();
        let Some(code) = lookup_key.as_deref() else {
            self.job.record_missing(None);
            return;
        };

        let timeout = self.ctx.settings.fetch_timeout;
        let metadata = match tokio::time::timeout(timeout, self.ctx.adapter.lookup(record)).await {
            Ok(Ok(Some(metadata))) => metadata,
            Ok(Ok(None)) => {
                debug!(code, "Not found remotely");
                self.job.record_missing(Some(code));
                return;
            }
            Ok(Err(e)) => {
                warn!(code, error = %e, "Remote lookup failed");
                self.job.record_missing(Some(code));
                return;
            }
            Err(_) => {
                warn!(code, ?timeout, "Remote lookup timed out");
                self.job.record_missing(Some(code));
                return;
            }
        };

        let item = self
            .ctx
            .adapter
            .to_item(record, metadata, self.job.sub_type.as_deref());
        let item = match self.ctx.manager.insert(item).await {
            Ok(item) => item,
            Err(e) => {
                warn!(code, error = %e, "Failed to store resolved item");
                self.job.record_missing(Some(code));
                return;
            }
        };
        self.job.counters.imported += 1;

        if let Some(url) = item.cover_urls.preferred() {
            match tokio::time::timeout(timeout, self.ctx.covers.store_from(&item.internal_id, url)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(internal_id = %item.internal_id, error = %e, "Cover download failed"),
                Err(_) => warn!(internal_id = %item.internal_id, "Cover download timed out"),
            }
        }
    }

    async fn overwrite(&self, internal_id: &str, record: &ImportRecord) {
        let existing = match self.ctx.manager.find_by_id(internal_id).await {
            Ok(Some(existing)) => existing,
            Ok(None) => return,
            Err(e) => {
                warn!(internal_id, error = %e, "Failed to load item for overwrite");
                return;
            }
        };
        let merged = self.ctx.adapter.merge_record(existing, record);
        if let Err(e) = self.ctx.manager.update(merged).await {
            warn!(internal_id, error = %e, "Failed to overwrite existing item");
        }
    }

    async fn override_existing(&self) -> bool {
        let fallback = self.ctx.settings.override_existing_default;
        match self.ctx.settings_store.get_bool(OVERRIDE_EXISTING_KEY).await {
            Ok(value) => value.unwrap_or(fallback),
            Err(e) => {
                warn!(error = %e, "Could not read import preference, using default");
                fallback
            }
        }
    }

    fn cancelled(mut self) -> TransferJob {
        if let Err(e) = self.job.cancel() {
            warn!(error = %e, "Import job cannot be cancelled");
        }
        info!(cursor = self.job.cursor(), "Import cancelled");
        self.reporter.finished(&self.job);
        self.job
    }

    fn fail(mut self, error: SyncError) -> TransferJob {
        if let Err(e) = self.job.fail(error.to_string()) {
            warn!(error = %e, "Import job cannot be failed");
        }
        self.reporter.finished(&self.job);
        self.job
    }
}
