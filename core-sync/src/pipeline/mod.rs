//! # Bulk Transfer Pipelines
//!
//! The import and export loops share one contract:
//!
//! - items are processed strictly in order, starting at the job's cursor
//! - progress `(cursor, total)` is published before each item
//! - cancellation is checked once per item, before any work on it; an item
//!   already in flight always finishes
//! - the cursor advances only after an item is fully processed
//! - a configurable throttle separates items
//!
//! Both pipelines consume themselves in `run` and hand back the terminal
//! [`TransferJob`], from which a report or a snapshot can be taken.

mod export;
mod import;

pub use export::ExportPipeline;
pub use import::ImportPipeline;

use std::sync::Arc;

use bridge_traits::{ExportSink, ImportSource, SettingsStore};
use core_library::CatalogManager;
use core_metadata::CoverService;
use core_runtime::config::TransferSettings;
use core_runtime::events::{CoreEvent, EventBus, TransferEvent};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::adapter::MediaKindAdapter;
use crate::job::{TransferJob, TransferProgress, TransferStatus};

/// Collaborators of the pipelines for one kind.
#[derive(Clone)]
pub struct TransferContext {
    pub manager: Arc<CatalogManager>,
    pub adapter: Arc<dyn MediaKindAdapter>,
    pub covers: Arc<CoverService>,
    pub source: Arc<dyn ImportSource>,
    pub sink: Arc<dyn ExportSink>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub settings: TransferSettings,
    pub events: EventBus,
}

/// Publishes job transitions on the event bus and an optional watch channel.
pub(crate) struct ProgressReporter {
    events: EventBus,
    watch: Option<watch::Sender<TransferProgress>>,
}

impl ProgressReporter {
    pub(crate) fn new(events: EventBus) -> Self {
        Self {
            events,
            watch: None,
        }
    }

    pub(crate) fn set_watch(&mut self, watch: watch::Sender<TransferProgress>) {
        self.watch = Some(watch);
    }

    pub(crate) fn started(&self, job: &TransferJob) {
        self.emit(TransferEvent::Started {
            job_id: job.id.to_string(),
            kind: job.kind,
            direction: job.direction.to_string(),
            cursor: job.cursor() as u64,
        });
    }

    pub(crate) fn progress(&self, job: &TransferJob) {
        let progress = job.progress();
        if let Some(watch) = &self.watch {
            watch.send_replace(progress);
        }
        self.emit(TransferEvent::Progress {
            job_id: job.id.to_string(),
            kind: job.kind,
            processed: progress.processed,
            total: progress.total,
        });
    }

    pub(crate) fn finished(&self, job: &TransferJob) {
        let job_id = job.id.to_string();
        let event = match job.status() {
            TransferStatus::Completed => TransferEvent::Completed {
                job_id,
                kind: job.kind,
                tally: job.counters.tally(),
            },
            TransferStatus::Cancelled => TransferEvent::Cancelled {
                job_id,
                kind: job.kind,
                cursor: job.cursor() as u64,
                tally: job.counters.tally(),
            },
            TransferStatus::Failed => TransferEvent::Failed {
                job_id,
                kind: job.kind,
                message: job.error_message.clone().unwrap_or_default(),
            },
            TransferStatus::Created | TransferStatus::Running => return,
        };
        self.emit(event);
    }

    fn emit(&self, event: TransferEvent) {
        self.events.emit(CoreEvent::Transfer(event)).ok();
    }
}

/// Sleep for `throttle` unless cancelled first. Returns `false` on cancellation.
pub(crate) async fn throttle(throttle: std::time::Duration, cancel: &CancellationToken) -> bool {
    if throttle.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(throttle) => true,
    }
}
