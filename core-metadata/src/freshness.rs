//! # Cover Freshness Updater
//!
//! One background worker per media kind that keeps cached covers in step
//! with the remote service.
//!
//! ## Overview
//!
//! The host offers internal ids as items scroll into view. The worker takes
//! them one at a time and, for each id:
//!
//! 1. skips it if the same id was checked within the cool-down window
//! 2. loads the item; skips it if it is gone, has no stored timestamp or no
//!    cover URL
//! 3. probes the preferred cover URL for its `Last-Modified`
//! 4. when the remote timestamp is strictly newer, re-downloads the cover and
//!    stores the new timestamp
//! 5. pauses for the configured throttle before taking the next id
//!
//! Probe failures are logged and reported as [`FreshnessEvent::CheckFailed`];
//! the worker keeps going. Offers never block: a full queue drops the excess.
//!
//! ## Lifecycle
//!
//! [`CoverFreshnessUpdater::start`] spawns the worker on the current tokio
//! runtime. [`CoverFreshnessUpdater::stop`] cancels it; a pending `take` or
//! throttle pause returns immediately. Both are idempotent, and a stopped
//! updater can be started again.

use std::sync::{Arc, Mutex};

use bridge_traits::{Clock, MediaKind, RemoteLookupPort};
use core_library::CatalogManager;
use core_runtime::config::FreshnessSettings;
use core_runtime::events::{CoreEvent, EventBus, FreshnessEvent, SkipReason};
use core_runtime::logging::redact_url;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cooldown::CooldownTracker;
use crate::cover::CoverService;
use crate::error::{MetadataError, Result};
use crate::work_queue::WorkQueue;

/// What happened to one dequeued id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Skipped(SkipReason),
    Current,
    Refreshed(i64),
}

impl CheckOutcome {
    /// Whether the remote service was contacted.
    fn probed(&self) -> bool {
        !matches!(self, CheckOutcome::Skipped(_))
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct UpdaterInner {
    kind: MediaKind,
    manager: Arc<CatalogManager>,
    lookup: Arc<dyn RemoteLookupPort>,
    covers: Arc<CoverService>,
    queue: WorkQueue,
    cooldown: CooldownTracker,
    settings: FreshnessSettings,
    events: EventBus,
}

pub struct CoverFreshnessUpdater {
    inner: Arc<UpdaterInner>,
    worker: Mutex<Option<Worker>>,
}

impl CoverFreshnessUpdater {
    pub fn new(
        manager: Arc<CatalogManager>,
        lookup: Arc<dyn RemoteLookupPort>,
        covers: Arc<CoverService>,
        settings: FreshnessSettings,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        let inner = UpdaterInner {
            kind: manager.kind(),
            queue: WorkQueue::new(settings.queue_capacity),
            cooldown: CooldownTracker::new(settings.cool_down, clock),
            manager,
            lookup,
            covers,
            settings,
            events,
        };
        Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Spawn the worker. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut worker = self.lock_worker();
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                return false;
            }
        }

        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.run(token).await });

        info!(kind = %self.inner.kind, "Cover freshness worker started");
        *worker = Some(Worker { cancel, handle });
        true
    }

    /// Cancel the worker without waiting for it. Pending ids stay queued.
    pub fn stop(&self) {
        if let Some(worker) = self.lock_worker().take() {
            worker.cancel.cancel();
            info!(kind = %self.inner.kind, "Cover freshness worker stopping");
        }
    }

    /// Cancel the worker and wait until it has exited.
    pub async fn shutdown(&self) {
        let worker = self.lock_worker().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                warn!(kind = %self.inner.kind, error = %e, "Cover freshness worker panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    /// Queue ids for checking. Returns how many were accepted.
    pub fn offer<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accepted = self.inner.queue.offer(ids);
        debug!(kind = %self.inner.kind, accepted, pending = self.inner.queue.len(), "Ids offered");
        accepted
    }

    /// Drop every pending id, e.g. when the visible range changes.
    pub fn clear(&self) {
        self.inner.queue.clear();
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    /// Run one check synchronously, bypassing the queue.
    pub async fn check_now(&self, item_id: &str) -> Result<CheckOutcome> {
        self.inner.check(item_id).await
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CoverFreshnessUpdater {
    fn drop(&mut self) {
        self.stop();
    }
}

impl UpdaterInner {
    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        while let Some(item_id) = self.queue.take(&cancel).await {
            let probed = match self.check(&item_id).await {
                Ok(outcome) => {
                    self.report(&item_id, outcome);
                    outcome.probed()
                }
                Err(e) => {
                    warn!(kind = %self.kind, item_id = %item_id, error = %e, "Freshness check failed");
                    self.emit(FreshnessEvent::CheckFailed {
                        kind: self.kind,
                        item_id: item_id.clone(),
                        message: e.to_string(),
                    });
                    true
                }
            };

            if probed {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.throttle) => {}
                }
            }
        }
        info!(kind = %self.kind, "Cover freshness worker stopped");
    }

    #[instrument(skip(self), fields(kind = %self.kind))]
    async fn check(&self, item_id: &str) -> Result<CheckOutcome> {
        if !self.cooldown.try_begin(item_id) {
            return Ok(CheckOutcome::Skipped(SkipReason::CoolingDown));
        }

        let Some(item) = self.manager.find_by_id(item_id).await? else {
            return Ok(CheckOutcome::Skipped(SkipReason::NotFound));
        };
        let Some(local) = item.last_modified else {
            return Ok(CheckOutcome::Skipped(SkipReason::NoTimestamp));
        };
        let Some(url) = item.cover_urls.preferred() else {
            return Ok(CheckOutcome::Skipped(SkipReason::NoCover));
        };

        let timeout = self.settings.fetch_timeout;
        let freshness = tokio::time::timeout(timeout, self.lookup.fetch_freshness(url))
            .await
            .map_err(|_| MetadataError::Timeout(timeout))??;

        let remote = match freshness.last_modified {
            Some(remote) if freshness.is_newer_than(local) => remote,
            _ => {
                debug!(url = %redact_url(url), status = freshness.status_code, "Cover is current");
                return Ok(CheckOutcome::Current);
            }
        };

        tokio::time::timeout(timeout, self.covers.refresh(item_id, url))
            .await
            .map_err(|_| MetadataError::Timeout(timeout))??;
        self.manager.update_last_modified(item_id, remote).await?;

        info!(local, remote, "Cover refreshed");
        Ok(CheckOutcome::Refreshed(remote))
    }

    fn report(&self, item_id: &str, outcome: CheckOutcome) {
        let item_id = item_id.to_string();
        let event = match outcome {
            CheckOutcome::Skipped(reason) => {
                debug!(kind = %self.kind, item_id = %item_id, ?reason, "Freshness check skipped");
                FreshnessEvent::Skipped {
                    kind: self.kind,
                    item_id,
                    reason,
                }
            }
            CheckOutcome::Current => FreshnessEvent::Checked {
                kind: self.kind,
                item_id,
            },
            CheckOutcome::Refreshed(last_modified) => FreshnessEvent::CoverRefreshed {
                kind: self.kind,
                item_id,
                last_modified,
            },
        };
        self.emit(event);
    }

    fn emit(&self, event: FreshnessEvent) {
        self.events.emit(CoreEvent::Freshness(event)).ok();
    }
}
