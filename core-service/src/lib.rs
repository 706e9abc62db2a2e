//! Core service façade and bootstrap helpers.
//!
//! This crate wires a [`CatalogConfig`] (host-provided bridges plus tuning)
//! into the shared catalog core: one SQLite pool, one event bus, a shared
//! [`CoverService`], and per configured kind a [`CatalogManager`] and a
//! [`CoverFreshnessUpdater`]. Bulk transfers for every kind go through one
//! [`TransferCoordinator`] whose suspended jobs are stored in the catalog
//! database.
//!
//! Desktop apps typically enable the `desktop-shims` feature, which lets the
//! config builder default the bridges from `bridge-desktop`.
//!
//! ```ignore
//! let config = CatalogConfig::builder()
//!     .database_path("/data/catalog.db")
//!     .lookup_endpoint("https://lookup.example/v1")
//!     .build()?;
//! let core = CoreService::bootstrap(config).await?;
//!
//! core.start_freshness_workers();
//! let handle = core.transfers().start_import(MediaKind::Books, None).await?;
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::collections::BTreeMap;
use std::sync::Arc;

use bridge_traits::{CoverCache, MediaKind};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::SqliteCatalogRepository;
use core_library::{CatalogManager, IdentityResolver};
use core_metadata::{CoverFreshnessUpdater, CoverService};
use core_runtime::config::{CatalogConfig, OVERRIDE_EXISTING_KEY};
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    DefaultKindAdapter, JobHandle, SnapshotRepository, SqliteSnapshotRepository, SyncError,
    TransferContext, TransferCoordinator,
};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

const EVENT_BUS_CAPACITY: usize = 256;

struct ServiceInner {
    config: CatalogConfig,
    pool: SqlitePool,
    events: EventBus,
    covers: Arc<CoverService>,
    managers: BTreeMap<MediaKind, Arc<CatalogManager>>,
    updaters: BTreeMap<MediaKind, Arc<CoverFreshnessUpdater>>,
    coordinator: Arc<TransferCoordinator>,
    snapshots: Arc<dyn SnapshotRepository>,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

impl CoreService {
    /// Open the catalog database and assemble the core.
    #[instrument(skip(config), fields(database = ?config.database_path))]
    pub async fn bootstrap(config: CatalogConfig) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        Self::from_pool(config, pool).await
    }

    /// Assemble the core over an already migrated pool.
    pub async fn from_pool(config: CatalogConfig, pool: SqlitePool) -> Result<Self> {
        let events = EventBus::new(EVENT_BUS_CAPACITY);
        let covers = Arc::new(CoverService::new(
            Arc::clone(&config.cover_loader),
            Arc::clone(&config.cover_cache),
            config.memory_cover_capacity,
        ));
        let snapshots: Arc<dyn SnapshotRepository> =
            Arc::new(SqliteSnapshotRepository::new(pool.clone()));
        let coordinator = Arc::new(
            TransferCoordinator::new(events.clone())
                .with_snapshot_repository(Arc::clone(&snapshots)),
        );

        let mut managers = BTreeMap::new();
        let mut updaters = BTreeMap::new();

        for (&kind, lookup) in &config.lookups {
            let mut manager = CatalogManager::new(
                Arc::new(SqliteCatalogRepository::new(pool.clone())),
                IdentityResolver::new(pool.clone(), kind),
                Arc::clone(&covers) as Arc<dyn CoverCache>,
            )
            .with_event_bus(events.clone());
            if let Some(calendar) = &config.calendar {
                manager = manager.with_calendar(Arc::clone(calendar));
            }
            let manager = Arc::new(manager);

            let updater = CoverFreshnessUpdater::new(
                Arc::clone(&manager),
                Arc::clone(lookup),
                Arc::clone(&covers),
                config.freshness.clone(),
                Arc::clone(&config.clock),
                events.clone(),
            );

            coordinator
                .register_kind(TransferContext {
                    manager: Arc::clone(&manager),
                    adapter: Arc::new(DefaultKindAdapter::new(kind, Arc::clone(lookup))),
                    covers: Arc::clone(&covers),
                    source: Arc::clone(&config.import_source),
                    sink: Arc::clone(&config.export_sink),
                    settings_store: Arc::clone(&config.settings_store),
                    settings: config.transfer.clone(),
                    events: events.clone(),
                })
                .await;

            managers.insert(kind, manager);
            updaters.insert(kind, Arc::new(updater));
        }

        if managers.is_empty() {
            return Err(CoreError::InitializationFailed(
                "No media kind has a remote lookup".to_string(),
            ));
        }
        info!(kinds = ?managers.keys().collect::<Vec<_>>(), "Catalog core ready");

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                pool,
                events,
                covers,
                managers,
                updaters,
                coordinator,
                snapshots,
            }),
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.inner.config
    }

    pub fn kinds(&self) -> Vec<MediaKind> {
        self.inner.managers.keys().copied().collect()
    }

    pub fn manager(&self, kind: MediaKind) -> Result<Arc<CatalogManager>> {
        self.inner
            .managers
            .get(&kind)
            .cloned()
            .ok_or(CoreError::KindNotConfigured(kind))
    }

    pub fn freshness(&self, kind: MediaKind) -> Result<Arc<CoverFreshnessUpdater>> {
        self.inner
            .updaters
            .get(&kind)
            .cloned()
            .ok_or(CoreError::KindNotConfigured(kind))
    }

    pub fn transfers(&self) -> &TransferCoordinator {
        &self.inner.coordinator
    }

    pub fn covers(&self) -> &Arc<CoverService> {
        &self.inner.covers
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.events.subscribe()
    }

    /// Start every freshness worker. Returns how many were newly started.
    pub fn start_freshness_workers(&self) -> usize {
        self.inner
            .updaters
            .values()
            .filter(|updater| updater.start())
            .count()
    }

    /// Items of `kind` became visible; queue them for a freshness check.
    /// Returns how many ids were accepted.
    pub fn items_visible<I, S>(&self, kind: MediaKind, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.freshness(kind)?.offer(ids))
    }

    /// Whether imports overwrite records already in the catalog.
    pub async fn override_existing(&self) -> Result<bool> {
        let stored = self
            .inner
            .config
            .settings_store
            .get_bool(OVERRIDE_EXISTING_KEY)
            .await?;
        Ok(stored.unwrap_or(self.inner.config.transfer.override_existing_default))
    }

    pub async fn set_override_existing(&self, enabled: bool) -> Result<()> {
        self.inner
            .config
            .settings_store
            .set_bool(OVERRIDE_EXISTING_KEY, enabled)
            .await?;
        Ok(())
    }

    /// Suspend every running transfer, storing a snapshot for each.
    /// Returns the kinds that were suspended.
    pub async fn suspend_transfers(&self) -> Vec<MediaKind> {
        let mut suspended = Vec::new();
        for &kind in self.inner.managers.keys() {
            match self.inner.coordinator.suspend(kind).await {
                Ok(Some(_)) => suspended.push(kind),
                Ok(None) => {}
                Err(e) => warn!(kind = %kind, error = %e, "Failed to suspend transfer"),
            }
        }
        suspended
    }

    /// Resume every stored transfer of a configured kind.
    pub async fn resume_pending_transfers(&self) -> Result<Vec<JobHandle>> {
        let mut handles = Vec::new();
        for kind in self.inner.snapshots.pending_kinds().await? {
            if !self.inner.managers.contains_key(&kind) {
                warn!(kind = %kind, "Stored transfer for an unconfigured kind left in place");
                continue;
            }
            match self.inner.coordinator.resume_stored(kind).await {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
                Err(SyncError::InvalidSnapshot) => {
                    warn!(kind = %kind, "Discarded unreadable transfer snapshot")
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(resumed = handles.len(), "Pending transfers resumed");
        Ok(handles)
    }

    /// Suspend transfers, stop the freshness workers and close the database.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let suspended = self.suspend_transfers().await;
        for updater in self.inner.updaters.values() {
            updater.shutdown().await;
        }
        self.inner.pool.close().await;
        info!(suspended = suspended.len(), "Catalog core shut down");
    }
}
