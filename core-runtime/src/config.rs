//! # Core Configuration Module
//!
//! Configuration for the catalog core.
//!
//! ## Overview
//!
//! [`CatalogConfig`] carries every bridge and tuning value the core needs. It
//! is assembled with [`CatalogConfigBuilder`], which fails fast with an
//! actionable [`Error::CapabilityMissing`] when a required bridge is absent.
//!
//! ## Required Dependencies
//!
//! - `RemoteLookupPort` - at least one kind must have a lookup registered
//! - `SettingsStore` - user preferences (override-on-import)
//! - `CoverLoader`, `CoverCache` - cover download and persistence
//! - `ImportSource`, `ExportSink` - bulk transfer endpoints
//!
//! ## Optional Dependencies
//!
//! - `EventCalendar` - linked reminder events removed on delete
//! - `Clock` - defaults to `SystemClock`
//!
//! With the `desktop-shims` feature, desktop defaults from `bridge-desktop`
//! fill in the settings store, the cover bridges, the transfer endpoints and
//! (when a lookup endpoint is configured) an HTTP lookup for every kind.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CatalogConfig;
//! use std::time::Duration;
//!
//! let config = CatalogConfig::builder()
//!     .database_path("/data/catalog.db")
//!     .cover_cache_dir("/data/covers")
//!     .transfer_dir("/data/transfers")
//!     .lookup_endpoint("https://lookup.example/v1")
//!     .transfer_throttle(Duration::from_millis(500))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{
    Clock, CoverCache, CoverLoader, EventCalendar, ExportSink, ImportSource, MediaKind,
    RemoteLookupPort, SettingsStore, SystemClock,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Preference key consulted by imports for existing records.
pub const OVERRIDE_EXISTING_KEY: &str = "import.override_existing";

/// Tuning for bulk import/export jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    /// Pause after each record, bounding the outbound request rate.
    pub throttle: Duration,
    /// Upper bound on one remote lookup or cover download.
    pub fetch_timeout: Duration,
    /// Fallback when the settings store has no `import.override_existing` value.
    pub override_existing_default: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(30),
            override_existing_default: false,
        }
    }
}

/// Tuning for the cover freshness workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessSettings {
    /// Minimum interval between two checks of the same item.
    pub cool_down: Duration,
    /// Pause after each processed id.
    pub throttle: Duration,
    /// Pending ids held per worker; extra offers are dropped.
    pub queue_capacity: usize,
    /// Upper bound on one freshness probe.
    pub fetch_timeout: Duration,
}

impl Default for FreshnessSettings {
    fn default() -> Self {
        Self {
            cool_down: Duration::from_secs(24 * 60 * 60),
            throttle: Duration::from_secs(1),
            queue_capacity: 12,
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Core configuration.
///
/// Use [`CatalogConfig::builder`] to construct instances.
#[derive(Clone)]
pub struct CatalogConfig {
    /// Path to the SQLite catalog database
    pub database_path: PathBuf,
    /// Directory of the persistent cover cache
    pub cover_cache_dir: PathBuf,
    /// Directory holding import and export files
    pub transfer_dir: PathBuf,
    /// Covers kept in the in-memory tier
    pub memory_cover_capacity: usize,
    pub transfer: TransferSettings,
    pub freshness: FreshnessSettings,
    /// Remote lookup per kind; kinds without one cannot import
    pub lookups: BTreeMap<MediaKind, Arc<dyn RemoteLookupPort>>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub cover_loader: Arc<dyn CoverLoader>,
    pub cover_cache: Arc<dyn CoverCache>,
    pub import_source: Arc<dyn ImportSource>,
    pub export_sink: Arc<dyn ExportSink>,
    pub calendar: Option<Arc<dyn EventCalendar>>,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("database_path", &self.database_path)
            .field("cover_cache_dir", &self.cover_cache_dir)
            .field("transfer_dir", &self.transfer_dir)
            .field("memory_cover_capacity", &self.memory_cover_capacity)
            .field("transfer", &self.transfer)
            .field("freshness", &self.freshness)
            .field("lookups", &self.lookups.keys().collect::<Vec<_>>())
            .field("calendar", &self.calendar.as_ref().map(|_| "EventCalendar { ... }"))
            .finish_non_exhaustive()
    }
}

impl CatalogConfig {
    pub fn builder() -> CatalogConfigBuilder {
        CatalogConfigBuilder::default()
    }

    /// Kinds that have a remote lookup registered.
    pub fn kinds(&self) -> impl Iterator<Item = MediaKind> + '_ {
        self.lookups.keys().copied()
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.memory_cover_capacity == 0 {
            return Err(Error::Config(
                "Memory cover capacity must be greater than 0".to_string(),
            ));
        }

        if self.freshness.queue_capacity == 0 {
            return Err(Error::Config(
                "Freshness queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.transfer.fetch_timeout.is_zero() || self.freshness.fetch_timeout.is_zero() {
            return Err(Error::Config(
                "Fetch timeouts must be greater than 0".to_string(),
            ));
        }

        if self.lookups.is_empty() {
            return Err(Error::CapabilityMissing {
                capability: "RemoteLookupPort".to_string(),
                message: "No remote lookup registered for any media kind. \
                          Register one with .remote_lookup(kind, port) or, with the \
                          'desktop-shims' feature, set .lookup_endpoint(url)."
                    .to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for [`CatalogConfig`].
#[derive(Default)]
pub struct CatalogConfigBuilder {
    database_path: Option<PathBuf>,
    cover_cache_dir: Option<PathBuf>,
    transfer_dir: Option<PathBuf>,
    memory_cover_capacity: Option<usize>,
    transfer: TransferSettings,
    freshness: FreshnessSettings,
    lookups: BTreeMap<MediaKind, Arc<dyn RemoteLookupPort>>,
    lookup_endpoint: Option<String>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    cover_loader: Option<Arc<dyn CoverLoader>>,
    cover_cache: Option<Arc<dyn CoverCache>>,
    import_source: Option<Arc<dyn ImportSource>>,
    export_sink: Option<Arc<dyn ExportSink>>,
    calendar: Option<Arc<dyn EventCalendar>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CatalogConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Defaults to `covers/` next to the database.
    pub fn cover_cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cover_cache_dir = Some(path.into());
        self
    }

    /// Defaults to `transfers/` next to the database.
    pub fn transfer_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.transfer_dir = Some(path.into());
        self
    }

    pub fn memory_cover_capacity(mut self, capacity: usize) -> Self {
        self.memory_cover_capacity = Some(capacity);
        self
    }

    pub fn transfer_settings(mut self, settings: TransferSettings) -> Self {
        self.transfer = settings;
        self
    }

    pub fn transfer_throttle(mut self, throttle: Duration) -> Self {
        self.transfer.throttle = throttle;
        self
    }

    pub fn freshness_settings(mut self, settings: FreshnessSettings) -> Self {
        self.freshness = settings;
        self
    }

    pub fn freshness_cool_down(mut self, cool_down: Duration) -> Self {
        self.freshness.cool_down = cool_down;
        self
    }

    pub fn remote_lookup(mut self, kind: MediaKind, port: Arc<dyn RemoteLookupPort>) -> Self {
        self.lookups.insert(kind, port);
        self
    }

    /// Base URL of a JSON lookup service, used for every kind without an
    /// explicit lookup (desktop-shims only).
    pub fn lookup_endpoint(mut self, base_url: impl Into<String>) -> Self {
        self.lookup_endpoint = Some(base_url.into());
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn cover_loader(mut self, loader: Arc<dyn CoverLoader>) -> Self {
        self.cover_loader = Some(loader);
        self
    }

    pub fn cover_cache(mut self, cache: Arc<dyn CoverCache>) -> Self {
        self.cover_cache = Some(cache);
        self
    }

    pub fn import_source(mut self, source: Arc<dyn ImportSource>) -> Self {
        self.import_source = Some(source);
        self
    }

    pub fn export_sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.export_sink = Some(sink);
        self
    }

    pub fn calendar(mut self, calendar: Arc<dyn EventCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the database path is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] when a required bridge has neither been
    ///   injected nor can be defaulted
    pub fn build(self) -> Result<CatalogConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;
        let base_dir = database_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let cover_cache_dir = self
            .cover_cache_dir
            .unwrap_or_else(|| base_dir.join("covers"));
        let transfer_dir = self
            .transfer_dir
            .unwrap_or_else(|| base_dir.join("transfers"));

        let defaults = shims::Defaults {
            database_path: &database_path,
            cover_cache_dir: &cover_cache_dir,
            transfer_dir: &transfer_dir,
        };

        let mut lookups = self.lookups;
        if let Some(endpoint) = &self.lookup_endpoint {
            let shared = defaults.lookup(endpoint)?;
            for kind in MediaKind::ALL {
                lookups.entry(kind).or_insert_with(|| Arc::clone(&shared));
            }
        }

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => defaults.settings_store()?,
        };
        let cover_loader = match self.cover_loader {
            Some(loader) => loader,
            None => defaults.cover_loader()?,
        };
        let cover_cache = match self.cover_cache {
            Some(cache) => cache,
            None => defaults.cover_cache()?,
        };
        let import_source = match self.import_source {
            Some(source) => source,
            None => defaults.import_source()?,
        };
        let export_sink = match self.export_sink {
            Some(sink) => sink,
            None => defaults.export_sink()?,
        };

        let config = CatalogConfig {
            database_path,
            cover_cache_dir,
            transfer_dir,
            memory_cover_capacity: self.memory_cover_capacity.unwrap_or(64),
            transfer: self.transfer,
            freshness: self.freshness,
            lookups,
            settings_store,
            cover_loader,
            cover_cache,
            import_source,
            export_sink,
            calendar: self.calendar,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(feature = "desktop-shims")]
mod shims {
    use super::*;
    use bridge_desktop::{
        FsCoverCache, HttpCoverLoader, HttpRemoteLookup, JsonFileExportSink,
        JsonFileImportSource, SqliteSettingsStore,
    };

    pub(super) struct Defaults<'a> {
        pub database_path: &'a Path,
        pub cover_cache_dir: &'a Path,
        pub transfer_dir: &'a Path,
    }

    fn internal(what: &str, err: impl std::fmt::Display) -> Error {
        Error::Internal(format!("Failed to initialize default {}: {}", what, err))
    }

    impl Defaults<'_> {
        pub fn lookup(&self, endpoint: &str) -> Result<Arc<dyn RemoteLookupPort>> {
            let lookup = HttpRemoteLookup::new(endpoint).map_err(|e| internal("lookup", e))?;
            Ok(Arc::new(lookup))
        }

        pub fn settings_store(&self) -> Result<Arc<dyn SettingsStore>> {
            let path = self.database_path.with_file_name("settings.db");
            let store =
                SqliteSettingsStore::open_lazy(path).map_err(|e| internal("SettingsStore", e))?;
            Ok(Arc::new(store))
        }

        pub fn cover_loader(&self) -> Result<Arc<dyn CoverLoader>> {
            let loader = HttpCoverLoader::new().map_err(|e| internal("CoverLoader", e))?;
            Ok(Arc::new(loader))
        }

        pub fn cover_cache(&self) -> Result<Arc<dyn CoverCache>> {
            Ok(Arc::new(FsCoverCache::new(self.cover_cache_dir)))
        }

        pub fn import_source(&self) -> Result<Arc<dyn ImportSource>> {
            Ok(Arc::new(JsonFileImportSource::new(self.transfer_dir)))
        }

        pub fn export_sink(&self) -> Result<Arc<dyn ExportSink>> {
            Ok(Arc::new(JsonFileExportSink::new(self.transfer_dir)))
        }
    }
}

#[cfg(not(feature = "desktop-shims"))]
mod shims {
    use super::*;

    fn missing(capability: &str, hint: &str) -> Error {
        Error::CapabilityMissing {
            capability: capability.to_string(),
            message: format!(
                "{} implementation is required. {} \
                 Desktop: enable the 'desktop-shims' feature to use the bridge-desktop default.",
                capability, hint
            ),
        }
    }

    pub(super) struct Defaults<'a> {
        #[allow(dead_code)]
        pub database_path: &'a Path,
        #[allow(dead_code)]
        pub cover_cache_dir: &'a Path,
        #[allow(dead_code)]
        pub transfer_dir: &'a Path,
    }

    impl Defaults<'_> {
        pub fn lookup(&self, _endpoint: &str) -> Result<Arc<dyn RemoteLookupPort>> {
            Err(missing(
                "RemoteLookupPort",
                "A lookup endpoint needs the desktop HTTP lookup; register a port per kind instead.",
            ))
        }

        pub fn settings_store(&self) -> Result<Arc<dyn SettingsStore>> {
            Err(missing(
                "SettingsStore",
                "It stores the override-existing-on-import preference.",
            ))
        }

        pub fn cover_loader(&self) -> Result<Arc<dyn CoverLoader>> {
            Err(missing("CoverLoader", "It downloads and resizes cover art."))
        }

        pub fn cover_cache(&self) -> Result<Arc<dyn CoverCache>> {
            Err(missing("CoverCache", "It persists cover art per item."))
        }

        pub fn import_source(&self) -> Result<Arc<dyn ImportSource>> {
            Err(missing("ImportSource", "It supplies bulk import records."))
        }

        pub fn export_sink(&self) -> Result<Arc<dyn ExportSink>> {
            Err(missing("ExportSink", "It receives bulk export records."))
        }
    }
}
