//! # Host Bridge Traits
//!
//! Capability traits the catalog core requires from its host.
//!
//! ## Overview
//!
//! The core owns identity resolution, freshness scheduling and bulk transfer
//! bookkeeping. Everything that touches the outside world (remote metadata
//! services, image download/resize, the cover cache, the import/export files,
//! the host calendar, preferences) is reached through the traits in this crate
//! so that hosts can plug in their own adapters and tests can plug in fakes.
//!
//! ## Traits
//!
//! ### Remote services
//! - [`RemoteLookupPort`](lookup::RemoteLookupPort) - Per-kind metadata lookup and cover freshness probes
//! - [`CoverLoader`](cover::CoverLoader) - Download + resize a cover image
//!
//! ### Storage
//! - [`CoverCache`](cover::CoverCache) - Persistent cover cache keyed by internal id
//! - [`ImportSource`](storage::ImportSource) / [`ExportSink`](storage::ExportSink) - Bulk transfer endpoints
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Platform Integration
//! - [`EventCalendar`](calendar::EventCalendar) - Reminder events linked to items
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! The core fails fast with descriptive errors when a required capability is
//! missing; see `core_runtime::config::CatalogConfigBuilder::build`.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the message actionable (include
//! the URL or file involved).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the core shares adapters across
//! background tasks behind `Arc<dyn Trait>`.

pub mod calendar;
pub mod cover;
pub mod error;
pub mod kind;
pub mod lookup;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use calendar::EventCalendar;
pub use cover::{CoverCache, CoverLoader};
pub use kind::MediaKind;
pub use lookup::{CoverUrls, Freshness, ItemMetadata, RemoteLookupPort};
pub use storage::{ExportSink, ImportSource, SettingsStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
