//! # Desktop Bridge Implementations
//!
//! Default implementations of the catalog's host capabilities for desktop
//! platforms (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpRemoteLookup`: JSON lookup service and `HEAD` freshness probes via `reqwest`
//! - `HttpCoverLoader`: cover download plus resize and JPEG re-encode via `image`
//! - `FsCoverCache`: one file per item under a cache directory
//! - `JsonFileImportSource` / `JsonFileExportSink`: `{dir}/{kind}.json` transfer files
//! - `SqliteSettingsStore`: SQLite-backed key-value preferences
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{HttpRemoteLookup, JsonFileImportSource};
//!
//! let lookup = HttpRemoteLookup::new("https://lookup.example.com/v1")?;
//! let source = JsonFileImportSource::new(Path::new("/data/transfers"));
//! ```

mod filesystem;
mod http;
mod settings;

pub use filesystem::{parse_records, FsCoverCache, JsonFileExportSink, JsonFileImportSource};
pub use http::{parse_http_date, shrink_cover, HttpCoverLoader, HttpRemoteLookup, RetryPolicy};
pub use settings::SqliteSettingsStore;
