//! Remote Metadata Lookup
//!
//! The per-kind remote service consulted during imports (to resolve metadata
//! for unknown codes) and by the cover freshness updater (to probe cover URLs).
//! Vendor response grammars stay behind this port; the core only sees
//! [`ItemMetadata`] and [`Freshness`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{error::Result, kind::MediaKind};

/// Cover image URLs keyed by display density bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverUrls {
    pub small: Option<String>,
    pub medium: Option<String>,
    pub large: Option<String>,
}

impl CoverUrls {
    /// The URL to fetch for caching, largest available bucket first.
    pub fn preferred(&self) -> Option<&str> {
        [&self.large, &self.medium, &self.small]
            .into_iter()
            .filter_map(|url| url.as_deref())
            .find(|url| !url.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.preferred().is_none()
    }
}

/// Metadata returned by a remote lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub title: String,
    #[serde(default)]
    pub ean: Option<String>,
    #[serde(default)]
    pub upc: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub cover_urls: CoverUrls,
    /// Remote modification time of the cover, Unix seconds.
    #[serde(default)]
    pub last_modified: Option<i64>,
    /// Kind-specific fields (author, platform, size, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Result of a freshness probe against a cover URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    /// `Last-Modified` of the remote resource, Unix seconds.
    pub last_modified: Option<i64>,
    pub status_code: u16,
}

impl Freshness {
    /// True when the remote resource is strictly newer than `local`.
    pub fn is_newer_than(&self, local: i64) -> bool {
        (200..300).contains(&self.status_code)
            && matches!(self.last_modified, Some(remote) if remote > local)
    }
}

/// Remote lookup capability for one or more media kinds.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::lookup::RemoteLookupPort;
///
/// async fn resolve(port: &dyn RemoteLookupPort) -> Result<()> {
///     if let Some(meta) = port.find("9780000000002", MediaKind::Books).await? {
///         println!("found {}", meta.title);
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait RemoteLookupPort: Send + Sync {
    /// Look up an item by any supported code. `Ok(None)` means not found.
    async fn find(&self, id: &str, kind: MediaKind) -> Result<Option<ItemMetadata>>;

    /// Probe a cover URL for its remote modification time.
    async fn fetch_freshness(&self, cover_url: &str) -> Result<Freshness>;
}
