//! Cover Image Capabilities
//!
//! Downloading, resizing and persisting cover art is host work. The core only
//! decides *when* a cover must be (re)loaded.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Persistent cover cache keyed by catalog internal id.
#[async_trait]
pub trait CoverCache: Send + Sync {
    async fn get_cached(&self, item_id: &str) -> Result<Option<Bytes>>;

    async fn put(&self, item_id: &str, data: Bytes) -> Result<()>;

    /// Drop any cached cover for `item_id`. Missing entries are not an error.
    async fn invalidate(&self, item_id: &str) -> Result<()>;
}

/// Downloads a cover and returns it ready for caching (resized, re-encoded).
#[async_trait]
pub trait CoverLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<Bytes>;
}
