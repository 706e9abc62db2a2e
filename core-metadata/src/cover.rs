//! Cover Pipeline - Load, Cache and Refresh Cover Art
//!
//! ## Overview
//!
//! [`CoverService`] layers a small in-memory LRU tier over the host's
//! persistent [`CoverCache`] and drives the host's [`CoverLoader`] when a cover
//! has to be (re)downloaded. Imports call [`CoverService::store_from`] for new
//! items; the freshness updater calls [`CoverService::refresh`] when a remote
//! cover changed. The service itself implements [`CoverCache`], so the catalog
//! manager releases both tiers when an item is deleted.
//!
//! Downloaded payloads are sniffed with `image::guess_format` before caching;
//! vendors answer broken cover URLs with HTML error pages and a 200 status.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::cover::CoverService;
//!
//! let covers = CoverService::new(loader, persistent_cache, 64);
//! covers.refresh("b42", "https://covers.example/b42.jpg").await?;
//! let bytes = covers.get("b42").await?;
//! ```

use crate::error::{MetadataError, Result};
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{CoverCache, CoverLoader};
use bytes::Bytes;
use core_runtime::logging::redact_url;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

pub struct CoverService {
    loader: Arc<dyn CoverLoader>,
    persistent: Arc<dyn CoverCache>,
    memory: Mutex<LruCache<String, Bytes>>,
}

impl CoverService {
    /// `memory_capacity` is the number of covers held in memory; 0 is treated as 1.
    pub fn new(
        loader: Arc<dyn CoverLoader>,
        persistent: Arc<dyn CoverCache>,
        memory_capacity: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(memory_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            loader,
            persistent,
            memory: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Cached cover of `item_id`, memory tier first.
    pub async fn get(&self, item_id: &str) -> Result<Option<Bytes>> {
        if let Some(hit) = self.memory.lock().await.get(item_id) {
            return Ok(Some(hit.clone()));
        }

        let stored = self.persistent.get_cached(item_id).await?;
        if let Some(data) = &stored {
            self.memory
                .lock()
                .await
                .put(item_id.to_string(), data.clone());
        }
        Ok(stored)
    }

    /// Download the cover at `url` and cache it for `item_id`.
    #[instrument(skip(self, url), fields(url = %redact_url(url)))]
    pub async fn store_from(&self, item_id: &str, url: &str) -> Result<Bytes> {
        let data = self.loader.load(url).await?;
        Self::sniff(&data)?;

        self.persistent.put(item_id, data.clone()).await?;
        self.memory
            .lock()
            .await
            .put(item_id.to_string(), data.clone());

        debug!(bytes = data.len(), "Cover cached");
        Ok(data)
    }

    /// Invalidate, re-download and re-cache the cover of `item_id`.
    pub async fn refresh(&self, item_id: &str, url: &str) -> Result<Bytes> {
        self.drop_cached(item_id).await?;
        self.store_from(item_id, url).await
    }

    /// Release both cache tiers for `item_id`.
    pub async fn drop_cached(&self, item_id: &str) -> Result<()> {
        self.memory.lock().await.pop(item_id);
        self.persistent.invalidate(item_id).await?;
        Ok(())
    }

    /// Number of covers in the memory tier.
    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    fn sniff(data: &Bytes) -> Result<()> {
        if data.is_empty() {
            return Err(MetadataError::CoverError("empty cover payload".to_string()));
        }
        image::guess_format(data)
            .map(|_| ())
            .map_err(|e| MetadataError::CoverError(format!("not an image: {}", e)))
    }
}

#[async_trait]
impl CoverCache for CoverService {
    async fn get_cached(&self, item_id: &str) -> BridgeResult<Option<Bytes>> {
        self.get(item_id).await.map_err(into_bridge)
    }

    async fn put(&self, item_id: &str, data: Bytes) -> BridgeResult<()> {
        self.persistent.put(item_id, data.clone()).await?;
        self.memory.lock().await.put(item_id.to_string(), data);
        Ok(())
    }

    async fn invalidate(&self, item_id: &str) -> BridgeResult<()> {
        self.drop_cached(item_id).await.map_err(into_bridge)
    }
}

fn into_bridge(err: MetadataError) -> bridge_traits::BridgeError {
    match err {
        MetadataError::Bridge(inner) => inner,
        other => bridge_traits::BridgeError::OperationFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    mock! {
        pub Loader {}

        #[async_trait]
        impl CoverLoader for Loader {
            async fn load(&self, url: &str) -> BridgeResult<Bytes>;
        }
    }

    #[derive(Default)]
    struct MapCache {
        entries: StdMutex<HashMap<String, Bytes>>,
    }

    #[async_trait]
    impl CoverCache for MapCache {
        async fn get_cached(&self, item_id: &str) -> BridgeResult<Option<Bytes>> {
            Ok(self.entries.lock().unwrap().get(item_id).cloned())
        }

        async fn put(&self, item_id: &str, data: Bytes) -> BridgeResult<()> {
            self.entries.lock().unwrap().insert(item_id.to_string(), data);
            Ok(())
        }

        async fn invalidate(&self, item_id: &str) -> BridgeResult<()> {
            self.entries.lock().unwrap().remove(item_id);
            Ok(())
        }
    }

    fn png(tag: u8) -> Bytes {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.push(tag);
        Bytes::from(data)
    }

    #[tokio::test]
    async fn test_refresh_replaces_both_tiers() {
        let mut loader = MockLoader::new();
        loader
            .expect_load()
            .with(eq("https://covers.example/b1.jpg"))
            .times(1)
            .returning(|_| Ok(png(2)));

        let persistent = Arc::new(MapCache::default());
        persistent.put("b1", png(1)).await.unwrap();
        let service = CoverService::new(Arc::new(loader), persistent.clone(), 4);
        assert_eq!(service.get("b1").await.unwrap(), Some(png(1)));

        service
            .refresh("b1", "https://covers.example/b1.jpg")
            .await
            .unwrap();

        assert_eq!(service.get("b1").await.unwrap(), Some(png(2)));
        assert_eq!(persistent.get_cached("b1").await.unwrap(), Some(png(2)));
    }

    #[tokio::test]
    async fn test_non_image_payload_is_not_cached() {
        let mut loader = MockLoader::new();
        loader
            .expect_load()
            .returning(|_| Ok(Bytes::from_static(b"<html>404</html>")));

        let persistent = Arc::new(MapCache::default());
        let service = CoverService::new(Arc::new(loader), persistent.clone(), 4);

        let err = service.store_from("m1", "https://x/m1").await.unwrap_err();
        assert!(matches!(err, MetadataError::CoverError(_)));
        assert_eq!(persistent.get_cached("m1").await.unwrap(), None);
        assert_eq!(service.memory_len().await, 0);
    }

    #[tokio::test]
    async fn test_invalidate_through_trait_clears_memory() {
        let loader = MockLoader::new();
        let persistent = Arc::new(MapCache::default());
        let service = CoverService::new(Arc::new(loader), persistent.clone(), 4);

        CoverCache::put(&service, "t1", png(7)).await.unwrap();
        assert_eq!(service.memory_len().await, 1);

        CoverCache::invalidate(&service, "t1").await.unwrap();
        assert_eq!(service.memory_len().await, 0);
        assert_eq!(persistent.get_cached("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_tier_is_bounded() {
        let loader = MockLoader::new();
        let service = CoverService::new(Arc::new(loader), Arc::new(MapCache::default()), 2);

        for id in ["a1", "a2", "a3"] {
            CoverCache::put(&service, id, png(0)).await.unwrap();
        }
        assert_eq!(service.memory_len().await, 2);
    }
}
