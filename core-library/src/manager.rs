//! # Catalog Manager
//!
//! Per-kind facade over the repository and the identity resolver.
//!
//! Everything outside this crate that reads or writes items of one kind goes
//! through a [`CatalogManager`]: the transfer pipelines, the freshness worker
//! and the host UI. Writes normalise alternate keys first; deletes also release
//! the item's cached cover and its linked calendar event.

use std::sync::Arc;

use bridge_traits::{CoverCache, EventCalendar, MediaKind};
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus};
use tracing::{debug, instrument, warn};

use crate::error::{LibraryError, Result};
use crate::identity::{IdentityResolver, MatchPolicy};
use crate::models::CatalogItem;
use crate::repositories::CatalogRepository;

pub struct CatalogManager {
    kind: MediaKind,
    repository: Arc<dyn CatalogRepository>,
    identity: IdentityResolver,
    cover_cache: Arc<dyn CoverCache>,
    calendar: Option<Arc<dyn EventCalendar>>,
    events: Option<EventBus>,
}

impl CatalogManager {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        identity: IdentityResolver,
        cover_cache: Arc<dyn CoverCache>,
    ) -> Self {
        Self {
            kind: identity.kind(),
            repository,
            identity,
            cover_cache,
            calendar: None,
            events: None,
        }
    }

    pub fn with_calendar(mut self, calendar: Arc<dyn EventCalendar>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.identity.policy()
    }

    pub fn identity(&self) -> &IdentityResolver {
        &self.identity
    }

    /// Whether `raw` (any key type) names an item of this kind.
    pub async fn exists(&self, raw: &str) -> Result<bool> {
        self.identity.exists(raw).await
    }

    /// Internal id of the item named by `raw`.
    pub async fn find_id(&self, raw: &str) -> Result<Option<String>> {
        self.identity.find_id(raw).await
    }

    pub async fn find_by_id(&self, internal_id: &str) -> Result<Option<CatalogItem>> {
        Ok(self
            .repository
            .find_by_id(internal_id)
            .await?
            .filter(|item| item.kind == self.kind))
    }

    pub async fn insert(&self, item: CatalogItem) -> Result<CatalogItem> {
        let item = self.own(item)?.normalized();
        self.repository.insert(&item).await?;

        debug!(kind = %self.kind, item_id = %item.internal_id, manual = item.manual, "Item added");
        self.emit(CatalogEvent::ItemAdded {
            kind: self.kind,
            item_id: item.internal_id.clone(),
            title: item.title.clone(),
            manual: item.manual,
        });
        Ok(item)
    }

    pub async fn update(&self, item: CatalogItem) -> Result<CatalogItem> {
        let mut item = self.own(item)?.normalized();
        item.updated_at = chrono::Utc::now().timestamp();
        self.repository.update(&item).await?;

        self.emit(CatalogEvent::ItemUpdated {
            kind: self.kind,
            item_id: item.internal_id.clone(),
        });
        Ok(item)
    }

    /// Update the item if its internal id exists, insert it otherwise.
    pub async fn save(&self, item: CatalogItem) -> Result<CatalogItem> {
        if self.identity.exists_by_id(&item.internal_id).await? {
            self.update(item).await
        } else {
            self.insert(item).await
        }
    }

    /// Persist a new cover timestamp. Returns `false` if the item is gone.
    pub async fn update_last_modified(&self, internal_id: &str, last_modified: i64) -> Result<bool> {
        self.repository
            .update_last_modified(internal_id, last_modified)
            .await
    }

    /// Delete an item and release what hangs off it.
    ///
    /// Cover and calendar cleanup failures are logged; the row is already gone.
    #[instrument(skip(self), fields(kind = %self.kind))]
    pub async fn delete(&self, internal_id: &str) -> Result<bool> {
        if !self.identity.exists_by_id(internal_id).await? {
            return Ok(false);
        }
        if !self.repository.delete(internal_id).await? {
            return Ok(false);
        }

        if let Err(e) = self.cover_cache.invalidate(internal_id).await {
            warn!(item_id = internal_id, error = %e, "Failed to release cached cover");
        }
        if let Some(calendar) = &self.calendar {
            if let Err(e) = calendar.remove_event(internal_id).await {
                warn!(item_id = internal_id, error = %e, "Failed to remove calendar event");
            }
        }

        self.emit(CatalogEvent::ItemDeleted {
            kind: self.kind,
            item_id: internal_id.to_string(),
        });
        Ok(true)
    }

    pub async fn list_ids(&self) -> Result<Vec<String>> {
        self.repository.list_ids(self.kind).await
    }

    pub async fn count(&self) -> Result<i64> {
        self.repository.count(self.kind).await
    }

    fn own(&self, item: CatalogItem) -> Result<CatalogItem> {
        if item.kind != self.kind {
            return Err(LibraryError::InvalidInput {
                field: "kind".to_string(),
                message: format!("{} item given to the {} manager", item.kind, self.kind),
            });
        }
        Ok(item)
    }

    fn emit(&self, event: CatalogEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Catalog(event)).ok();
        }
    }
}
