//! Calendar integration used by item deletion.

use async_trait::async_trait;

use crate::error::Result;

/// Host calendar holding reminder events linked to catalog items.
#[async_trait]
pub trait EventCalendar: Send + Sync {
    /// Remove the event linked to `item_id`, if any. Returns whether one existed.
    async fn remove_event(&self, item_id: &str) -> Result<bool>;
}
