//! Storage Abstractions
//!
//! Bulk transfer endpoints and the key-value preference store.

use async_trait::async_trait;
use serde_json::Value;

use crate::{error::Result, kind::MediaKind};

/// Source of records for a bulk import.
///
/// # Errors
///
/// Implementations return
/// [`BridgeError::SourceUnavailable`](crate::error::BridgeError::SourceUnavailable)
/// when the import file for `kind` does not exist or cannot be opened.
#[async_trait]
pub trait ImportSource: Send + Sync {
    /// Read every record for `kind`, in source order.
    async fn read_records(&self, kind: MediaKind) -> Result<Vec<Value>>;
}

/// Destination of a bulk export.
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Prepare the destination. `truncate` is false when resuming a partial export.
    async fn begin(&self, kind: MediaKind, truncate: bool) -> Result<()>;

    /// Append one record. Records must be durable once this returns.
    async fn append(&self, kind: MediaKind, record: Value) -> Result<()>;

    /// Finalise the export.
    async fn finish(&self, kind: MediaKind) -> Result<()>;
}

/// Settings store trait
///
/// Key-value storage for user preferences.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn enable_override(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("import.override_existing", true).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a setting exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all setting keys
    async fn list_keys(&self) -> Result<Vec<String>>;
}
