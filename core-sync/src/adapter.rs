//! # Media Kind Adapter
//!
//! The small per-kind capability set the generic transfer pipelines need:
//! parsing source records, deriving their keys, resolving unknown records
//! remotely, and mapping between records and [`CatalogItem`]s.
//!
//! [`DefaultKindAdapter`] covers every kind whose records fit the shared
//! native/external formats; a host with a bespoke feed implements
//! [`MediaKindAdapter`] itself.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_traits::{ItemMetadata, MediaKind, RemoteLookupPort};
use core_library::{CatalogItem, IdentityKey};
use serde_json::Value;

use crate::record::{protect_id, ImportRecord, NativeRecord};
use crate::Result;

#[async_trait]
pub trait MediaKindAdapter: Send + Sync {
    fn kind(&self) -> MediaKind;

    fn parse_record(&self, value: &Value) -> Result<ImportRecord> {
        ImportRecord::parse(value)
    }

    /// Key handed to the identity resolver. `None` when the record has no id.
    fn identity_key(&self, record: &ImportRecord) -> Option<String> {
        record.identity_key()
    }

    /// Internal id for a record that is about to be inserted.
    ///
    /// Native records keep their original id when it belongs to this kind.
    fn internal_id_for(&self, record: &ImportRecord) -> String {
        self.identity_key(record)
            .filter(|key| matches!(IdentityKey::classify(key, self.kind()), IdentityKey::InternalId(_)))
            .unwrap_or_else(|| CatalogItem::mint_id(self.kind()))
    }

    /// Resolve full metadata for a record not yet in the catalog.
    async fn lookup(&self, record: &ImportRecord) -> Result<Option<ItemMetadata>>;

    /// Item built from a successful remote lookup.
    fn to_item(
        &self,
        record: &ImportRecord,
        metadata: ItemMetadata,
        sub_type: Option<&str>,
    ) -> CatalogItem {
        let title = Some(metadata.title.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| record.title.clone())
            .or_else(|| record.lookup_key())
            .unwrap_or_else(|| self.kind().to_string());

        let mut item = CatalogItem::with_id(self.kind(), self.internal_id_for(record), title);
        item.ean = metadata.ean;
        item.upc = metadata.upc;
        item.isbn = metadata.isbn;
        for code in &record.external_ids {
            assign_code(&mut item, code);
        }
        item.sub_type = record.sub_type.clone().or_else(|| sub_type.map(str::to_string));
        item.last_modified = metadata.last_modified;
        item.cover_urls = metadata.cover_urls;
        item.attributes = metadata.attributes;
        for (key, value) in &record.attributes {
            item.attributes.entry(key.clone()).or_insert_with(|| value.clone());
        }
        item
    }

    /// Placeholder for a record flagged manual.
    fn manual_item(&self, record: &ImportRecord, sub_type: Option<&str>) -> CatalogItem {
        let title = record
            .title
            .clone()
            .or_else(|| record.lookup_key())
            .unwrap_or_else(|| format!("Manual {}", self.kind()));

        let mut item = CatalogItem::with_id(self.kind(), self.internal_id_for(record), title);
        item.manual = true;
        for code in &record.external_ids {
            assign_code(&mut item, code);
        }
        item.sub_type = record.sub_type.clone().or_else(|| sub_type.map(str::to_string));
        item.last_modified = record.last_modified;
        item.cover_urls = record.cover_urls.clone();
        item.attributes = record.attributes.clone();
        item
    }

    /// Overwrite `existing` with the fields the record carries.
    fn merge_record(&self, mut existing: CatalogItem, record: &ImportRecord) -> CatalogItem {
        if let Some(title) = record.title.as_ref().filter(|t| !t.trim().is_empty()) {
            existing.title = title.clone();
        }
        for code in &record.external_ids {
            overwrite_code(&mut existing, code);
        }
        if record.sub_type.is_some() {
            existing.sub_type = record.sub_type.clone();
        }
        if record.last_modified.is_some() {
            existing.last_modified = record.last_modified;
        }
        if !record.cover_urls.is_empty() {
            existing.cover_urls = record.cover_urls.clone();
        }
        if let Some(manual) = record.manual {
            existing.manual = manual;
        }
        for (key, value) in &record.attributes {
            existing.attributes.insert(key.clone(), value.clone());
        }
        existing
    }

    /// Native export record for `item`.
    fn export_record(&self, item: &CatalogItem) -> Result<Value> {
        let record = NativeRecord {
            id: protect_id(&item.internal_id),
            title: item.title.clone(),
            ean: item.ean.clone(),
            upc: item.upc.clone(),
            isbn: item.isbn.clone(),
            manual: item.manual,
            sub_type: item.sub_type.clone(),
            last_modified: item.last_modified,
            cover_urls: item.cover_urls.clone(),
            attributes: item.attributes.clone(),
        };
        Ok(serde_json::to_value(record)?)
    }
}

/// Fill the column `code` classifies into, unless it is already set.
fn assign_code(item: &mut CatalogItem, code: &str) {
    let slot = match IdentityKey::classify(code, item.kind) {
        IdentityKey::InternalId(_) => return,
        IdentityKey::Ean(_) => &mut item.ean,
        IdentityKey::Upc(_) => &mut item.upc,
        IdentityKey::Isbn(_) => &mut item.isbn,
    };
    if slot.is_none() {
        *slot = Some(code.to_string());
    }
}

fn overwrite_code(item: &mut CatalogItem, code: &str) {
    let slot = match IdentityKey::classify(code, item.kind) {
        IdentityKey::InternalId(_) => return,
        IdentityKey::Ean(_) => &mut item.ean,
        IdentityKey::Upc(_) => &mut item.upc,
        IdentityKey::Isbn(_) => &mut item.isbn,
    };
    *slot = Some(code.to_string());
}

/// Adapter for any kind backed by a [`RemoteLookupPort`].
pub struct DefaultKindAdapter {
    kind: MediaKind,
    lookup: Arc<dyn RemoteLookupPort>,
}

impl DefaultKindAdapter {
    pub fn new(kind: MediaKind, lookup: Arc<dyn RemoteLookupPort>) -> Self {
        Self { kind, lookup }
    }
}

#[async_trait]
impl MediaKindAdapter for DefaultKindAdapter {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn lookup(&self, record: &ImportRecord) -> Result<Option<ItemMetadata>> {
        match record.lookup_key() {
            Some(key) => Ok(self.lookup.find(&key, self.kind).await?),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{unprotect_id, SourceFormat};
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{CoverUrls, Freshness};
    use mockall::mock;
    use mockall::predicate::eq;
    use serde_json::json;

    mock! {
        pub Lookup {}

        #[async_trait]
        impl RemoteLookupPort for Lookup {
            async fn find(&self, id: &str, kind: MediaKind) -> BridgeResult<Option<ItemMetadata>>;
            async fn fetch_freshness(&self, cover_url: &str) -> BridgeResult<Freshness>;
        }
    }

    struct EchoLookup;

    #[async_trait]
    impl RemoteLookupPort for EchoLookup {
        async fn find(&self, id: &str, _kind: MediaKind) -> BridgeResult<Option<ItemMetadata>> {
            Ok(Some(ItemMetadata {
                title: format!("Title {}", id),
                ..Default::default()
            }))
        }

        async fn fetch_freshness(&self, _cover_url: &str) -> BridgeResult<Freshness> {
            Ok(Freshness {
                last_modified: None,
                status_code: 200,
            })
        }
    }

    fn adapter(kind: MediaKind) -> DefaultKindAdapter {
        DefaultKindAdapter::new(kind, Arc::new(EchoLookup))
    }

    #[tokio::test]
    async fn test_lookup_uses_first_external_id() {
        let adapter = adapter(MediaKind::Books);
        let record = adapter
            .parse_record(&json!({ "ean": "9780000000002" }))
            .unwrap();

        let metadata = adapter.lookup(&record).await.unwrap().unwrap();
        assert_eq!(metadata.title, "Title 9780000000002");

        let item = adapter.to_item(&record, metadata, Some("hardcover"));
        assert!(item.internal_id.starts_with('b'));
        assert_eq!(item.isbn.as_deref(), Some("9780000000002"));
        assert_eq!(item.sub_type.as_deref(), Some("hardcover"));
    }

    #[tokio::test]
    async fn test_lookup_sends_code_and_kind() {
        let mut lookup = MockLookup::new();
        lookup
            .expect_find()
            .with(eq("036000291452"), eq(MediaKind::Gadgets))
            .times(1)
            .returning(|_, _| Ok(None));
        let adapter = DefaultKindAdapter::new(MediaKind::Gadgets, Arc::new(lookup));

        let record = adapter
            .parse_record(&json!({ "upc": 36000291452_u64, "ean": "036000291452" }))
            .unwrap();
        assert!(adapter.lookup(&record).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_without_codes_never_reaches_remote() {
        let mut lookup = MockLookup::new();
        lookup.expect_find().never();
        let adapter = DefaultKindAdapter::new(MediaKind::Toys, Arc::new(lookup));

        let record = adapter.parse_record(&json!({ "title": "Wooden train" })).unwrap();
        assert!(adapter.lookup(&record).await.unwrap().is_none());
    }

    #[test]
    fn test_native_record_keeps_its_internal_id() {
        let adapter = adapter(MediaKind::Books);
        let record = adapter
            .parse_record(&json!({ "id": protect_id("bkeep"), "title": "T", "manual": true }))
            .unwrap();

        let item = adapter.manual_item(&record, None);
        assert_eq!(item.internal_id, "bkeep");
        assert!(item.manual);
    }

    #[test]
    fn test_foreign_internal_id_is_replaced() {
        let adapter = adapter(MediaKind::Books);
        let record = adapter
            .parse_record(&json!({ "id": protect_id("m123"), "title": "Heat", "manual": true }))
            .unwrap();

        let item = adapter.manual_item(&record, None);
        assert_ne!(item.internal_id, "m123");
        assert!(MediaKind::Books.owns_id(&item.internal_id));
    }

    #[test]
    fn test_export_record_round_trips_through_parse() {
        let adapter = adapter(MediaKind::Music);
        let mut item = CatalogItem::with_id(MediaKind::Music, "u77", "Blue Train");
        item.upc = Some("724349532725".to_string());
        item.cover_urls = CoverUrls {
            small: Some("https://covers.example/u77.jpg".to_string()),
            ..Default::default()
        };

        let value = adapter.export_record(&item).unwrap();
        let record = adapter.parse_record(&value).unwrap();

        assert_eq!(record.format, SourceFormat::Native);
        assert_eq!(unprotect_id(record.protected_id.as_deref().unwrap()), "u77");
        assert_eq!(record.external_ids, vec!["724349532725"]);
        assert_eq!(record.cover_urls, item.cover_urls);
    }

    #[test]
    fn test_merge_overwrites_fields_from_source() {
        let adapter = adapter(MediaKind::Toys);
        let mut existing = CatalogItem::with_id(MediaKind::Toys, "t1", "Old name");
        existing.attributes.insert("age".into(), "3+".into());
        let record = adapter
            .parse_record(&json!({ "ean": "4006381333931", "title": "New name", "age": "5+" }))
            .unwrap();

        let merged = adapter.merge_record(existing, &record);
        assert_eq!(merged.internal_id, "t1");
        assert_eq!(merged.title, "New name");
        assert_eq!(merged.ean.as_deref(), Some("4006381333931"));
        assert_eq!(merged.attributes.get("age").map(String::as_str), Some("5+"));
    }

    #[test]
    fn test_merge_keeps_manual_flag_unless_record_sets_it() {
        let adapter = adapter(MediaKind::Toys);
        let mut placeholder = CatalogItem::with_id(MediaKind::Toys, "t2", "Hand-made kite");
        placeholder.manual = true;

        let silent = adapter
            .parse_record(&json!({ "ean": "4006381333931", "title": "Kite" }))
            .unwrap();
        assert_eq!(silent.manual, None);
        let merged = adapter.merge_record(placeholder, &silent);
        assert!(merged.manual);

        let explicit = adapter
            .parse_record(&json!({ "ean": "4006381333931", "manual": false }))
            .unwrap();
        let merged = adapter.merge_record(merged, &explicit);
        assert!(!merged.manual);
    }
}
