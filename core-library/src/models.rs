//! Catalog data model.

use bridge_traits::{CoverUrls, MediaKind};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::identity::normalize_code;

/// One catalogued item of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Primary key, prefixed with the kind's id prefix.
    pub internal_id: String,
    pub kind: MediaKind,
    pub ean: Option<String>,
    pub upc: Option<String>,
    pub isbn: Option<String>,
    pub title: String,
    /// Opaque sub-type tag (format, platform, ...)
    pub sub_type: Option<String>,
    /// Placeholder created from a manual import record.
    pub manual: bool,
    /// Cover modification time, Unix seconds. `None` disables freshness checks.
    pub last_modified: Option<i64>,
    pub cover_urls: CoverUrls,
    pub attributes: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl CatalogItem {
    /// New item with a freshly minted internal id.
    pub fn new(kind: MediaKind, title: impl Into<String>) -> Self {
        Self::with_id(kind, Self::mint_id(kind), title)
    }

    pub fn with_id(kind: MediaKind, internal_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            internal_id: internal_id.into(),
            kind,
            ean: None,
            upc: None,
            isbn: None,
            title: title.into(),
            sub_type: None,
            manual: false,
            last_modified: None,
            cover_urls: CoverUrls::default(),
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Mint an internal id for `kind`.
    pub fn mint_id(kind: MediaKind) -> String {
        format!("{}{}", kind.id_prefix(), Uuid::new_v4().simple())
    }

    /// Copy with every alternate key normalised and blank keys dropped.
    pub fn normalized(mut self) -> Self {
        fn clean(code: Option<String>) -> Option<String> {
            code.map(|c| normalize_code(&c)).filter(|c| !c.is_empty())
        }
        self.ean = clean(self.ean);
        self.upc = clean(self.upc);
        self.isbn = clean(self.isbn);
        self
    }

    /// Alternate keys present on the item, in ean/upc/isbn order.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        [&self.ean, &self.upc, &self.isbn]
            .into_iter()
            .filter_map(|code| code.as_deref())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if !self.kind.owns_id(&self.internal_id) {
            return Err(format!(
                "internal id '{}' does not belong to kind {}",
                self.internal_id, self.kind
            ));
        }
        if self.title.trim().is_empty() {
            return Err("title cannot be empty".to_string());
        }
        Ok(())
    }
}

impl<'r> FromRow<'r, SqliteRow> for CatalogItem {
    fn from_row(row: &'r SqliteRow) -> sqlx::Result<Self> {
        let kind: String = row.try_get("kind")?;
        let kind = kind.parse::<MediaKind>().map_err(|e| sqlx::Error::ColumnDecode {
            index: "kind".to_string(),
            source: e.into(),
        })?;

        let attributes: String = row.try_get("attributes")?;
        let attributes =
            serde_json::from_str(&attributes).map_err(|e| sqlx::Error::ColumnDecode {
                index: "attributes".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            internal_id: row.try_get("internal_id")?,
            kind,
            ean: row.try_get("ean")?,
            upc: row.try_get("upc")?,
            isbn: row.try_get("isbn")?,
            title: row.try_get("title")?,
            sub_type: row.try_get("sub_type")?,
            manual: row.try_get("manual")?,
            last_modified: row.try_get("last_modified")?,
            cover_urls: CoverUrls {
                small: row.try_get("cover_small")?,
                medium: row.try_get("cover_medium")?,
                large: row.try_get("cover_large")?,
            },
            attributes,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}
