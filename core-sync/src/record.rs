//! Import/export record formats.
//!
//! Two source formats are understood:
//!
//! - **Native**: the catalog's own export. Every record carries the item's
//!   internal id under `"id"`, protected as unpadded base64url so that other
//!   tools do not mistake it for a barcode.
//! - **External**: anything else. The first of `ean`, `upc`, `isbn`,
//!   `barcode`, `code` that is present identifies the record.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bridge_traits::CoverUrls;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{Result, SyncError};

/// Field names scanned, in order, for an external record's identifier.
pub const EXTERNAL_ID_FIELDS: [&str; 5] = ["ean", "upc", "isbn", "barcode", "code"];

pub fn protect_id(internal_id: &str) -> String {
    URL_SAFE_NO_PAD.encode(internal_id.as_bytes())
}

/// Decode a protected id. Values that do not decode to UTF-8 are returned as is.
pub fn unprotect_id(protected: &str) -> String {
    match URL_SAFE_NO_PAD
        .decode(protected.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
    {
        Some(id) if !id.is_empty() => id,
        _ => {
            warn!(value = protected, "Protected id did not decode, using raw value");
            protected.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Native,
    External,
}

/// The catalog's own export record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeRecord {
    /// Protected internal id
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ean: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default)]
    pub manual: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub cover_urls: CoverUrls,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A parsed source record, independent of its format.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub format: SourceFormat,
    /// Protected internal id; native records only
    pub protected_id: Option<String>,
    /// Alternate keys in field order, blanks dropped
    pub external_ids: Vec<String>,
    pub title: Option<String>,
    /// `None` when the record has no `manual` field
    pub manual: Option<bool>,
    pub sub_type: Option<String>,
    pub last_modified: Option<i64>,
    pub cover_urls: CoverUrls,
    pub attributes: BTreeMap<String, String>,
}

impl ImportRecord {
    pub fn parse(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| SyncError::InvalidRecord(format!("expected an object, got {}", value)))?;

        let manual = object.get("manual").and_then(Value::as_bool);
        if object.get("id").map(Value::is_string).unwrap_or(false) {
            let native: NativeRecord = serde_json::from_value(value.clone())?;
            return Ok(Self::from_native(native, manual));
        }

        let text = |field: &str| {
            object
                .get(field)
                .and_then(scalar_text)
                .filter(|s| !s.is_empty())
        };

        let external_ids = EXTERNAL_ID_FIELDS.iter().filter_map(|f| text(f)).collect();
        let attributes = object
            .iter()
            .filter(|(key, _)| {
                !EXTERNAL_ID_FIELDS.contains(&key.as_str())
                    && !matches!(key.as_str(), "title" | "manual" | "sub_type")
            })
            .filter_map(|(key, v)| scalar_text(v).map(|text| (key.clone(), text)))
            .collect();

        Ok(Self {
            format: SourceFormat::External,
            protected_id: None,
            external_ids,
            title: text("title"),
            manual,
            sub_type: text("sub_type"),
            last_modified: None,
            cover_urls: CoverUrls::default(),
            attributes,
        })
    }

    fn from_native(native: NativeRecord, manual: Option<bool>) -> Self {
        let external_ids = [native.ean, native.upc, native.isbn]
            .into_iter()
            .flatten()
            .map(|code| code.trim().to_string())
            .filter(|code| !code.is_empty())
            .collect();

        Self {
            format: SourceFormat::Native,
            protected_id: Some(native.id),
            external_ids,
            title: Some(native.title).filter(|t| !t.trim().is_empty()),
            manual,
            sub_type: native.sub_type,
            last_modified: native.last_modified,
            cover_urls: native.cover_urls,
            attributes: native.attributes,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.manual.unwrap_or(false)
    }

    /// Key used for duplicate detection.
    ///
    /// Native records resolve to their unprotected internal id; external records
    /// to their first alternate key.
    pub fn identity_key(&self) -> Option<String> {
        match self.format {
            SourceFormat::Native => self
                .protected_id
                .as_deref()
                .map(unprotect_id)
                .filter(|id| !id.is_empty()),
            SourceFormat::External => self.external_ids.first().cloned(),
        }
    }

    /// Identifier to send to the remote lookup.
    pub fn lookup_key(&self) -> Option<String> {
        self.external_ids
            .first()
            .cloned()
            .or_else(|| self.identity_key())
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
