//! # Identity Resolution
//!
//! Decides whether a scanned or imported code already names an item of a kind.
//!
//! ## Overview
//!
//! Items can be addressed by four keys: the internal id, EAN, UPC and ISBN.
//! Barcode scanners and vendor feeds disagree on leading zeros, so every code
//! is normalised with [`normalize_code`] before it is stored or compared.
//!
//! Two matching policies are available:
//!
//! - [`MatchPolicy::AnyField`] (default): the normalised input is compared
//!   against all four columns. A UPC can therefore match another item's EAN
//!   when the digit strings coincide.
//! - [`MatchPolicy::SameField`]: the input is classified into one
//!   [`IdentityKey`] and only that key's columns are compared. A Bookland
//!   EAN-13 (`978`/`979`) is a book's ISBN-13, so it is looked up in both
//!   `isbn` and `ean`.
//!
//! All lookups are scoped to one [`MediaKind`].

use bridge_traits::MediaKind;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::error::Result;

/// Strip a leading run of zeros, always keeping the last character.
///
/// `"000123"` becomes `"123"`, `"0"` and `"000"` become `"0"`. Surrounding
/// whitespace is trimmed. Idempotent.
pub fn normalize_code(code: &str) -> String {
    let trimmed = code.trim();
    let zeros = trimmed.bytes().take_while(|b| *b == b'0').count();
    let keep_from = zeros.min(trimmed.len().saturating_sub(1));
    trimmed[keep_from..].to_string()
}

/// Which column a code is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityKey {
    InternalId(String),
    Ean(String),
    Upc(String),
    Isbn(String),
}

impl IdentityKey {
    /// Classify a raw code by its shape.
    ///
    /// | Shape | Key |
    /// |-------|-----|
    /// | kind prefix + rest | internal id |
    /// | 10 chars (digits, optional trailing `X`) | ISBN |
    /// | 13 digits starting `978`/`979` | ISBN |
    /// | 11 or 12 digits | UPC |
    /// | anything else | EAN |
    ///
    /// The classification uses the raw length, so it must run before
    /// normalisation; the stored value is the normalised code.
    pub fn classify(raw: &str, kind: MediaKind) -> Self {
        let code = raw.trim();
        let digits = code.bytes().all(|b| b.is_ascii_digit());

        if !digits && kind.owns_id(code) {
            return IdentityKey::InternalId(code.to_string());
        }

        let isbn10 = code.len() == 10
            && code.is_ascii()
            && code[..9].bytes().all(|b| b.is_ascii_digit())
            && code[9..].bytes().all(|b| b.is_ascii_digit() || b == b'X' || b == b'x');
        let normalized = normalize_code(code);

        let bookland =
            digits && code.len() == 13 && (code.starts_with("978") || code.starts_with("979"));

        if isbn10 || bookland {
            IdentityKey::Isbn(normalized)
        } else if digits && (code.len() == 11 || code.len() == 12) {
            IdentityKey::Upc(normalized)
        } else {
            IdentityKey::Ean(normalized)
        }
    }

    /// Columns holding this key. An ISBN-13 is also stored as an EAN.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            IdentityKey::InternalId(_) => &["internal_id"],
            IdentityKey::Ean(_) => &["ean"],
            IdentityKey::Upc(_) => &["upc"],
            IdentityKey::Isbn(v) if v.len() == 13 => &["isbn", "ean"],
            IdentityKey::Isbn(_) => &["isbn"],
        }
    }

    pub fn value(&self) -> &str {
        match self {
            IdentityKey::InternalId(v)
            | IdentityKey::Ean(v)
            | IdentityKey::Upc(v)
            | IdentityKey::Isbn(v) => v,
        }
    }
}

/// How [`IdentityResolver::find_id`] compares a raw code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Compare the code against every key column.
    #[default]
    AnyField,
    /// Compare only the column the code's shape selects.
    SameField,
}

/// Resolves raw codes to internal ids within one kind.
#[derive(Clone)]
pub struct IdentityResolver {
    pool: SqlitePool,
    kind: MediaKind,
    policy: MatchPolicy,
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl IdentityResolver {
    pub fn new(pool: SqlitePool, kind: MediaKind) -> Self {
        Self {
            pool,
            kind,
            policy: MatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Whether any item of this kind is named by `raw`.
    pub async fn exists(&self, raw: &str) -> Result<bool> {
        Ok(self.find_id(raw).await?.is_some())
    }

    /// Internal id of the item named by `raw`, under the configured policy.
    #[instrument(skip(self), fields(kind = %self.kind, policy = ?self.policy))]
    pub async fn find_id(&self, raw: &str) -> Result<Option<String>> {
        let normalized = normalize_code(raw);
        if normalized.is_empty() {
            return Ok(None);
        }

        let found = match self.policy {
            MatchPolicy::AnyField => self.find_any_field(&normalized).await?,
            MatchPolicy::SameField => {
                self.find_by_key(&IdentityKey::classify(raw, self.kind))
                    .await?
            }
        };

        debug!(found = found.is_some(), "Resolved code");
        Ok(found)
    }

    /// Internal id of the item whose `key` columns match.
    pub async fn find_by_key(&self, key: &IdentityKey) -> Result<Option<String>> {
        if key.value().is_empty() {
            return Ok(None);
        }

        // Column names come from a closed set, never from input.
        let matches = key
            .columns()
            .iter()
            .map(|column| format!("{} LIKE ?2 ESCAPE '\\'", column))
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT internal_id FROM catalog_items \
             WHERE kind = ?1 AND ({}) \
             ORDER BY internal_id LIMIT 1",
            matches
        );

        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(self.kind.as_str())
            .bind(escape_like(key.value()))
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Strict internal-id lookup.
    pub async fn exists_by_id(&self, internal_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM catalog_items WHERE kind = ? AND internal_id = ?")
                .bind(self.kind.as_str())
                .bind(internal_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    async fn find_any_field(&self, normalized: &str) -> Result<Option<String>> {
        let pattern = escape_like(normalized);
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT internal_id FROM catalog_items
            WHERE kind = ?1
              AND (internal_id LIKE ?2 ESCAPE '\'
                   OR ean LIKE ?2 ESCAPE '\'
                   OR upc LIKE ?2 ESCAPE '\'
                   OR isbn LIKE ?2 ESCAPE '\')
            ORDER BY internal_id
            LIMIT 1
            "#,
        )
        .bind(self.kind.as_str())
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id,)| id))
    }
}
