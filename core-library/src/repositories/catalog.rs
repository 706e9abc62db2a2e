//! Catalog item repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::CatalogItem;
use async_trait::async_trait;
use bridge_traits::MediaKind;
use sqlx::{query_as, SqlitePool};

/// Catalog item repository interface
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Find an item by its internal id
    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogItem>>;

    /// Insert a new item
    ///
    /// # Errors
    /// - [`LibraryError::AlreadyExists`] if the internal id is taken
    /// - [`LibraryError::InvalidInput`] if validation fails
    async fn insert(&self, item: &CatalogItem) -> Result<()>;

    /// Replace every column of an existing item except `created_at`
    ///
    /// # Errors
    /// [`LibraryError::NotFound`] if the item does not exist
    async fn update(&self, item: &CatalogItem) -> Result<()>;

    /// Delete an item. Returns `false` when it did not exist.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Single-row update of the cover timestamp. Returns `false` when the item is gone.
    async fn update_last_modified(&self, id: &str, last_modified: i64) -> Result<bool>;

    /// Every internal id of `kind`, in id order
    async fn list_ids(&self, kind: MediaKind) -> Result<Vec<String>>;

    /// Number of items of `kind`
    async fn count(&self, kind: MediaKind) -> Result<i64>;
}

/// SQLite implementation of [`CatalogRepository`]
pub struct SqliteCatalogRepository {
    pool: SqlitePool,
}

impl SqliteCatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn check(item: &CatalogItem) -> Result<()> {
        item.validate().map_err(|message| LibraryError::InvalidInput {
            field: "catalog_item".to_string(),
            message,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl CatalogRepository for SqliteCatalogRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogItem>> {
        let item = query_as::<_, CatalogItem>("SELECT * FROM catalog_items WHERE internal_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn insert(&self, item: &CatalogItem) -> Result<()> {
        Self::check(item)?;
        let attributes = serde_json::to_string(&item.attributes)?;

        sqlx::query(
            r#"
            INSERT INTO catalog_items (
                internal_id, kind, ean, upc, isbn, title, sub_type, manual,
                last_modified, cover_small, cover_medium, cover_large,
                attributes, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.internal_id)
        .bind(item.kind.as_str())
        .bind(&item.ean)
        .bind(&item.upc)
        .bind(&item.isbn)
        .bind(&item.title)
        .bind(&item.sub_type)
        .bind(item.manual)
        .bind(item.last_modified)
        .bind(&item.cover_urls.small)
        .bind(&item.cover_urls.medium)
        .bind(&item.cover_urls.large)
        .bind(attributes)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LibraryError::AlreadyExists {
                    entity_type: "CatalogItem".to_string(),
                    id: item.internal_id.clone(),
                }
            } else {
                LibraryError::Database(e)
            }
        })?;

        Ok(())
    }

    async fn update(&self, item: &CatalogItem) -> Result<()> {
        Self::check(item)?;
        let attributes = serde_json::to_string(&item.attributes)?;

        let result = sqlx::query(
            r#"
            UPDATE catalog_items SET
                ean = ?, upc = ?, isbn = ?, title = ?, sub_type = ?, manual = ?,
                last_modified = ?, cover_small = ?, cover_medium = ?, cover_large = ?,
                attributes = ?, updated_at = ?
            WHERE internal_id = ? AND kind = ?
            "#,
        )
        .bind(&item.ean)
        .bind(&item.upc)
        .bind(&item.isbn)
        .bind(&item.title)
        .bind(&item.sub_type)
        .bind(item.manual)
        .bind(item.last_modified)
        .bind(&item.cover_urls.small)
        .bind(&item.cover_urls.medium)
        .bind(&item.cover_urls.large)
        .bind(attributes)
        .bind(item.updated_at)
        .bind(&item.internal_id)
        .bind(item.kind.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "CatalogItem".to_string(),
                id: item.internal_id.clone(),
            });
        }

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM catalog_items WHERE internal_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_last_modified(&self, id: &str, last_modified: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE catalog_items SET last_modified = ?, updated_at = ? WHERE internal_id = ?",
        )
        .bind(last_modified)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_ids(&self, kind: MediaKind) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            query_as("SELECT internal_id FROM catalog_items WHERE kind = ? ORDER BY internal_id")
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn count(&self, kind: MediaKind) -> Result<i64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM catalog_items WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use bridge_traits::CoverUrls;

    fn sample(kind: MediaKind, title: &str) -> CatalogItem {
        let mut item = CatalogItem::new(kind, title);
        item.ean = Some("9780000000001".to_string());
        item.last_modified = Some(1_600_000_000);
        item.cover_urls = CoverUrls {
            small: None,
            medium: Some("https://covers.example/m.jpg".to_string()),
            large: None,
        };
        item.attributes.insert("author".to_string(), "Le Guin".to_string());
        item
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = SqliteCatalogRepository::new(create_test_pool().await.unwrap());
        let item = sample(MediaKind::Books, "The Dispossessed");

        repo.insert(&item).await.unwrap();
        let found = repo.find_by_id(&item.internal_id).await.unwrap().unwrap();

        assert_eq!(found, item);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_already_exists() {
        let repo = SqliteCatalogRepository::new(create_test_pool().await.unwrap());
        let item = sample(MediaKind::Books, "Lathe of Heaven");

        repo.insert(&item).await.unwrap();
        let err = repo.insert(&item).await.unwrap_err();
        assert!(matches!(err, LibraryError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let repo = SqliteCatalogRepository::new(create_test_pool().await.unwrap());
        let err = repo
            .update(&sample(MediaKind::Books, "Nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, LibraryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_last_modified_touches_one_row() {
        let repo = SqliteCatalogRepository::new(create_test_pool().await.unwrap());
        let a = sample(MediaKind::Books, "A");
        let b = sample(MediaKind::Books, "B");
        repo.insert(&a).await.unwrap();
        repo.insert(&b).await.unwrap();

        assert!(repo.update_last_modified(&a.internal_id, 1_700_000_000).await.unwrap());
        assert!(!repo.update_last_modified("bmissing", 1).await.unwrap());

        let a = repo.find_by_id(&a.internal_id).await.unwrap().unwrap();
        let b = repo.find_by_id(&b.internal_id).await.unwrap().unwrap();
        assert_eq!(a.last_modified, Some(1_700_000_000));
        assert_eq!(b.last_modified, Some(1_600_000_000));
    }

    #[tokio::test]
    async fn test_list_and_count_are_scoped_by_kind() {
        let repo = SqliteCatalogRepository::new(create_test_pool().await.unwrap());
        repo.insert(&sample(MediaKind::Books, "A")).await.unwrap();
        repo.insert(&sample(MediaKind::Books, "B")).await.unwrap();
        repo.insert(&sample(MediaKind::Movies, "C")).await.unwrap();

        let ids = repo.list_ids(MediaKind::Books).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(repo.count(MediaKind::Movies).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = SqliteCatalogRepository::new(create_test_pool().await.unwrap());
        let item = sample(MediaKind::Toys, "Kite");
        repo.insert(&item).await.unwrap();

        assert!(repo.delete(&item.internal_id).await.unwrap());
        assert!(!repo.delete(&item.internal_id).await.unwrap());
        assert!(repo.find_by_id(&item.internal_id).await.unwrap().is_none());
    }
}
