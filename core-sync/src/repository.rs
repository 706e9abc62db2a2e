//! # Transfer Snapshot Repository
//!
//! Stores [`PersistedJobState`](crate::snapshot::PersistedJobState) blobs so a
//! suspended transfer survives process death. At most one snapshot is kept per
//! kind; saving replaces the previous one.

use crate::job::TransferDirection;
use crate::Result;
use async_trait::async_trait;
use bridge_traits::MediaKind;
use sqlx::SqlitePool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
    pub kind: MediaKind,
    pub direction: TransferDirection,
    pub blob: Vec<u8>,
    pub saved_at: i64,
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Insert or replace the snapshot of `kind`
    async fn save(&self, kind: MediaKind, direction: TransferDirection, blob: &[u8]) -> Result<()>;

    async fn load(&self, kind: MediaKind) -> Result<Option<StoredSnapshot>>;

    /// Returns `false` when there was nothing to delete
    async fn delete(&self, kind: MediaKind) -> Result<bool>;

    /// Kinds with a pending snapshot
    async fn pending_kinds(&self) -> Result<Vec<MediaKind>>;
}

pub struct SqliteSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_direction(value: &str) -> TransferDirection {
    if value == TransferDirection::Export.as_str() {
        TransferDirection::Export
    } else {
        TransferDirection::Import
    }
}

#[async_trait]
impl SnapshotRepository for SqliteSnapshotRepository {
    async fn save(&self, kind: MediaKind, direction: TransferDirection, blob: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer_snapshots (kind, direction, snapshot, saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(kind) DO UPDATE SET
                direction = excluded.direction,
                snapshot = excluded.snapshot,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(kind.as_str())
        .bind(direction.as_str())
        .bind(blob)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, kind: MediaKind) -> Result<Option<StoredSnapshot>> {
        let row: Option<(String, Vec<u8>, i64)> = sqlx::query_as(
            "SELECT direction, snapshot, saved_at FROM transfer_snapshots WHERE kind = ?",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(direction, blob, saved_at)| StoredSnapshot {
            kind,
            direction: parse_direction(&direction),
            blob,
            saved_at,
        }))
    }

    async fn delete(&self, kind: MediaKind) -> Result<bool> {
        let result = sqlx::query("DELETE FROM transfer_snapshots WHERE kind = ?")
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_kinds(&self) -> Result<Vec<MediaKind>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT kind FROM transfer_snapshots ORDER BY saved_at")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(kind,)| kind.parse().ok())
            .collect())
    }
}
