mod models;

pub use models::{Asset, FileRow, FileWithProvenance, Item};

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::error::{CoreError, Result};

const SCHEMA: &str = include_str!("schema.sql");

/// The relational store of assets, files, and items, backed by a single
/// embedded SQLite database file under `base_dir`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if absent) `base_dir/sia.db` and apply the schema.
    /// Idempotent: safe to call against an already-initialized database.
    pub async fn open(base_dir: &Path, pool_size: u32) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(|e| CoreError::io(base_dir, e))?;
        let db_path = base_dir.join("sia.db");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size.max(1))
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        info!(path = %db_path.display(), "metadata store ready");

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    /// Every multi-row operation in this store goes through this helper so
    /// no partial state survives a mid-batch failure.
    pub async fn in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut Transaction<'_, Sqlite>) -> BoxFuture<'c, Result<T>>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    pub async fn create_item(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        author: &str,
        post_id: &str,
        source: Option<&str>,
    ) -> Result<i64> {
        let saved_at = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO items (author, post_id, source_url, saved_at) \
             VALUES (?1, ?2, ?3, ?4) RETURNING id",
        )
        .bind(author)
        .bind(post_id)
        .bind(source)
        .bind(saved_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Insert an asset row for `hash` if it doesn't already exist. Returns
    /// `(asset_id, was_new)` so callers can report duplicates.
    pub async fn upsert_asset_by_hash(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        content_hash: &str,
        extension: &str,
        byte_length: u64,
    ) -> Result<(i64, bool)> {
        if let Some(existing) =
            sqlx::query_scalar::<_, i64>("SELECT id FROM assets WHERE content_hash = ?1")
                .bind(content_hash)
                .fetch_optional(&mut **tx)
                .await?
        {
            return Ok((existing, false));
        }

        let created_at = Utc::now();
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO assets (content_hash, extension, byte_length, created_at) \
             VALUES (?1, ?2, ?3, ?4) RETURNING id",
        )
        .bind(content_hash)
        .bind(extension)
        .bind(byte_length as i64)
        .bind(created_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok((id, true))
    }

    pub async fn insert_file(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        asset_id: i64,
        relative_path: &str,
        folder_name: &str,
        mtime: DateTime<Utc>,
        item_id: Option<i64>,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO files (asset_id, relative_path, folder_name, mtime, item_id) \
             VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
        )
        .bind(asset_id)
        .bind(relative_path)
        .bind(folder_name)
        .bind(mtime)
        .bind(item_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    pub async fn find_asset_by_hash(&self, content_hash: &str) -> Result<Option<Asset>> {
        let row = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE content_hash = ?1")
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Paginated, filtered listing ordered by `mtime` descending.
    /// Returns `(rows, total_matching)`.
    pub async fn list_files(
        &self,
        author: Option<&str>,
        query_substring: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<FileWithProvenance>, i64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = ((page - 1) as i64) * page_size as i64;
        let like = query_substring.map(|q| format!("%{q}%"));

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files \
             WHERE (?1 IS NULL OR folder_name = ?1) \
               AND (?2 IS NULL OR relative_path LIKE ?2)",
        )
        .bind(author)
        .bind(&like)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, FileWithProvenance>(
            "SELECT f.relative_path, f.folder_name, f.mtime, i.post_id, i.source_url \
             FROM files f \
             LEFT JOIN items i ON i.id = f.item_id \
             WHERE (?1 IS NULL OR f.folder_name = ?1) \
               AND (?2 IS NULL OR f.relative_path LIKE ?2) \
             ORDER BY f.mtime DESC \
             LIMIT ?3 OFFSET ?4",
        )
        .bind(author)
        .bind(&like)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows, total))
    }

    /// Full listing ordered by `mtime` descending, used by the gallery indexer.
    pub async fn list_all_files(&self) -> Result<Vec<FileWithProvenance>> {
        let rows = sqlx::query_as::<_, FileWithProvenance>(
            "SELECT f.relative_path, f.folder_name, f.mtime, i.post_id, i.source_url \
             FROM files f \
             LEFT JOIN items i ON i.id = f.item_id \
             ORDER BY f.mtime DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Update `relative_path`/`folder_name` (and bump `mtime`) for a renamed
    /// file, in one transaction.
    pub async fn rename_file(
        &self,
        old_relative_path: &str,
        new_relative_path: &str,
        new_folder_name: &str,
        new_mtime: DateTime<Utc>,
    ) -> Result<()> {
        self.in_transaction(|tx| {
            let old = old_relative_path.to_owned();
            let new = new_relative_path.to_owned();
            let folder = new_folder_name.to_owned();
            Box::pin(async move {
                sqlx::query(
                    "UPDATE files SET relative_path = ?1, folder_name = ?2, mtime = ?3 \
                     WHERE relative_path = ?4",
                )
                .bind(&new)
                .bind(&folder)
                .bind(new_mtime)
                .bind(&old)
                .execute(&mut **tx)
                .await?;
                Ok(())
            })
        })
        .await
    }

    /// Delete `File` rows whose path is not present on disk anymore, as
    /// observed by a full directory walk during a watcher reconcile pass.
    /// Returns the number of rows removed.
    pub async fn reconcile(&self, existing_relative_paths: &HashSet<String>) -> Result<u64> {
        let all: Vec<String> =
            sqlx::query_scalar("SELECT relative_path FROM files")
                .fetch_all(&self.pool)
                .await?;

        let stale: Vec<&String> = all
            .iter()
            .filter(|path| !existing_relative_paths.contains(path.as_str()))
            .collect();

        if stale.is_empty() {
            return Ok(0);
        }

        self.in_transaction(|tx| {
            let stale: Vec<String> = stale.into_iter().cloned().collect();
            Box::pin(async move {
                let mut removed = 0u64;
                for path in &stale {
                    let result = sqlx::query("DELETE FROM files WHERE relative_path = ?1")
                        .bind(path)
                        .execute(&mut **tx)
                        .await?;
                    removed += result.rows_affected();
                }
                Ok(removed)
            })
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedup_returns_same_asset_id() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        let (id_a, new_a) = store
            .upsert_asset_by_hash(&mut tx, "deadbeef", "png", 8)
            .await
            .unwrap();
        let (id_b, new_b) = store
            .upsert_asset_by_hash(&mut tx, "deadbeef", "png", 8)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(id_a, id_b);
        assert!(new_a);
        assert!(!new_b);
    }

    #[tokio::test]
    async fn insert_and_find_by_hash() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        let (asset_id, was_new) = store
            .upsert_asset_by_hash(&mut tx, "abc123", "jpg", 4)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(was_new);

        let found = store.find_asset_by_hash("abc123").await.unwrap().unwrap();
        assert_eq!(found.id, asset_id);

        let mut tx = store.pool().begin().await.unwrap();
        let (again_id, again_new) = store
            .upsert_asset_by_hash(&mut tx, "abc123", "jpg", 4)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(again_id, asset_id);
        assert!(!again_new);
    }

    #[tokio::test]
    async fn reconcile_deletes_dangling_rows() {
        let store = MetadataStore::open_in_memory().await.unwrap();
        let mut tx = store.pool().begin().await.unwrap();
        let (asset_id, _) = store
            .upsert_asset_by_hash(&mut tx, "hash1", "jpg", 4)
            .await
            .unwrap();
        let item_id = store.create_item(&mut tx, "alice", "p1", None).await.unwrap();
        store
            .insert_file(
                &mut tx,
                asset_id,
                "00001_alice/00001_alice_001.jpg",
                "00001_alice",
                Utc::now(),
                Some(item_id),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let removed = store.reconcile(&HashSet::new()).await.unwrap();
        assert_eq!(removed, 1);

        let (files, total) = store.list_files(None, None, 1, 10).await.unwrap();
        assert!(files.is_empty());
        assert_eq!(total, 0);
    }
}
