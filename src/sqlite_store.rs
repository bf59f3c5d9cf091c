//! SQLite-backed [`VectorStore`] implementation.
//!
//! Collections are rows of `collections`; items are rows of `items` keyed
//! by `(collection, id)`. Every upsert or delete call runs in a single
//! transaction, so a failed sub-batch leaves no partial rows behind.

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;

use ragsync_core::embedding::vec_to_blob;
use ragsync_core::models::Metadata;
use ragsync_core::store::{check_upsert_shape, Collection, VectorStore};

use crate::{db, migrate};

/// SQLite implementation of [`VectorStore`].
pub struct SqliteVectorStore {
    pool: SqlitePool,
    location: String,
}

impl SqliteVectorStore {
    /// Open the store at `path`, creating the file and schema if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            location: path.display().to_string(),
        })
    }

    /// Open an existing store for counting only. The file is never created
    /// and no migrations run.
    pub async fn open_read_only(path: &Path) -> Result<Self> {
        let pool = db::connect_read_only(path).await?;
        Ok(Self {
            pool,
            location: path.display().to_string(),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn count_items(pool: &SqlitePool, collection: &str) -> Result<u64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE collection = ?")
        .bind(collection)
        .fetch_one(pool)
        .await?;
    Ok(n as u64)
}

struct SqliteCollection {
    pool: SqlitePool,
    name: String,
}

#[async_trait]
impl Collection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<u64> {
        count_items(&self.pool, &self.name).await
    }

    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        check_upsert_shape(ids, documents, metadatas, vectors)?;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        for i in 0..ids.len() {
            if vectors[i].is_empty() {
                bail!("refusing to store an empty vector for {}", ids[i]);
            }
            let metadata_json = serde_json::to_string(&metadatas[i])?;
            sqlx::query(
                r#"
                INSERT INTO items (collection, id, document, metadata_json, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.name)
            .bind(&ids[i])
            .bind(&documents[i])
            .bind(&metadata_json)
            .bind(vec_to_blob(&vectors[i]))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM items WHERE collection = ? AND id = ?")
                .bind(&self.name)
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<Box<dyn Collection>> {
        sqlx::query(
            "INSERT INTO collections (name, metadata_json, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(serde_json::to_string(metadata)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(Box::new(SqliteCollection {
            pool: self.pool.clone(),
            name: name.to_string(),
        }))
    }

    async fn collection_count(&self, name: &str) -> Result<Option<u64>> {
        let exists: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM collections WHERE name = ?")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Ok(None);
        }
        Ok(Some(count_items(&self.pool, name).await?))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM items WHERE collection = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
