//! Vector store client abstraction.
//!
//! ragsync is a client of a vector store, never the store itself. The
//! [`VectorStore`] / [`Collection`] pair is the whole surface the build
//! engine relies on, and the only assumption it makes is that
//! [`Collection::count`] reflects completed upserts and deletes.
//!
//! Both `upsert` (same id overwrites) and `delete` (missing ids are
//! ignored) must be idempotent: an interrupted build is re-converged by
//! simply re-issuing the same calls.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::models::Metadata;

/// Handle to one named collection.
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// Number of items currently stored.
    async fn count(&self) -> Result<u64>;

    /// Insert or overwrite items. All slices have the same length.
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Remove items by id. Unknown ids are a no-op.
    async fn delete(&self, ids: &[String]) -> Result<()>;
}

/// A vector store holding named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Human-readable location (file path, URL) recorded in manifests.
    fn location(&self) -> &str;

    async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<Box<dyn Collection>>;

    /// Item count of `name`, or `None` when it does not exist. Never
    /// creates the collection.
    async fn collection_count(&self, name: &str) -> Result<Option<u64>>;

    /// Drop a collection and all its items. Dropping a missing collection
    /// is a no-op.
    async fn delete_collection(&self, name: &str) -> Result<()>;
}

/// Reject upserts whose parallel slices disagree in length.
pub fn check_upsert_shape(
    ids: &[String],
    documents: &[String],
    metadatas: &[Metadata],
    vectors: &[Vec<f32>],
) -> Result<()> {
    let n = ids.len();
    if documents.len() != n || metadatas.len() != n || vectors.len() != n {
        bail!(
            "upsert shape mismatch: {} ids, {} documents, {} metadatas, {} vectors",
            n,
            documents.len(),
            metadatas.len(),
            vectors.len()
        );
    }
    Ok(())
}
