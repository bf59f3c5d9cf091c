//! In-memory [`VectorStore`] for tests and dry runs.
//!
//! Collections live in a `HashMap` behind an `Arc<RwLock<…>>`, so every
//! handle returned by [`get_or_create_collection`](VectorStore::get_or_create_collection)
//! sees the same data.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::Metadata;

use super::{check_upsert_shape, Collection, VectorStore};

/// One stored item.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub document: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

#[derive(Default)]
struct MemCollection {
    metadata: Metadata,
    items: BTreeMap<String, StoredItem>,
}

type Collections = Arc<RwLock<HashMap<String, MemCollection>>>;

fn read(c: &Collections) -> Result<RwLockReadGuard<'_, HashMap<String, MemCollection>>> {
    c.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write(c: &Collections) -> Result<RwLockWriteGuard<'_, HashMap<String, MemCollection>>> {
    c.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// In-memory store.
pub struct InMemoryVectorStore {
    location: String,
    collections: Collections,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            location: "memory://".to_string(),
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sorted ids stored in `collection` (empty if it does not exist).
    pub fn ids(&self, collection: &str) -> Result<Vec<String>> {
        let guard = read(&self.collections)?;
        Ok(guard
            .get(collection)
            .map(|c| c.items.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<StoredItem>> {
        let guard = read(&self.collections)?;
        Ok(guard
            .get(collection)
            .and_then(|c| c.items.get(id))
            .cloned())
    }

    pub fn collection_metadata(&self, collection: &str) -> Result<Option<Metadata>> {
        let guard = read(&self.collections)?;
        Ok(guard.get(collection).map(|c| c.metadata.clone()))
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemoryCollection {
    name: String,
    collections: Collections,
}

#[async_trait]
impl Collection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<u64> {
        let guard = read(&self.collections)?;
        let coll = guard
            .get(&self.name)
            .ok_or_else(|| anyhow!("collection '{}' was dropped", self.name))?;
        Ok(coll.items.len() as u64)
    }

    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        check_upsert_shape(ids, documents, metadatas, vectors)?;
        let mut guard = write(&self.collections)?;
        let coll = guard
            .get_mut(&self.name)
            .ok_or_else(|| anyhow!("collection '{}' was dropped", self.name))?;
        for (i, id) in ids.iter().enumerate() {
            coll.items.insert(
                id.clone(),
                StoredItem {
                    document: documents[i].clone(),
                    metadata: metadatas[i].clone(),
                    vector: vectors[i].clone(),
                },
            );
        }
        Ok(())
    }

    async fn delete(&self, ids: &[String]) -> Result<()> {
        let mut guard = write(&self.collections)?;
        let coll = guard
            .get_mut(&self.name)
            .ok_or_else(|| anyhow!("collection '{}' was dropped", self.name))?;
        for id in ids {
            coll.items.remove(id);
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn get_or_create_collection(
        &self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<Box<dyn Collection>> {
        {
            let mut guard = write(&self.collections)?;
            guard.entry(name.to_string()).or_insert_with(|| MemCollection {
                metadata: metadata.clone(),
                items: BTreeMap::new(),
            });
        }
        Ok(Box::new(InMemoryCollection {
            name: name.to_string(),
            collections: Arc::clone(&self.collections),
        }))
    }

    async fn collection_count(&self, name: &str) -> Result<Option<u64>> {
        let guard = read(&self.collections)?;
        Ok(guard.get(name).map(|c| c.items.len() as u64))
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        write(&self.collections)?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = InMemoryVectorStore::new();
        let coll = store
            .get_or_create_collection("docs", &Metadata::new())
            .await
            .unwrap();
        let docs = vec!["text".to_string()];
        let metas = vec![Metadata::new()];
        let vecs = vec![vec![1.0f32, 0.0]];
        coll.upsert(&ids(&["d:0"]), &docs, &metas, &vecs).await.unwrap();
        coll.upsert(&ids(&["d:0"]), &docs, &metas, &vecs).await.unwrap();
        assert_eq!(coll.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_ignores_unknown_ids() {
        let store = InMemoryVectorStore::new();
        let coll = store
            .get_or_create_collection("docs", &Metadata::new())
            .await
            .unwrap();
        coll.delete(&ids(&["nope:0", "nope:1"])).await.unwrap();
        assert_eq!(coll.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn handles_share_state_and_drop_clears() {
        let store = InMemoryVectorStore::new();
        let a = store
            .get_or_create_collection("docs", &Metadata::new())
            .await
            .unwrap();
        let b = store
            .get_or_create_collection("docs", &Metadata::new())
            .await
            .unwrap();
        a.upsert(
            &ids(&["x:0"]),
            &["t".to_string()],
            &[Metadata::new()],
            &[vec![0.5f32]],
        )
        .await
        .unwrap();
        assert_eq!(b.count().await.unwrap(), 1);

        assert_eq!(store.collection_count("docs").await.unwrap(), Some(1));
        store.delete_collection("docs").await.unwrap();
        assert_eq!(store.collection_count("docs").await.unwrap(), None);
        assert!(a.count().await.is_err());
        let fresh = store
            .get_or_create_collection("docs", &Metadata::new())
            .await
            .unwrap();
        assert_eq!(fresh.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shape_mismatch_is_rejected() {
        let store = InMemoryVectorStore::new();
        let coll = store
            .get_or_create_collection("docs", &Metadata::new())
            .await
            .unwrap();
        let err = coll
            .upsert(&ids(&["a:0", "a:1"]), &["t".to_string()], &[Metadata::new()], &[vec![1.0]])
            .await;
        assert!(err.is_err());
    }
}
