//! Batched, fail-fast mutation of one collection.
//!
//! [`StoreMutator`] splits logical deletes and upserts into sub-batches no
//! larger than the configured sizes. The first failing sub-batch stops the
//! build with a [`SyncError::StoreMutation`] naming the batch index and the
//! first document in it; nothing after it is issued.

use crate::embedding::l2_normalize;
use crate::error::{MutationOp, SyncError};
use crate::identity;
use crate::models::{ChunkRecord, Metadata};
use crate::store::Collection;

/// Counters for one build's mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationStats {
    pub chunks_deleted: u64,
    pub chunks_upserted: u64,
    pub delete_batches: usize,
    pub upsert_batches: usize,
}

pub struct StoreMutator<'a> {
    collection: &'a dyn Collection,
    delete_batch_size: usize,
    upsert_batch_size: usize,
    normalize: bool,
    pending: Vec<ChunkRecord>,
    stats: MutationStats,
}

impl<'a> StoreMutator<'a> {
    /// `normalize` should be `true` when the embedder does not already
    /// return unit vectors.
    pub fn new(
        collection: &'a dyn Collection,
        delete_batch_size: usize,
        upsert_batch_size: usize,
        normalize: bool,
    ) -> Result<Self, SyncError> {
        if delete_batch_size == 0 || upsert_batch_size == 0 {
            return Err(SyncError::Configuration(
                "delete and upsert batch sizes must be > 0".to_string(),
            ));
        }
        Ok(Self {
            collection,
            delete_batch_size,
            upsert_batch_size,
            normalize,
            pending: Vec::with_capacity(upsert_batch_size),
            stats: MutationStats::default(),
        })
    }

    pub fn stats(&self) -> MutationStats {
        self.stats
    }

    /// Delete `ids` in sub-batches of at most `delete_batch_size`.
    pub async fn delete_ids(&mut self, ids: &[String]) -> Result<(), SyncError> {
        for batch in ids.chunks(self.delete_batch_size) {
            let batch_index = self.stats.delete_batches;
            self.collection
                .delete(batch)
                .await
                .map_err(|source| SyncError::StoreMutation {
                    op: MutationOp::Delete,
                    batch_index,
                    document_id: batch
                        .first()
                        .and_then(|id| identity::document_of(id))
                        .map(str::to_string),
                    source,
                })?;
            self.stats.delete_batches += 1;
            self.stats.chunks_deleted += batch.len() as u64;
            tracing::debug!(batch_index, ids = batch.len(), "deleted chunk batch");
        }
        Ok(())
    }

    /// Upsert one logical batch, split into sub-batches of at most
    /// `upsert_batch_size`. Vectors are normalized first when configured.
    pub async fn upsert_batch(
        &mut self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
        vectors: &[Vec<f32>],
    ) -> Result<(), SyncError> {
        let n = ids.len();
        if documents.len() != n || metadatas.len() != n || vectors.len() != n {
            return Err(SyncError::Configuration(format!(
                "upsert batch has {} ids but {} documents, {} metadatas, {} vectors",
                n,
                documents.len(),
                metadatas.len(),
                vectors.len()
            )));
        }
        let mut start = 0;
        while start < n {
            let end = (start + self.upsert_batch_size).min(n);
            let batch_vectors: Vec<Vec<f32>> = vectors[start..end]
                .iter()
                .map(|v| self.prepare(v.clone()))
                .collect();
            self.send_upsert(
                &ids[start..end],
                &documents[start..end],
                &metadatas[start..end],
                &batch_vectors,
            )
            .await?;
            start = end;
        }
        Ok(())
    }

    /// Buffer one chunk; flushes once the buffer reaches `upsert_batch_size`.
    pub async fn push(&mut self, record: ChunkRecord) -> Result<(), SyncError> {
        self.pending.push(record);
        if self.pending.len() >= self.upsert_batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Upsert whatever is buffered as one logical batch.
    pub async fn flush(&mut self) -> Result<(), SyncError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.pending);
        let mut ids = Vec::with_capacity(batch.len());
        let mut documents = Vec::with_capacity(batch.len());
        let mut metadatas = Vec::with_capacity(batch.len());
        let mut vectors = Vec::with_capacity(batch.len());
        for r in batch {
            ids.push(r.id);
            documents.push(r.text);
            metadatas.push(r.metadata);
            vectors.push(r.vector);
        }
        self.upsert_batch(&ids, &documents, &metadatas, &vectors).await
    }

    fn prepare(&self, mut v: Vec<f32>) -> Vec<f32> {
        if self.normalize {
            l2_normalize(&mut v);
        }
        v
    }

    async fn send_upsert(
        &mut self,
        ids: &[String],
        documents: &[String],
        metadatas: &[Metadata],
        vectors: &[Vec<f32>],
    ) -> Result<(), SyncError> {
        let batch_index = self.stats.upsert_batches;
        self.collection
            .upsert(ids, documents, metadatas, vectors)
            .await
            .map_err(|source| SyncError::StoreMutation {
                op: MutationOp::Upsert,
                batch_index,
                document_id: ids
                    .first()
                    .and_then(|id| identity::document_of(id))
                    .map(str::to_string),
                source,
            })?;
        self.stats.upsert_batches += 1;
        self.stats.chunks_upserted += ids.len() as u64;
        tracing::debug!(batch_index, ids = ids.len(), "upserted chunk batch");
        Ok(())
    }
}
