//! Core data models shared by the planner, the build engine and the
//! state store.
//!
//! The manifest types serialize to the on-disk JSON layout
//! (`schemaHash`, `chunkConf`, `docs{…}`, `lastBuild{…}`), so field names
//! here are part of the file format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::document_id_for;
use crate::strategy::SyncMode;

/// Chunking parameters. Part of the schema fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkConfig {
    pub chunk_chars: usize,
    #[serde(default)]
    pub overlap_chars: usize,
    #[serde(default)]
    pub min_chunk_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_chars: 1800,
            overlap_chars: 200,
            min_chunk_chars: 40,
        }
    }
}

/// A scalar metadata value attached to a stored chunk.
///
/// Vector stores only accept scalars as metadata, so there is no nested
/// or list variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Str(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Str(v)
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self {
        MetaValue::Float(v)
    }
}

impl From<bool> for MetaValue {
    fn from(v: bool) -> Self {
        MetaValue::Bool(v)
    }
}

/// Chunk or collection metadata, ordered for stable serialization.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A document as seen in the current corpus scan, before chunking.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub doc_id: String,
    pub source_uri: String,
    pub source_type: String,
    /// Hex SHA-256 of the document content. Empty means "unknown" and
    /// always classifies the document as changed.
    pub content_sha256: String,
    /// ISO-8601 timestamp reported by the source.
    pub updated_at: String,
    pub body: String,
}

impl SourceDocument {
    /// Build a document from its text, deriving the id and content hash.
    pub fn from_text(source_uri: &str, source_type: &str, updated_at: &str, body: &str) -> Self {
        Self {
            doc_id: document_id_for(source_uri),
            source_uri: source_uri.to_string(),
            source_type: source_type.to_string(),
            content_sha256: sha256_hex(body.as_bytes()),
            updated_at: updated_at.to_string(),
            body: body.to_string(),
        }
    }
}

/// Per-document entry of a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub doc_id: String,
    pub source_uri: String,
    #[serde(default)]
    pub source_type: String,
    pub content_sha256: String,
    pub n_chunks: u64,
    #[serde(default)]
    pub updated_at: String,
}

impl DocumentRecord {
    pub fn from_source(doc: &SourceDocument, n_chunks: u64) -> Self {
        Self {
            doc_id: doc.doc_id.clone(),
            source_uri: doc.source_uri.clone(),
            source_type: doc.source_type.clone(),
            content_sha256: doc.content_sha256.clone(),
            n_chunks,
            updated_at: doc.updated_at.clone(),
        }
    }
}

/// Summary of the build that produced a manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LastBuild {
    pub sync_mode: SyncMode,
    pub units_total: u64,
    pub units_indexed: u64,
    pub units_skipped: u64,
    pub docs_current: u64,
    pub docs_processed: u64,
    pub docs_added: u64,
    pub docs_changed: u64,
    pub docs_unchanged: u64,
    pub docs_deleted: u64,
    pub chunks_deleted: u64,
    pub chunks_upserted: u64,
    pub expected_chunks: u64,
    pub collection_count: u64,
    pub build_seconds: f64,
}

/// Reconciliation state for one (collection, schema fingerprint) pair.
///
/// Replaced wholesale at the end of a verified build, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_hash: String,
    pub db: String,
    pub collection: String,
    pub embed_model: String,
    pub chunk_conf: ChunkConfig,
    #[serde(default)]
    pub include_media_stub: bool,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub docs: BTreeMap<String, DocumentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_build: Option<LastBuild>,
    /// Structural fields that were absent on disk and filled with
    /// defaults while loading. Never written back.
    #[serde(skip)]
    pub upgraded_fields: Vec<String>,
}

impl Manifest {
    /// An empty manifest for a fingerprint that has never been built.
    pub fn empty(
        schema_hash: &str,
        db: &str,
        collection: &str,
        embed_model: &str,
        chunk_conf: ChunkConfig,
        include_media_stub: bool,
    ) -> Self {
        Self {
            schema_hash: schema_hash.to_string(),
            db: db.to_string(),
            collection: collection.to_string(),
            embed_model: embed_model.to_string(),
            chunk_conf,
            include_media_stub,
            updated_at: String::new(),
            docs: BTreeMap::new(),
            last_build: None,
            upgraded_fields: Vec::new(),
        }
    }

    /// Sum of `nChunks` over all documents.
    pub fn total_chunks(&self) -> u64 {
        self.docs.values().map(|d| d.n_chunks).sum()
    }

    pub fn is_legacy(&self) -> bool {
        !self.upgraded_fields.is_empty()
    }
}

/// One chunk in flight to the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(bytes))
}
