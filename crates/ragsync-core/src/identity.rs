//! Deterministic document and chunk identifiers.
//!
//! Chunk ids are the only link between the deletion path (which derives
//! `docId:0 … docId:n-1` from the previous manifest) and the upsert path.
//! Any change to the format here must bump [`ID_STRATEGY_VERSION`], which
//! feeds the schema fingerprint and forces a rebuild.

use crate::models::sha256_hex;

/// Version tag of the id derivation scheme.
pub const ID_STRATEGY_VERSION: &str = "doc-sha256-16:chunk-index/v1";

/// Number of hex characters kept from the SHA-256 of the source URI.
const DOC_ID_HEX_LEN: usize = 16;

/// Stable document id for a source URI.
///
/// Hex only, so it never contains the `:` separator used in chunk ids.
pub fn document_id_for(source_uri: &str) -> String {
    let mut digest = sha256_hex(source_uri.as_bytes());
    digest.truncate(DOC_ID_HEX_LEN);
    digest
}

/// `documentId:chunkIndex`.
pub fn chunk_id(document_id: &str, chunk_index: u64) -> String {
    format!("{}:{}", document_id, chunk_index)
}

/// All chunk ids `0..n_chunks` for a document, in index order.
pub fn chunk_ids(document_id: &str, n_chunks: u64) -> Vec<String> {
    (0..n_chunks).map(|i| chunk_id(document_id, i)).collect()
}

/// Document part of a chunk id, if it has one.
pub fn document_of(chunk_id: &str) -> Option<&str> {
    chunk_id.rsplit_once(':').map(|(doc, _)| doc)
}
