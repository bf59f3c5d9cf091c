//! Embedder trait and vector utilities.
//!
//! Concrete providers (hash, OpenAI, Ollama) live in the `ragsync` app
//! crate. The build engine only sees [`Embedder`].

use anyhow::Result;
use async_trait::async_trait;

/// Text embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`). Part of the
    /// schema fingerprint.
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Whether returned vectors are already unit length. When false the
    /// store mutator L2-normalizes before upsert.
    fn normalizes(&self) -> bool {
        false
    }

    /// Embed a batch of texts, one vector per input, in input order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Scale `v` to unit L2 norm in place. Zero vectors are left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}
