//! Embedding provider trait, batched embedding client, and vector helpers.
//!
//! [`EmbeddingProvider`] is the boundary to an external embedding API.
//! [`EmbeddingClient`] wraps a provider with the pipeline's batching
//! discipline:
//!
//! - inputs are split into sub-batches of `batch_size` (default 10);
//! - sub-batches run one after another, which caps peak concurrency
//!   against the provider;
//! - items inside a sub-batch are requested concurrently (or as a single
//!   request when the provider overrides [`EmbeddingProvider::embed_batch`]);
//! - output vector `i` always belongs to input text `i`;
//! - the first failing sub-batch aborts the whole call.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

use crate::chunk::batch_chunks_for_embedding;
use crate::error::{ConsistencyError, InputError, ProviderError, RagError};
use crate::settings::DEFAULT_EMBEDDING_BATCH_SIZE;

/// Trait for embedding providers.
///
/// Implementations must report a dimensionality consistent with the
/// vectors they return; the client checks every vector against
/// [`dims`](EmbeddingProvider::dims).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed several texts, preserving order.
    ///
    /// The default issues one concurrent [`embed`](EmbeddingProvider::embed)
    /// call per text. Providers with a native batch endpoint override this.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        try_join_all(texts.iter().map(|t| self.embed(t))).await
    }
}

/// Batching, order-preserving front end to an [`EmbeddingProvider`].
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }

    /// Override the sub-batch size. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed a single text. Blank text is rejected before any provider call.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if text.trim().is_empty() {
            return Err(InputError::EmptyInput.into());
        }
        let vector = self.provider.embed(text).await?;
        self.check_dims(&vector)?;
        Ok(vector)
    }

    /// Embed many texts in sequential sub-batches.
    ///
    /// Returns exactly one vector per input, in input order, or the first
    /// error encountered. No partial results are returned.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for (i, batch) in batch_chunks_for_embedding(texts, self.batch_size)
            .into_iter()
            .enumerate()
        {
            debug!(batch = i, size = batch.len(), "embedding sub-batch");
            let out = self.provider.embed_batch(batch).await?;
            if out.len() != batch.len() {
                return Err(ConsistencyError::EmbeddingCountMismatch {
                    expected: batch.len(),
                    actual: out.len(),
                }
                .into());
            }
            for v in &out {
                self.check_dims(v)?;
            }
            vectors.extend(out);
        }

        Ok(vectors)
    }

    fn check_dims(&self, vector: &[f32]) -> Result<(), ConsistencyError> {
        let expected = self.provider.dims();
        if vector.len() != expected {
            return Err(ConsistencyError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// Placeholder provider for deployments without embeddings.
///
/// Every call fails with [`ProviderError::Disabled`].
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Disabled("embedding provider is disabled".into()))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use ragline_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`, i.e. `1 - cosine distance`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
