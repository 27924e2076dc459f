//! Project-scoped vector similarity search.
//!
//! [`VectorIndex`] sits in front of a [`Store`] and applies the retrieval
//! failure policy: storage errors degrade to an empty result set (logged),
//! while a query vector of the wrong dimensionality is a
//! [`ConsistencyError`] and always surfaces.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::embedding::EmbeddingClient;
use crate::error::{ConsistencyError, RagError};
use crate::models::RetrievalResult;
use crate::store::Store;

/// Sort results into retrieval order.
///
/// Score descending; ties go to the most recently created chunk, then to
/// the lower chunk id so the order is fully deterministic.
pub fn rank_results(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}

/// Keep results with `score >= threshold`, preserving order.
pub fn filter_by_relevance(results: Vec<RetrievalResult>, threshold: f64) -> Vec<RetrievalResult> {
    results.into_iter().filter(|r| r.score >= threshold).collect()
}

/// Similarity search over one project's completed documents.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn Store>,
    dims: usize,
}

impl VectorIndex {
    /// `dims` is the dimensionality every query vector must have.
    pub fn new(store: Arc<dyn Store>, dims: usize) -> Self {
        Self { store, dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Ranked hits for `query_vec` inside `project_id`.
    ///
    /// Returns at most `top_k` results, all with `score >= min_similarity`.
    /// An empty index, or one with nothing above the threshold, yields an
    /// empty list. Storage failures are logged and also yield an empty list.
    pub async fn search(
        &self,
        project_id: &str,
        query_vec: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if query_vec.len() != self.dims {
            return Err(ConsistencyError::DimensionMismatch {
                expected: self.dims,
                actual: query_vec.len(),
            }
            .into());
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        match self
            .store
            .similarity_search(project_id, query_vec, top_k, min_similarity)
            .await
        {
            Ok(mut results) => {
                // Backends may return extra rows; the contract is enforced here.
                results = filter_by_relevance(results, min_similarity);
                rank_results(&mut results);
                results.truncate(top_k);
                debug!(project.id = %project_id, hits = results.len(), "similarity search");
                Ok(results)
            }
            Err(e) => match e.downcast::<ConsistencyError>() {
                Ok(consistency) => Err(consistency.into()),
                Err(e) => {
                    warn!(project.id = %project_id, error = %e, "similarity search failed, continuing without results");
                    Ok(Vec::new())
                }
            },
        }
    }

    /// Embed `query` and search with it.
    ///
    /// Blank queries return an empty list without calling the provider.
    /// Provider failures propagate as [`RagError::Provider`].
    pub async fn search_text(
        &self,
        embeddings: &EmbeddingClient,
        project_id: &str,
        query: &str,
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = embeddings.embed(query).await?;
        self.search(project_id, &vector, top_k, min_similarity).await
    }
}
