//! In-memory [`Store`] implementation for tests and database-less setups.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Similarity search is brute-force cosine over all vectors of the project.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::ConsistencyError;
use crate::models::{
    Chunk, Document, DocumentStatus, NewChunk, NewEmbedding, NewMessage, RetrievalResult,
};
use crate::search::rank_results;

use super::{Store, StoredMessage};

struct StoredVector {
    vector: Vec<f32>,
    _model: String,
}

struct StoredConversation {
    project_id: String,
    _created_at: DateTime<Utc>,
}

/// In-memory store.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    vectors: RwLock<HashMap<String, StoredVector>>,
    conversations: RwLock<HashMap<String, StoredConversation>>,
    messages: RwLock<Vec<StoredMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            vectors: RwLock::new(HashMap::new()),
            conversations: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Number of chunks currently stored for a document.
    pub fn chunk_count(&self, document_id: &str) -> usize {
        self.chunks
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .count()
    }

    /// Number of embeddings currently stored for a document.
    pub fn embedding_count(&self, document_id: &str) -> usize {
        let chunks = self.chunks.read().unwrap();
        let vectors = self.vectors.read().unwrap();
        chunks
            .iter()
            .filter(|c| c.document_id == document_id && vectors.contains_key(&c.id))
            .count()
    }

    /// Number of conversations opened so far, across projects.
    pub fn conversation_count(&self) -> usize {
        self.conversations.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        if docs.contains_key(&doc.id) {
            anyhow::bail!("document already exists: {}", doc.id);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().unwrap().get(id).cloned())
    }

    async fn list_documents(
        &self,
        project_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| d.project_id == project_id && d.deleted_at.is_none())
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().unwrap();
        match docs.get_mut(id) {
            Some(d) => {
                let now = Utc::now();
                d.deleted_at = Some(now);
                d.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut docs = self.docs.write().unwrap();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.status = status;
        doc.error_message = error_message.map(str::to_string);
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn list_stale_documents(
        &self,
        project_id: &str,
        status: DocumentStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let docs = self.docs.read().unwrap();
        Ok(docs
            .values()
            .filter(|d| {
                d.project_id == project_id
                    && d.deleted_at.is_none()
                    && d.status == status
                    && d.updated_at < updated_before
            })
            .cloned()
            .collect())
    }

    async fn create_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<Chunk>> {
        if !self.docs.read().unwrap().contains_key(document_id) {
            anyhow::bail!("document not found: {}", document_id);
        }

        let now = Utc::now();
        let created: Vec<Chunk> = chunks
            .iter()
            .map(|c| Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index: c.chunk_index,
                content: c.content.clone(),
                char_count: c.char_count,
                token_count: c.token_count,
                hash: c.hash.clone(),
                created_at: now,
            })
            .collect();

        let mut stored = self.chunks.write().unwrap();
        let mut vectors = self.vectors.write().unwrap();
        stored.retain(|c| {
            if c.document_id == document_id {
                vectors.remove(&c.id);
                false
            } else {
                true
            }
        });
        stored.extend(created.iter().cloned());
        Ok(created)
    }

    async fn create_embeddings(&self, embeddings: &[NewEmbedding]) -> Result<()> {
        let chunks = self.chunks.read().unwrap();
        let known: HashSet<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        if let Some(missing) = embeddings
            .iter()
            .find(|e| !known.contains(e.chunk_id.as_str()))
        {
            anyhow::bail!("chunk not found: {}", missing.chunk_id);
        }

        let mut vectors = self.vectors.write().unwrap();
        for e in embeddings {
            vectors.insert(
                e.chunk_id.clone(),
                StoredVector {
                    vector: e.vector.clone(),
                    _model: e.model.clone(),
                },
            );
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        project_id: &str,
        query_vec: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<RetrievalResult>> {
        let docs = self.docs.read().unwrap();
        let chunks = self.chunks.read().unwrap();
        let vectors = self.vectors.read().unwrap();

        let mut results = Vec::new();
        for c in chunks.iter() {
            let doc = match docs.get(&c.document_id) {
                Some(d)
                    if d.project_id == project_id
                        && d.status == DocumentStatus::Completed
                        && d.deleted_at.is_none() =>
                {
                    d
                }
                _ => continue,
            };
            let sv = match vectors.get(&c.id) {
                Some(v) => v,
                None => continue,
            };
            if sv.vector.len() != query_vec.len() {
                return Err(ConsistencyError::DimensionMismatch {
                    expected: sv.vector.len(),
                    actual: query_vec.len(),
                }
                .into());
            }
            let score = cosine_similarity(query_vec, &sv.vector) as f64;
            if score < min_similarity {
                continue;
            }
            results.push(RetrievalResult {
                chunk_id: c.id.clone(),
                document_id: c.document_id.clone(),
                content: c.content.clone(),
                score,
                title: doc.title.clone(),
                source_url: doc.source_url.clone(),
                created_at: c.created_at,
            });
        }

        rank_results(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn resolve_conversation(
        &self,
        project_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<String> {
        let mut conversations = self.conversations.write().unwrap();
        if let Some(id) = conversation_id {
            if let Some(existing) = conversations.get(id) {
                if existing.project_id == project_id {
                    return Ok(id.to_string());
                }
            }
        }
        let id = Uuid::new_v4().to_string();
        conversations.insert(
            id.clone(),
            StoredConversation {
                project_id: project_id.to_string(),
                _created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn record_message(&self, message: &NewMessage) -> Result<String> {
        if !self
            .conversations
            .read()
            .unwrap()
            .contains_key(&message.conversation_id)
        {
            anyhow::bail!("conversation not found: {}", message.conversation_id);
        }
        let id = Uuid::new_v4().to_string();
        self.messages.write().unwrap().push(StoredMessage {
            id: id.clone(),
            conversation_id: message.conversation_id.clone(),
            role: message.role,
            content: message.content.clone(),
            token_estimate: message.token_estimate,
            source_document_ids: message.source_document_ids.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .read()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::segment;
    use crate::settings::ChunkingMode;

    async fn completed_doc(store: &InMemoryStore, project: &str, text: &str) -> Vec<Chunk> {
        let doc = Document::new(project, "Doc", text);
        store.insert_document(&doc).await.unwrap();
        let chunks = store
            .create_chunks(&doc.id, &segment(text, ChunkingMode::Sentence, 1000, 0))
            .await
            .unwrap();
        store
            .update_document_status(&doc.id, DocumentStatus::Completed, None)
            .await
            .unwrap();
        chunks
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let store = InMemoryStore::new();
        let hits = store
            .similarity_search("p1", &[1.0, 0.0], 5, 0.0)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_search_is_project_scoped() {
        let store = InMemoryStore::new();
        let a = completed_doc(&store, "p1", "Alpha.").await;
        let b = completed_doc(&store, "p2", "Beta.").await;
        store
            .create_embeddings(&[
                NewEmbedding {
                    chunk_id: a[0].id.clone(),
                    vector: vec![1.0, 0.0],
                    model: "m".into(),
                },
                NewEmbedding {
                    chunk_id: b[0].id.clone(),
                    vector: vec![1.0, 0.0],
                    model: "m".into(),
                },
            ])
            .await
            .unwrap();

        let hits = store
            .similarity_search("p1", &[1.0, 0.0], 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, a[0].id);
    }

    #[tokio::test]
    async fn test_replace_chunks_drops_old_embeddings() {
        let store = InMemoryStore::new();
        let doc = Document::new("p1", "Doc", "One. Two.");
        store.insert_document(&doc).await.unwrap();
        let first = store
            .create_chunks(&doc.id, &segment("One. Two.", ChunkingMode::Sentence, 4, 0))
            .await
            .unwrap();
        store
            .create_embeddings(&[NewEmbedding {
                chunk_id: first[0].id.clone(),
                vector: vec![1.0],
                model: "m".into(),
            }])
            .await
            .unwrap();
        assert_eq!(store.embedding_count(&doc.id), 1);

        store
            .create_chunks(&doc.id, &segment("Three.", ChunkingMode::Sentence, 100, 0))
            .await
            .unwrap();
        assert_eq!(store.chunk_count(&doc.id), 1);
        assert_eq!(store.embedding_count(&doc.id), 0);
    }

    #[tokio::test]
    async fn test_unknown_chunk_rejects_whole_batch() {
        let store = InMemoryStore::new();
        let text = "First sentence here. Second sentence there. Third one too.";
        let doc = Document::new("p1", "Doc", text);
        store.insert_document(&doc).await.unwrap();
        let chunks = store
            .create_chunks(&doc.id, &segment(text, ChunkingMode::Fixed, 20, 0))
            .await
            .unwrap();
        assert!(chunks.len() >= 2);

        let mut batch: Vec<NewEmbedding> = chunks
            .iter()
            .map(|c| NewEmbedding {
                chunk_id: c.id.clone(),
                vector: vec![1.0, 0.0],
                model: "m".into(),
            })
            .collect();
        batch.insert(
            1,
            NewEmbedding {
                chunk_id: "ghost".into(),
                vector: vec![0.0, 1.0],
                model: "m".into(),
            },
        );

        let err = store.create_embeddings(&batch).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert_eq!(store.embedding_count(&doc.id), 0);

        batch.remove(1);
        store.create_embeddings(&batch).await.unwrap();
        assert_eq!(store.embedding_count(&doc.id), chunks.len());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_surfaces_as_consistency_error() {
        let store = InMemoryStore::new();
        let a = completed_doc(&store, "p1", "Alpha.").await;
        store
            .create_embeddings(&[NewEmbedding {
                chunk_id: a[0].id.clone(),
                vector: vec![1.0, 0.0, 0.0],
                model: "m".into(),
            }])
            .await
            .unwrap();
        let err = store
            .similarity_search("p1", &[1.0, 0.0], 5, 0.0)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ConsistencyError>().is_some());
    }

    #[tokio::test]
    async fn test_conversation_reused_only_within_project() {
        let store = InMemoryStore::new();
        let c1 = store.resolve_conversation("p1", None).await.unwrap();
        assert_eq!(store.resolve_conversation("p1", Some(&c1)).await.unwrap(), c1);
        assert_ne!(store.resolve_conversation("p2", Some(&c1)).await.unwrap(), c1);
        assert_ne!(store.resolve_conversation("p1", Some("missing")).await.unwrap(), "missing");
    }
}
