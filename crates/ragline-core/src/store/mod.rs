//! Storage abstraction for the RAG pipeline.
//!
//! The [`Store`] trait is the persistence collaborator the orchestrators
//! depend on. There is no "unconfigured" mode: a deployment without a
//! database constructs [`memory::InMemoryStore`] instead.
//!
//! Every read and write is scoped by a project id or a document id;
//! there is deliberately no method that searches across projects.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Chunk, Document, DocumentStatus, MessageRole, NewChunk, NewEmbedding, NewMessage,
    RetrievalResult,
};

/// A stored chat message.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_estimate: i64,
    pub source_document_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Persist a new document |
/// | [`get_document`](Store::get_document) | Fetch a document by id |
/// | [`list_documents`](Store::list_documents) | Documents of a project, optionally by status |
/// | [`delete_document`](Store::delete_document) | Soft-delete a document |
/// | [`update_document_status`](Store::update_document_status) | Durable status transition |
/// | [`list_stale_documents`](Store::list_stale_documents) | Documents stuck in a status |
/// | [`create_chunks`](Store::create_chunks) | Replace a document's chunk set |
/// | [`create_embeddings`](Store::create_embeddings) | Store one vector per chunk |
/// | [`similarity_search`](Store::similarity_search) | Project-scoped cosine search |
/// | [`resolve_conversation`](Store::resolve_conversation) | Reuse or open a conversation |
/// | [`record_message`](Store::record_message) | Append a chat message |
/// | [`list_messages`](Store::list_messages) | Messages of a conversation |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn list_documents(
        &self,
        project_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>>;

    /// Mark a document deleted. Returns `false` if it did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    /// Set status and error message, bumping `updated_at`. The write is
    /// visible to readers as soon as this returns.
    async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Documents of `project_id` in `status` whose `updated_at` is older
    /// than `updated_before`.
    async fn list_stale_documents(
        &self,
        project_id: &str,
        status: DocumentStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Document>>;

    /// Replace all chunks (and their embeddings) of a document.
    ///
    /// Old chunks and old embeddings are removed together; the new chunks
    /// are returned with their assigned ids, in index order.
    async fn create_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<Chunk>>;

    async fn create_embeddings(&self, embeddings: &[NewEmbedding]) -> Result<()>;

    /// Cosine search over chunks of completed, non-deleted documents in
    /// `project_id`.
    ///
    /// Returns at most `top_k` rows with `score >= min_similarity`, ordered
    /// as [`rank_results`](crate::search::rank_results) orders them. A
    /// stored vector whose length differs from `query_vec` is reported as
    /// a [`ConsistencyError`](crate::error::ConsistencyError) wrapped in
    /// the returned error.
    async fn similarity_search(
        &self,
        project_id: &str,
        query_vec: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<RetrievalResult>>;

    /// Return `conversation_id` when it exists in `project_id`, otherwise
    /// open a new conversation in the project and return its id.
    async fn resolve_conversation(
        &self,
        project_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<String>;

    async fn record_message(&self, message: &NewMessage) -> Result<String>;

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>>;
}
