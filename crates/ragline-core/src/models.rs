//! Core data models shared by the pipeline and its storage backends.
//!
//! These types represent the documents, chunks, embeddings, and retrieval
//! results that flow through ingestion and chat.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Document`].
///
/// `Completed` and `Failed` are terminal for a single ingestion run; a
/// failed document only moves again when a caller re-submits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            other => anyhow::bail!("unknown document status: {}", other),
        }
    }
}

/// A source document owned by a project.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub content: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Deleted documents never surface in search.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Document {
    /// A fresh `pending` document with a random UUID.
    pub fn new(project_id: &str, title: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            title: title.to_string(),
            source_url: None,
            content: content.to_string(),
            status: DocumentStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }
}

/// A chunk produced by segmentation, before it has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub content: String,
    pub char_count: i64,
    pub token_count: i64,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
}

/// A persisted chunk.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub char_count: i64,
    pub token_count: i64,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// An embedding vector to persist for a chunk.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model: String,
}

/// One ranked hit from a similarity search. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    /// Cosine similarity, `1 - cosine distance`.
    pub score: f64,
    pub title: String,
    pub source_url: Option<String>,
    /// Creation time of the chunk; newer chunks win score ties.
    pub created_at: DateTime<Utc>,
}

/// Chunks chosen for a prompt under a token budget. Not persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RagContext {
    pub chunks: Vec<RetrievalResult>,
    pub total_tokens: usize,
    pub formatted: String,
}

impl RagContext {
    /// Distinct document ids in first-seen order.
    pub fn source_document_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for c in &self.chunks {
            if !ids.contains(&c.document_id) {
                ids.push(c.document_id.clone());
            }
        }
        ids
    }
}

/// Who sent a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A chat message to append to a conversation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_estimate: i64,
    pub source_document_ids: Vec<String>,
}
