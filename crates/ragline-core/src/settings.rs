//! Pipeline tuning parameters, decoupled from application config.
//!
//! The app crate reads TOML and environment overrides and hands the
//! result to the orchestrators as a [`PipelineSettings`].

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MAX_CONTEXT_TOKENS: usize = 2000;
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 10;
pub const DEFAULT_SANITIZER_MAX_LENGTH: usize = 5000;
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_MAX_DOCUMENT_CHARS: usize = 2_000_000;

/// How ingestion segments document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkingMode {
    /// Sentence-greedy chunks; sentences are never split.
    #[default]
    Sentence,
    /// Fixed-width sliding windows with overlap.
    Fixed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunking_mode: ChunkingMode,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Window overlap in characters (fixed mode only).
    pub chunk_overlap: usize,
    pub similarity_threshold: f64,
    pub top_k: usize,
    pub max_context_tokens: usize,
    pub embedding_batch_size: usize,
    pub sanitizer_max_length: usize,
    /// Documents longer than this are rejected at submission.
    pub max_document_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunking_mode: ChunkingMode::Sentence,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            max_context_tokens: DEFAULT_MAX_CONTEXT_TOKENS,
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            sanitizer_max_length: DEFAULT_SANITIZER_MAX_LENGTH,
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }
}
