//! # ragline core
//!
//! Runtime-agnostic logic for the ragline RAG pipeline: data models,
//! sentence/fixed-width chunking, input sanitization, embedding batching,
//! project-scoped similarity search, token-budgeted context assembly, and
//! the ingestion and chat orchestrators that tie them together.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Storage,
//! embedding, language-model, and usage-metering backends are reached
//! through the traits in [`store`], [`embedding`], [`llm`], and
//! [`metering`]; the `ragline` app crate provides SQLite and OpenAI
//! implementations, and [`store::memory`] / [`metering::InMemoryUsageMeter`]
//! cover tests and database-less setups.
//!
//! ```text
//!   document text ──▶ sanitize ──▶ chunk ──▶ embed_batch ──▶ Store
//!                                                              │
//!   chat query ──▶ sanitize ──▶ embed ──▶ VectorIndex::search ◀┘
//!                                              │
//!                                  build_rag_context ──▶ LanguageModel
//! ```

pub mod chat;
pub mod chunk;
pub mod clock;
pub mod context;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod metering;
pub mod models;
pub mod rate_limit;
pub mod sanitize;
pub mod search;
pub mod settings;
pub mod store;

pub use error::{ConsistencyError, InputError, ProviderError, RagError};
