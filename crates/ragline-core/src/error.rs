//! Error types for the ragline pipeline.
//!
//! Component failures are classified into four families so the calling
//! layer (job queue, chat handler) can decide whether to retry:
//!
//! | Variant | Cause | Retry? |
//! |---------|-------|--------|
//! | [`RagError::Input`] | blank or oversized input, wrong document state | no |
//! | [`RagError::Provider`] | embedding / LLM outage, rate limit, bad response | usually |
//! | [`RagError::Consistency`] | vector count or dimension mismatch | no |
//! | [`RagError::Storage`] | storage collaborator failure | yes |

use std::time::Duration;

use thiserror::Error;

use crate::models::DocumentStatus;

/// Caller-side mistakes. Surfaced directly, never retried.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("no chunks generated")]
    NoChunks,

    #[error("input is {len} characters, maximum is {max}")]
    TooLong { len: usize, max: usize },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("document {id} is {status}, expected {expected}")]
    InvalidDocumentState {
        id: String,
        status: DocumentStatus,
        expected: DocumentStatus,
    },
}

/// Failures reported by an embedding or language-model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("{provider} request timed out")]
    Timeout { provider: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} connection error: {message}")]
    Network { provider: String, message: String },

    #[error("{provider} returned a malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("provider is disabled: {0}")]
    Disabled(String),
}

impl ProviderError {
    /// Whether repeating the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout { .. }
            | ProviderError::Network { .. } => true,
            ProviderError::Http { status, .. } => *status >= 500,
            ProviderError::MalformedResponse { .. } | ProviderError::Disabled(_) => false,
        }
    }
}

/// Broken invariants between the pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("embedding count mismatch: expected {expected}, got {actual}")]
    EmbeddingCountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Top-level error returned by the orchestrators and pipeline components.
#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Consistency(#[from] ConsistencyError),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    #[error("usage limit reached: {0}")]
    UsageLimitExceeded(String),
}

impl RagError {
    /// Whether the calling layer should schedule a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Provider(e) => e.is_transient(),
            RagError::Storage(_) => true,
            RagError::Input(_) | RagError::Consistency(_) | RagError::UsageLimitExceeded(_) => {
                false
            }
        }
    }
}

impl From<anyhow::Error> for RagError {
    fn from(e: anyhow::Error) -> Self {
        RagError::Storage(e)
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
