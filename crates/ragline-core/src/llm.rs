//! Language-model boundary used for final answer generation.

use async_trait::async_trait;

use crate::error::ProviderError;

/// A chat-completion backend treated as a black box.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier reported in usage records and logs.
    fn model_name(&self) -> &str;

    /// Produce an answer for `user_prompt` under `system_prompt`.
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ProviderError>;
}
