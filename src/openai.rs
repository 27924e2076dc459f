//! OpenAI embedding and chat-completion providers.
//!
//! Both providers share one request loop with retry/backoff:
//! - HTTP 429 or 5xx → retry with exponential backoff (1s, 2s, 4s, … capped at 32s)
//! - other HTTP 4xx → fail immediately
//! - network error or timeout → retry
//!
//! Responses are decoded into typed structs; anything that does not match
//! is a [`ProviderError::MalformedResponse`].

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ragline_core::embedding::EmbeddingProvider;
use ragline_core::error::ProviderError;
use ragline_core::llm::LanguageModel;

use crate::config::{EmbeddingConfig, LlmConfig};

const PROVIDER: &str = "openai";

fn api_key() -> Result<String> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("OPENAI_API_KEY environment variable not set"),
    }
}

/// Shared HTTP plumbing for OpenAI endpoints.
#[derive(Clone)]
struct OpenAIClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAIClient {
    fn new(api_key: String, base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries,
        })
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = retry_delay(attempt, last_err.as_ref());
                debug!(attempt, delay_secs = delay.as_secs(), url = %url, "retrying OpenAI request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            let response = match resp {
                Ok(response) => response,
                Err(e) => {
                    let err = classify_transport_error(&e);
                    warn!(attempt, error = %err, "OpenAI request failed");
                    last_err = Some(err);
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let text = response.text().await.map_err(|e| classify_transport_error(&e))?;
                return decode_json(&text);
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body_text = response.text().await.unwrap_or_default();
            let err = classify_status(status, body_text, retry_after);

            if err.is_transient() {
                warn!(attempt, error = %err, "OpenAI request failed");
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Network {
            provider: PROVIDER.to_string(),
            message: "request failed after retries".to_string(),
        }))
    }
}

const MAX_BACKOFF: Duration = Duration::from_secs(32);

/// 1s, 2s, 4s, … capped at 32s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Wait before `attempt`: the server's `Retry-After` when the previous
/// attempt was rate limited with one, else the exponential schedule.
/// Never longer than [`MAX_BACKOFF`].
fn retry_delay(attempt: u32, previous: Option<&ProviderError>) -> Duration {
    match previous {
        Some(ProviderError::RateLimited {
            retry_after: Some(wait),
            ..
        }) => (*wait).min(MAX_BACKOFF),
        _ => backoff_delay(attempt),
    }
}

fn classify_status(status: StatusCode, body: String, retry_after: Option<Duration>) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return ProviderError::RateLimited {
            provider: PROVIDER.to_string(),
            retry_after,
        };
    }
    ProviderError::Http {
        provider: PROVIDER.to_string(),
        status: status.as_u16(),
        body,
    }
}

fn classify_transport_error(e: &reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout {
            provider: PROVIDER.to_string(),
        }
    } else {
        ProviderError::Network {
            provider: PROVIDER.to_string(),
            message: e.to_string(),
        }
    }
}

fn decode_json<R: DeserializeOwned>(text: &str) -> Result<R, ProviderError> {
    serde_json::from_str(text).map_err(|e| ProviderError::MalformedResponse {
        provider: PROVIDER.to_string(),
        message: e.to_string(),
    })
}

// ============ Embeddings ============

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Models that accept a `dimensions` parameter and shorten their output.
pub fn supports_dimensions(model: &str) -> bool {
    model.starts_with("text-embedding-3")
}

/// Native output size of the known OpenAI embedding models.
pub fn native_dims(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Order vectors by their `index` field and check every slot is filled.
fn vectors_in_input_order(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for item in response.data {
        let slot = slots
            .get_mut(item.index)
            .ok_or_else(|| ProviderError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: format!("embedding index {} out of range", item.index),
            })?;
        if slot.is_some() {
            return Err(ProviderError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: format!("duplicate embedding index {}", item.index),
            });
        }
        *slot = Some(item.embedding);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| ProviderError::MalformedResponse {
                provider: PROVIDER.to_string(),
                message: format!("missing embedding for input {}", i),
            })
        })
        .collect()
}

/// Embedding provider for `POST /v1/embeddings`.
///
/// Overrides [`EmbeddingProvider::embed_batch`] so each sub-batch is a
/// single request.
pub struct OpenAIEmbeddingProvider {
    client: OpenAIClient,
    model: String,
    dims: usize,
}

impl OpenAIEmbeddingProvider {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = OpenAIClient::new(
            api_key()?,
            &config.base_url,
            config.timeout_secs,
            config.max_retries,
        )?;
        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: supports_dimensions(&self.model).then_some(self.dims),
        };
        let response: EmbeddingResponse = self.client.post_json("embeddings", &request).await?;
        vectors_in_input_order(response, texts.len())
    }
}

// ============ Chat completions ============

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    temperature: f32,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn first_answer(response: ChatCompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ProviderError::MalformedResponse {
            provider: PROVIDER.to_string(),
            message: "completion has no content".to_string(),
        })
}

/// Chat model for `POST /v1/chat/completions`.
pub struct OpenAIChatModel {
    client: OpenAIClient,
    model: String,
    temperature: f32,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig, model: &str) -> Result<Self> {
        let client = OpenAIClient::new(
            api_key()?,
            &config.base_url,
            config.timeout_secs,
            config.max_retries,
        )?;
        Ok(Self {
            client,
            model: model.to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, ProviderError> {
        let body = ChatRequestBody {
            model: &self.model,
            temperature: self.temperature,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };
        let response: ChatCompletionResponse =
            self.client.post_json("chat/completions", &body).await?;
        first_answer(response)
    }
}

/// Placeholder model when no language model is configured.
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled("language model is disabled".into()))
    }
}
