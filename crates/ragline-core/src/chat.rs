//! Retrieval orchestrator: one grounded chat turn.
//!
//! Order of work for a turn:
//!
//! 1. reject a blank query; check the message allowance for the tier
//! 2. sanitize the query
//! 3. embed it (provider failures propagate as [`RagError::Provider`])
//! 4. search the project (storage failures degrade to no results)
//! 5. assemble context under the token budget
//! 6. ask the language model with [`SYSTEM_PROMPT`]
//! 7. resolve or open the conversation, then record the user message and
//!    the assistant message with its sources and token estimate
//! 8. record usage; a metering failure is logged, never surfaced
//!
//! Nothing is written until an answer exists. A failed turn leaves no
//! conversation, no messages and no usage behind.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{build_rag_context, estimate_tokens};
use crate::embedding::EmbeddingClient;
use crate::error::{InputError, RagError, Result};
use crate::llm::LanguageModel;
use crate::metering::{ModelTier, PlanType, UsageMeter, UsageRecord, UsageScope};
use crate::models::{MessageRole, NewMessage, RagContext, RetrievalResult};
use crate::sanitize::Sanitizer;
use crate::search::VectorIndex;
use crate::settings::PipelineSettings;
use crate::store::Store;

/// Fixed instruction given to the language model on every turn.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for this project's knowledge base. \
Answer the user's question using only the information in the provided context. \
If the context does not contain enough information to answer, say that you don't know \
based on the available sources instead of guessing. \
Cite the sources you used by their labels, for example [Source 1].";

const NO_CONTEXT: &str = "(no relevant context found)";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub project_id: String,
    pub user_id: String,
    pub plan: PlanType,
    pub tier: ModelTier,
    /// Continue this conversation when it belongs to the project.
    pub conversation_id: Option<String>,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
    pub source_document_ids: Vec<String>,
    pub context_tokens: usize,
    /// Prompt plus answer, estimated.
    pub tokens_used: usize,
}

pub struct RetrievalOrchestrator {
    store: Arc<dyn Store>,
    index: VectorIndex,
    embeddings: EmbeddingClient,
    mini_model: Arc<dyn LanguageModel>,
    premium_model: Option<Arc<dyn LanguageModel>>,
    meter: Arc<dyn UsageMeter>,
    settings: PipelineSettings,
    sanitizer: Sanitizer,
}

impl RetrievalOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: EmbeddingClient,
        model: Arc<dyn LanguageModel>,
        meter: Arc<dyn UsageMeter>,
        settings: PipelineSettings,
    ) -> Self {
        let index = VectorIndex::new(store.clone(), embeddings.dims());
        let sanitizer = Sanitizer::new(settings.sanitizer_max_length);
        Self {
            store,
            index,
            embeddings,
            mini_model: model,
            premium_model: None,
            meter,
            settings,
            sanitizer,
        }
    }

    /// Use a separate model for [`ModelTier::Premium`] turns.
    pub fn with_premium_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.premium_model = Some(model);
        self
    }

    fn model_for(&self, tier: ModelTier) -> &Arc<dyn LanguageModel> {
        match (tier, &self.premium_model) {
            (ModelTier::Premium, Some(premium)) => premium,
            _ => &self.mini_model,
        }
    }

    /// Ranked, thresholded search for an already sanitized query.
    pub async fn retrieve(&self, project_id: &str, query: &str) -> Result<Vec<RetrievalResult>> {
        self.index
            .search_text(
                &self.embeddings,
                project_id,
                query,
                self.settings.top_k,
                self.settings.similarity_threshold,
            )
            .await
    }

    /// Retrieve and assemble the prompt context for a sanitized query.
    pub async fn build_context(&self, project_id: &str, query: &str) -> Result<RagContext> {
        let results = self.retrieve(project_id, query).await?;
        Ok(build_rag_context(&results, self.settings.max_context_tokens))
    }

    pub async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        if req.query.trim().is_empty() {
            return Err(InputError::EmptyInput.into());
        }

        let scope = UsageScope::new(&req.user_id, &req.project_id);
        let kind = req.tier.usage_kind();
        match self.meter.check_limits(&scope, req.plan, kind).await {
            Ok(decision) if !decision.allowed => {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| format!("{} limit reached", kind));
                return Err(RagError::UsageLimitExceeded(reason));
            }
            Ok(_) => {}
            Err(e) => warn!(project.id = %req.project_id, error = %e, "usage check failed, continuing"),
        }

        let query = self.sanitizer.sanitize(&req.query);
        let context = if query.is_empty() {
            debug!(project.id = %req.project_id, "query empty after sanitizing");
            RagContext::default()
        } else {
            self.build_context(&req.project_id, &query).await?
        };

        let user_prompt = render_user_prompt(&context, &query);
        let model = self.model_for(req.tier);
        let answer = model.complete(SYSTEM_PROMPT, &user_prompt).await?;

        let source_document_ids = context.source_document_ids();
        let prompt_tokens = estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&user_prompt);
        let answer_tokens = estimate_tokens(&answer);
        let tokens_used = prompt_tokens + answer_tokens;

        let conversation_id = self
            .store
            .resolve_conversation(&req.project_id, req.conversation_id.as_deref())
            .await?;
        self.store
            .record_message(&NewMessage {
                conversation_id: conversation_id.clone(),
                role: MessageRole::User,
                content: query.clone(),
                token_estimate: estimate_tokens(&query) as i64,
                source_document_ids: Vec::new(),
            })
            .await?;
        self.store
            .record_message(&NewMessage {
                conversation_id: conversation_id.clone(),
                role: MessageRole::Assistant,
                content: answer.clone(),
                token_estimate: tokens_used as i64,
                source_document_ids: source_document_ids.clone(),
            })
            .await?;

        info!(
            conversation.id = %conversation_id,
            project.id = %req.project_id,
            model = model.model_name(),
            sources = context.chunks.len(),
            tokens_used,
            "chat turn answered"
        );

        let record = UsageRecord {
            kind,
            amount: 1,
            tokens: tokens_used as u64,
        };
        if let Err(e) = self.meter.record_usage(&scope, &record).await {
            warn!(conversation.id = %conversation_id, error = %e, "failed to record chat usage");
        }

        Ok(ChatResponse {
            conversation_id,
            answer,
            context_tokens: context.total_tokens,
            sources: context.chunks,
            source_document_ids,
            tokens_used,
        })
    }
}

/// The user turn handed to the model: formatted sources, then the question.
pub fn render_user_prompt(context: &RagContext, query: &str) -> String {
    let sources = if context.formatted.is_empty() {
        NO_CONTEXT
    } else {
        context.formatted.as_str()
    };
    format!("Context:\n{}\n\nQuestion: {}", sources, query)
}
