//! Wiring from [`Config`] to ready-to-use orchestrators.
//!
//! Every CLI command that touches the pipeline builds one [`App`]: a
//! SQLite pool, the SQLite-backed store and usage meter, the configured
//! providers, and both orchestrators sharing them. Commands that only read
//! or delete stored rows open [`Stores`] instead, which never builds a
//! provider and so works without `OPENAI_API_KEY`.

use std::sync::Arc;

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use ragline_core::embedding::{DisabledProvider, EmbeddingClient, EmbeddingProvider};
use ragline_core::ingest::IngestionOrchestrator;
use ragline_core::llm::LanguageModel;
use ragline_core::chat::RetrievalOrchestrator;
use ragline_core::metering::UsageMeter;
use ragline_core::store::Store;

use crate::config::{Config, EmbeddingConfig, LlmConfig};
use crate::db;
use crate::openai::{DisabledModel, OpenAIChatModel, OpenAIEmbeddingProvider};
use crate::sqlite_meter::SqliteUsageMeter;
use crate::sqlite_store::SqliteStore;

/// Create an embedding provider from configuration.
///
/// | `provider` | Result |
/// |------------|--------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIEmbeddingProvider`] (needs `OPENAI_API_KEY`) |
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIEmbeddingProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Create the mini-tier model and, when configured, the premium one.
pub fn create_language_models(
    config: &LlmConfig,
) -> Result<(Arc<dyn LanguageModel>, Option<Arc<dyn LanguageModel>>)> {
    match config.provider.as_str() {
        "disabled" => Ok((Arc::new(DisabledModel), None)),
        "openai" => {
            let mini: Arc<dyn LanguageModel> =
                Arc::new(OpenAIChatModel::new(config, &config.mini_model)?);
            let premium = match &config.premium_model {
                Some(name) => {
                    Some(Arc::new(OpenAIChatModel::new(config, name)?) as Arc<dyn LanguageModel>)
                }
                None => None,
            };
            Ok((mini, premium))
        }
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Database-only handle: the pool with the store and usage meter on it.
pub struct Stores {
    pub pool: SqlitePool,
    pub store: Arc<dyn Store>,
    pub meter: Arc<dyn UsageMeter>,
}

impl Stores {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            store: Arc::new(SqliteStore::new(pool.clone())),
            meter: Arc::new(SqliteUsageMeter::new(pool.clone())),
            pool,
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

pub struct App {
    pub pool: SqlitePool,
    pub store: Arc<dyn Store>,
    pub meter: Arc<dyn UsageMeter>,
    pub ingestion: IngestionOrchestrator,
    pub retrieval: RetrievalOrchestrator,
}

impl App {
    /// Connect to the configured database and build the pipeline.
    ///
    /// The schema must already exist (`ragline init`).
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let embedding = create_embedding_provider(&config.embedding)?;
        let (mini, premium) = create_language_models(&config.llm)?;
        Ok(Self::from_parts(config, pool, embedding, mini, premium))
    }

    /// Assemble the pipeline around an existing pool and providers.
    pub fn from_parts(
        config: &Config,
        pool: SqlitePool,
        embedding: Arc<dyn EmbeddingProvider>,
        mini_model: Arc<dyn LanguageModel>,
        premium_model: Option<Arc<dyn LanguageModel>>,
    ) -> Self {
        let settings = config.pipeline_settings();
        let Stores { pool, store, meter } = Stores::from_pool(pool);

        let ingestion = IngestionOrchestrator::new(
            store.clone(),
            EmbeddingClient::new(embedding.clone()),
            meter.clone(),
            settings.clone(),
        );
        let mut retrieval = RetrievalOrchestrator::new(
            store.clone(),
            EmbeddingClient::new(embedding).with_batch_size(settings.embedding_batch_size),
            mini_model,
            meter.clone(),
            settings,
        );
        if let Some(premium) = premium_model {
            retrieval = retrieval.with_premium_model(premium);
        }

        Self {
            pool,
            store,
            meter,
            ingestion,
            retrieval,
        }
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
