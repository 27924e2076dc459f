//! Document ingestion orchestrator.
//!
//! Drives one document through `pending -> processing -> {completed | failed}`:
//!
//! 1. The document must be `pending`; it moves to `processing` before any
//!    other work. The `indexed_page` allowance is then checked and a
//!    denial fails the document with the reason.
//! 2. Content is stripped of injection syntax and segmented; every chunk
//!    is length-capped. Zero chunks fails with "no chunks generated".
//! 3. The chunk set replaces any previous one, then exactly those chunks
//!    are embedded.
//! 4. A vector count different from the chunk count fails the run.
//! 5. One embedding per chunk is stored, tagged with the model id.
//! 6. The document is marked `completed` and one indexed page is recorded.
//!
//! Any error after the `processing` transition marks the document `failed`
//! with the error text.
//! Chunks left behind by a failed run are never searchable because search
//! only joins `completed` documents.
//!
//! Runs are single-flight per document: the caller must not dispatch the
//! same document id twice concurrently. A run whose future is dropped
//! after step 1 leaves the document `processing`; see
//! [`IngestionOrchestrator::requeue_stalled`].

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, info, warn};

use crate::chunk::{make_chunk, split_text};
use crate::clock::{Clock, SystemClock};
use crate::embedding::EmbeddingClient;
use crate::error::{ConsistencyError, InputError, RagError, Result};
use crate::metering::{PlanType, UsageKind, UsageMeter, UsageRecord, UsageScope};
use crate::models::{Document, DocumentStatus, NewChunk, NewEmbedding};
use crate::sanitize::{strip_injection_syntax, Sanitizer};
use crate::settings::PipelineSettings;
use crate::store::Store;

/// Which document to process and on whose allowance.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub document_id: String,
    pub scope: UsageScope,
    pub plan: PlanType,
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document_id: String,
    pub chunk_count: usize,
    pub total_tokens: i64,
    pub model: String,
}

pub struct IngestionOrchestrator {
    store: Arc<dyn Store>,
    embeddings: EmbeddingClient,
    meter: Arc<dyn UsageMeter>,
    settings: PipelineSettings,
    sanitizer: Sanitizer,
    clock: Arc<dyn Clock>,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: EmbeddingClient,
        meter: Arc<dyn UsageMeter>,
        settings: PipelineSettings,
    ) -> Self {
        let embeddings = embeddings.with_batch_size(settings.embedding_batch_size);
        let sanitizer = Sanitizer::new(settings.sanitizer_max_length);
        Self {
            store,
            embeddings,
            meter,
            settings,
            sanitizer,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist a new `pending` document.
    pub async fn submit(&self, doc: Document) -> Result<Document> {
        if doc.content.trim().is_empty() {
            return Err(InputError::EmptyInput.into());
        }
        let len = doc.content.chars().count();
        if len > self.settings.max_document_chars {
            return Err(InputError::TooLong {
                len,
                max: self.settings.max_document_chars,
            }
            .into());
        }
        let mut doc = doc;
        doc.status = DocumentStatus::Pending;
        doc.error_message = None;
        self.store.insert_document(&doc).await?;
        info!(document.id = %doc.id, project.id = %doc.project_id, "document submitted");
        Ok(doc)
    }

    /// Move a `completed` or `failed` document back to `pending` so it can
    /// be processed again. The next run replaces its chunks.
    pub async fn reprocess(&self, document_id: &str) -> Result<()> {
        let doc = self.load(document_id).await?;
        if !doc.status.is_terminal() {
            return Err(InputError::InvalidDocumentState {
                id: doc.id,
                status: doc.status,
                expected: DocumentStatus::Failed,
            }
            .into());
        }
        self.store
            .update_document_status(document_id, DocumentStatus::Pending, None)
            .await?;
        info!(document.id = %document_id, "document queued for reprocessing");
        Ok(())
    }

    /// Run the ingestion state machine for one `pending` document.
    pub async fn process_document(&self, req: &IngestRequest) -> Result<IngestOutcome> {
        let doc = self.load(&req.document_id).await?;
        if doc.status != DocumentStatus::Pending {
            return Err(InputError::InvalidDocumentState {
                id: doc.id,
                status: doc.status,
                expected: DocumentStatus::Pending,
            }
            .into());
        }

        self.store
            .update_document_status(&doc.id, DocumentStatus::Processing, None)
            .await?;
        info!(document.id = %doc.id, "processing document");

        match self
            .meter
            .check_limits(&req.scope, req.plan, UsageKind::IndexedPage)
            .await
        {
            Ok(decision) if !decision.allowed => {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "indexed page limit reached".to_string());
                warn!(document.id = %doc.id, reason = %reason, "ingestion blocked by usage limit");
                self.mark_failed(&doc.id, &reason).await;
                return Err(RagError::UsageLimitExceeded(reason));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(document.id = %doc.id, error = %e, "usage check failed, continuing");
            }
        }

        let outcome = match self.run(&doc).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(document.id = %doc.id, error = %e, "document processing failed");
                self.mark_failed(&doc.id, &e.to_string()).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .store
            .update_document_status(&doc.id, DocumentStatus::Completed, None)
            .await
        {
            error!(document.id = %doc.id, error = %e, "could not mark document completed");
            self.mark_failed(&doc.id, &e.to_string()).await;
            return Err(e.into());
        }

        info!(
            document.id = %doc.id,
            chunk_count = outcome.chunk_count,
            "document processing completed"
        );

        let record = UsageRecord {
            kind: UsageKind::IndexedPage,
            amount: 1,
            tokens: outcome.total_tokens.max(0) as u64,
        };
        if let Err(e) = self.meter.record_usage(&req.scope, &record).await {
            warn!(document.id = %doc.id, error = %e, "failed to record indexing usage");
        }

        Ok(outcome)
    }

    /// Move documents of `project_id` stuck in `processing` for longer than
    /// `older_than` back to `pending`. Returns the requeued ids.
    pub async fn requeue_stalled(&self, project_id: &str, older_than: Duration) -> Result<Vec<String>> {
        let cutoff = self.clock.now() - older_than;
        let stale = self
            .store
            .list_stale_documents(project_id, DocumentStatus::Processing, cutoff)
            .await?;

        let mut requeued = Vec::with_capacity(stale.len());
        for doc in stale {
            self.store
                .update_document_status(&doc.id, DocumentStatus::Pending, None)
                .await?;
            warn!(document.id = %doc.id, "requeued stalled document");
            requeued.push(doc.id);
        }
        Ok(requeued)
    }

    /// Sanitized, indexed chunks for `content`.
    pub fn prepare_chunks(&self, content: &str) -> Vec<NewChunk> {
        let cleaned = strip_injection_syntax(content);
        let s = &self.settings;
        split_text(&cleaned, s.chunking_mode, s.chunk_size, s.chunk_overlap)
            .iter()
            .map(|piece| self.sanitizer.sanitize(piece))
            .filter(|piece| !piece.is_empty())
            .enumerate()
            .map(|(i, piece)| make_chunk(i as i64, piece))
            .collect()
    }

    async fn run(&self, doc: &Document) -> Result<IngestOutcome> {
        let new_chunks = self.prepare_chunks(&doc.content);
        if new_chunks.is_empty() {
            return Err(InputError::NoChunks.into());
        }

        let chunks = self.store.create_chunks(&doc.id, &new_chunks).await?;
        if chunks.len() != new_chunks.len() {
            return Err(anyhow::anyhow!(
                "storage returned {} chunks for {} inserted",
                chunks.len(),
                new_chunks.len()
            )
            .into());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(ConsistencyError::EmbeddingCountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let model = self.embeddings.model_name().to_string();
        let records: Vec<NewEmbedding> = chunks
            .iter()
            .zip(vectors)
            .map(|(c, vector)| NewEmbedding {
                chunk_id: c.id.clone(),
                vector,
                model: model.clone(),
            })
            .collect();
        self.store.create_embeddings(&records).await?;

        Ok(IngestOutcome {
            document_id: doc.id.clone(),
            chunk_count: chunks.len(),
            total_tokens: chunks.iter().map(|c| c.token_count).sum(),
            model,
        })
    }

    async fn load(&self, document_id: &str) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .filter(|d| d.deleted_at.is_none())
            .ok_or_else(|| InputError::DocumentNotFound(document_id.to_string()).into())
    }

    async fn mark_failed(&self, document_id: &str, reason: &str) {
        if let Err(e) = self
            .store
            .update_document_status(document_id, DocumentStatus::Failed, Some(reason))
            .await
        {
            error!(document.id = %document_id, error = %e, "could not record document failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::embedding::EmbeddingProvider;
    use crate::error::ProviderError;
    use crate::metering::{month_key, InMemoryUsageMeter};
    use crate::search::VectorIndex;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps text to a 3-d vector; fails once `fail_after` calls were made.
    struct ScriptedProvider {
        calls: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl ScriptedProvider {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_after: None,
            }
        }

        fn failing_after(n: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_after: Some(n),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(ProviderError::Http {
                    provider: "scripted".into(),
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(vec![1.0, text.len() as f32 / 100.0, 0.0])
        }
    }

    /// Returns one vector fewer than asked for.
    struct DroppingProvider;

    #[async_trait]
    impl EmbeddingProvider for DroppingProvider {
        fn model_name(&self) -> &str {
            "dropping"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            Ok(vec![vec![1.0, 0.0, 0.0]; texts.len().saturating_sub(1)])
        }
    }

    struct Harness {
        store: Arc<InMemoryStore>,
        meter: Arc<InMemoryUsageMeter>,
        orchestrator: IngestionOrchestrator,
    }

    fn harness(provider: Arc<dyn EmbeddingProvider>, settings: PipelineSettings) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let meter = Arc::new(InMemoryUsageMeter::new());
        let orchestrator = IngestionOrchestrator::new(
            store.clone(),
            EmbeddingClient::new(provider),
            meter.clone(),
            settings,
        );
        Harness {
            store,
            meter,
            orchestrator,
        }
    }

    fn small_chunks() -> PipelineSettings {
        PipelineSettings {
            chunk_size: 20,
            embedding_batch_size: 2,
            ..Default::default()
        }
    }

    fn request(doc: &Document, plan: PlanType) -> IngestRequest {
        IngestRequest {
            document_id: doc.id.clone(),
            scope: UsageScope::new("u1", &doc.project_id),
            plan,
        }
    }

    const TEXT: &str = "Sentence one. Sentence two. Sentence three.";

    #[tokio::test]
    async fn test_happy_path_completes_and_meters() {
        let h = harness(Arc::new(ScriptedProvider::ok()), small_chunks());
        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();

        let outcome = h
            .orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap();
        assert_eq!(outcome.chunk_count, 3);
        assert_eq!(outcome.model, "scripted");

        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert_eq!(stored.error_message, None);
        assert_eq!(h.store.embedding_count(&doc.id), 3);

        let usage = h
            .meter
            .usage(&UsageScope::new("u1", "p1"), &month_key(Utc::now()))
            .await
            .unwrap();
        assert_eq!(usage.indexed_pages, 1);
    }

    #[tokio::test]
    async fn test_zero_chunks_fails_document() {
        let h = harness(Arc::new(ScriptedProvider::ok()), small_chunks());
        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Code only", "```let x = 1;```"))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Input(InputError::NoChunks)));

        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("no chunks generated"));
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_and_hides_chunks() {
        // Batch size 2: the first sub-batch succeeds, the second fails.
        let h = harness(Arc::new(ScriptedProvider::failing_after(2)), small_chunks());
        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Provider(_)));
        assert!(err.is_retryable());

        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(!stored.error_message.unwrap_or_default().is_empty());
        assert_eq!(h.store.chunk_count(&doc.id), 3);

        let index = VectorIndex::new(h.store.clone(), 3);
        let hits = index.search("p1", &[1.0, 0.1, 0.0], 10, -1.0).await.unwrap();
        assert!(hits.is_empty());

        let usage = h
            .meter
            .usage(&UsageScope::new("u1", "p1"), &month_key(Utc::now()))
            .await
            .unwrap();
        assert_eq!(usage.indexed_pages, 0);
    }

    #[tokio::test]
    async fn test_count_mismatch_fails_document() {
        let h = harness(Arc::new(DroppingProvider), small_chunks());
        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Consistency(ConsistencyError::EmbeddingCountMismatch { .. })
        ));
        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored
            .error_message
            .unwrap()
            .starts_with("embedding count mismatch"));
        assert_eq!(h.store.embedding_count(&doc.id), 0);
    }

    #[tokio::test]
    async fn test_only_pending_documents_run() {
        let h = harness(Arc::new(ScriptedProvider::ok()), small_chunks());
        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        h.orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap();

        let err = h
            .orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Input(InputError::InvalidDocumentState { .. })
        ));

        let err = h
            .orchestrator
            .process_document(&IngestRequest {
                document_id: "missing".into(),
                scope: UsageScope::new("u1", "p1"),
                plan: PlanType::Free,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Input(InputError::DocumentNotFound(_))));
    }

    #[tokio::test]
    async fn test_reprocess_replaces_chunks() {
        let h = harness(Arc::new(ScriptedProvider::ok()), small_chunks());
        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        h.orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap();

        h.orchestrator.reprocess(&doc.id).await.unwrap();
        h.orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap();
        assert_eq!(h.store.chunk_count(&doc.id), 3);
        assert_eq!(h.store.embedding_count(&doc.id), 3);
    }

    #[tokio::test]
    async fn test_usage_limit_blocks_ingestion() {
        let h = harness(Arc::new(ScriptedProvider::ok()), small_chunks());
        let scope = UsageScope::new("u1", "p1");
        h.meter
            .record_usage(
                &scope,
                &UsageRecord {
                    kind: UsageKind::IndexedPage,
                    amount: 50,
                    tokens: 0,
                },
            )
            .await
            .unwrap();

        let doc = h
            .orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        let err = h
            .orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UsageLimitExceeded(_)));

        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert_eq!(h.store.chunk_count(&doc.id), 0);
    }

    /// Delegates to an [`InMemoryStore`] and logs every status write.
    struct StatusLog {
        inner: InMemoryStore,
        transitions: std::sync::Mutex<Vec<DocumentStatus>>,
    }

    #[async_trait]
    impl Store for StatusLog {
        async fn insert_document(&self, doc: &Document) -> anyhow::Result<()> {
            self.inner.insert_document(doc).await
        }
        async fn get_document(&self, id: &str) -> anyhow::Result<Option<Document>> {
            self.inner.get_document(id).await
        }
        async fn list_documents(
            &self,
            project_id: &str,
            status: Option<DocumentStatus>,
        ) -> anyhow::Result<Vec<Document>> {
            self.inner.list_documents(project_id, status).await
        }
        async fn delete_document(&self, id: &str) -> anyhow::Result<bool> {
            self.inner.delete_document(id).await
        }
        async fn update_document_status(
            &self,
            id: &str,
            status: DocumentStatus,
            error_message: Option<&str>,
        ) -> anyhow::Result<()> {
            self.transitions.lock().unwrap().push(status);
            self.inner
                .update_document_status(id, status, error_message)
                .await
        }
        async fn list_stale_documents(
            &self,
            project_id: &str,
            status: DocumentStatus,
            updated_before: chrono::DateTime<Utc>,
        ) -> anyhow::Result<Vec<Document>> {
            self.inner
                .list_stale_documents(project_id, status, updated_before)
                .await
        }
        async fn create_chunks(
            &self,
            document_id: &str,
            chunks: &[NewChunk],
        ) -> anyhow::Result<Vec<crate::models::Chunk>> {
            self.inner.create_chunks(document_id, chunks).await
        }
        async fn create_embeddings(&self, embeddings: &[NewEmbedding]) -> anyhow::Result<()> {
            self.inner.create_embeddings(embeddings).await
        }
        async fn similarity_search(
            &self,
            project_id: &str,
            query_vec: &[f32],
            top_k: usize,
            min_similarity: f64,
        ) -> anyhow::Result<Vec<crate::models::RetrievalResult>> {
            self.inner
                .similarity_search(project_id, query_vec, top_k, min_similarity)
                .await
        }
        async fn resolve_conversation(
            &self,
            project_id: &str,
            conversation_id: Option<&str>,
        ) -> anyhow::Result<String> {
            self.inner
                .resolve_conversation(project_id, conversation_id)
                .await
        }
        async fn record_message(&self, message: &crate::models::NewMessage) -> anyhow::Result<String> {
            self.inner.record_message(message).await
        }
        async fn list_messages(
            &self,
            conversation_id: &str,
        ) -> anyhow::Result<Vec<crate::store::StoredMessage>> {
            self.inner.list_messages(conversation_id).await
        }
    }

    #[tokio::test]
    async fn test_denied_run_passes_through_processing() {
        let store = Arc::new(StatusLog {
            inner: InMemoryStore::new(),
            transitions: std::sync::Mutex::new(Vec::new()),
        });
        let meter = Arc::new(InMemoryUsageMeter::new());
        meter
            .record_usage(
                &UsageScope::new("u1", "p1"),
                &UsageRecord {
                    kind: UsageKind::IndexedPage,
                    amount: 50,
                    tokens: 0,
                },
            )
            .await
            .unwrap();
        let orchestrator = IngestionOrchestrator::new(
            store.clone(),
            EmbeddingClient::new(Arc::new(ScriptedProvider::ok())),
            meter,
            small_chunks(),
        );

        let doc = orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        let err = orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::UsageLimitExceeded(_)));
        assert_eq!(
            *store.transitions.lock().unwrap(),
            vec![DocumentStatus::Processing, DocumentStatus::Failed]
        );

        // A successful run goes through the same first step.
        store.transitions.lock().unwrap().clear();
        let doc = orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        orchestrator
            .process_document(&request(&doc, PlanType::Pro))
            .await
            .unwrap();
        assert_eq!(
            *store.transitions.lock().unwrap(),
            vec![DocumentStatus::Processing, DocumentStatus::Completed]
        );
    }

    /// Never answers.
    struct HangingProvider;

    #[async_trait]
    impl EmbeddingProvider for HangingProvider {
        fn model_name(&self) -> &str {
            "hanging"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_stays_processing_until_requeued() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let h = harness(Arc::new(HangingProvider), small_chunks());
        let orchestrator = IngestionOrchestrator::new(
            h.store.clone(),
            EmbeddingClient::new(Arc::new(HangingProvider)),
            h.meter.clone(),
            small_chunks(),
        )
        .with_clock(clock.clone());

        let doc = orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            orchestrator.process_document(&request(&doc, PlanType::Free)),
        )
        .await
        .is_err();
        assert!(timed_out);

        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Processing);
        assert_eq!(h.store.embedding_count(&doc.id), 0);
        let index = VectorIndex::new(h.store.clone(), 3);
        assert!(index
            .search("p1", &[1.0, 0.1, 0.0], 5, -1.0)
            .await
            .unwrap()
            .is_empty());
        let usage = h
            .meter
            .usage(&UsageScope::new("u1", "p1"), &month_key(Utc::now()))
            .await
            .unwrap();
        assert_eq!(usage.indexed_pages, 0);

        clock.advance(Duration::minutes(31));
        let requeued = orchestrator
            .requeue_stalled("p1", Duration::minutes(30))
            .await
            .unwrap();
        assert_eq!(requeued, vec![doc.id.clone()]);
        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn test_injection_syntax_never_indexed() {
        let h = harness(Arc::new(ScriptedProvider::ok()), PipelineSettings::default());
        let chunks = h
            .orchestrator
            .prepare_chunks("Intro. {{system}} Use ${SECRET} here. ```drop table```Done.");
        let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
        assert!(!joined.contains("{{"));
        assert!(!joined.contains("${"));
        assert!(!joined.contains("```"));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[tokio::test]
    async fn test_fixed_mode_caps_chunk_length() {
        let settings = PipelineSettings {
            chunking_mode: crate::settings::ChunkingMode::Fixed,
            chunk_size: 10,
            chunk_overlap: 3,
            ..Default::default()
        };
        let h = harness(Arc::new(ScriptedProvider::ok()), settings);
        let chunks = h
            .orchestrator
            .prepare_chunks("averyveryveryverylongwordwithoutanyspaces");
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.char_count <= 10));
    }

    #[tokio::test]
    async fn test_submit_rejects_blank_and_oversized() {
        let settings = PipelineSettings {
            max_document_chars: 10,
            ..Default::default()
        };
        let h = harness(Arc::new(ScriptedProvider::ok()), settings);
        let err = h
            .orchestrator
            .submit(Document::new("p1", "Blank", "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Input(InputError::EmptyInput)));

        let err = h
            .orchestrator
            .submit(Document::new("p1", "Long", "0123456789abc"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RagError::Input(InputError::TooLong { len: 13, max: 10 })
        ));
    }

    #[tokio::test]
    async fn test_requeue_stalled_processing_documents() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let h = harness(Arc::new(ScriptedProvider::ok()), small_chunks());
        let orchestrator = IngestionOrchestrator::new(
            h.store.clone(),
            EmbeddingClient::new(Arc::new(ScriptedProvider::ok())),
            h.meter.clone(),
            small_chunks(),
        )
        .with_clock(clock.clone());

        let doc = orchestrator
            .submit(Document::new("p1", "Guide", TEXT))
            .await
            .unwrap();
        // Simulates a run dropped right after the processing transition.
        h.store
            .update_document_status(&doc.id, DocumentStatus::Processing, None)
            .await
            .unwrap();

        let none = orchestrator
            .requeue_stalled("p1", Duration::minutes(10))
            .await
            .unwrap();
        assert!(none.is_empty());

        clock.advance(Duration::minutes(11));
        let requeued = orchestrator
            .requeue_stalled("p1", Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(requeued, vec![doc.id.clone()]);
        let stored = h.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Pending);

        orchestrator
            .process_document(&request(&doc, PlanType::Free))
            .await
            .unwrap();
    }
}
