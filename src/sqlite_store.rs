//! SQLite-backed [`Store`] implementation.
//!
//! Similarity search filters candidates with a parameterized query
//! (project, `completed` status, not deleted) and scores them in process
//! with cosine similarity. The query vector is never rendered into SQL.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use ragline_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use ragline_core::error::ConsistencyError;
use ragline_core::models::{
    Chunk, Document, DocumentStatus, MessageRole, NewChunk, NewEmbedding, NewMessage,
    RetrievalResult,
};
use ragline_core::search::rank_results;
use ragline_core::store::{Store, StoredMessage};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

const DOCUMENT_COLUMNS: &str = "id, project_id, title, source_url, content, status, error_message, created_at, updated_at, deleted_at";

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    let deleted_at: Option<i64> = row.get("deleted_at");
    Ok(Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        content: row.get("content"),
        status: status.parse()?,
        error_message: row.get("error_message"),
        created_at: from_millis(row.get("created_at")),
        updated_at: from_millis(row.get("updated_at")),
        deleted_at: deleted_at.map(from_millis),
    })
}

fn parse_role(s: &str) -> Result<MessageRole> {
    match s {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        other => anyhow::bail!("unknown message role: {}", other),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, title, source_url, content, status,
                                   error_message, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.project_id)
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(&doc.content)
        .bind(doc.status.as_str())
        .bind(&doc.error_message)
        .bind(to_millis(doc.created_at))
        .bind(to_millis(doc.updated_at))
        .bind(doc.deleted_at.map(to_millis))
        .execute(&self.pool)
        .await
        .with_context(|| format!("inserting document {}", doc.id))?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(
        &self,
        project_id: &str,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM documents
            WHERE project_id = ? AND deleted_at IS NULL
              AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC, id ASC
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(project_id)
        .bind(status.map(|s| s.as_str()))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let now = to_millis(Utc::now());
        let result = sqlx::query(
            "UPDATE documents SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn list_stale_documents(
        &self,
        project_id: &str,
        status: DocumentStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM documents
            WHERE project_id = ? AND status = ? AND updated_at < ? AND deleted_at IS NULL
            ORDER BY updated_at ASC
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(project_id)
        .bind(status.as_str())
        .bind(to_millis(updated_before))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn create_chunks(&self, document_id: &str, chunks: &[NewChunk]) -> Result<Vec<Chunk>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now();
        let mut created = Vec::with_capacity(chunks.len());
        for c in chunks {
            let chunk = Chunk {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                chunk_index: c.chunk_index,
                content: c.content.clone(),
                char_count: c.char_count,
                token_count: c.token_count,
                hash: c.hash.clone(),
                created_at: now,
            };
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, char_count,
                                    token_count, hash, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.char_count)
            .bind(chunk.token_count)
            .bind(&chunk.hash)
            .bind(to_millis(chunk.created_at))
            .execute(&mut *tx)
            .await?;
            created.push(chunk);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn create_embeddings(&self, embeddings: &[NewEmbedding]) -> Result<()> {
        let now = to_millis(Utc::now());
        let mut tx = self.pool.begin().await?;

        for e in embeddings {
            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, model, dims, vector, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    vector = excluded.vector,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&e.chunk_id)
            .bind(&e.model)
            .bind(e.vector.len() as i64)
            .bind(vec_to_blob(&e.vector))
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("storing embedding for chunk {}", e.chunk_id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        project_id: &str,
        query_vec: &[f32],
        top_k: usize,
        min_similarity: f64,
    ) -> Result<Vec<RetrievalResult>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.content, c.created_at,
                   d.title, d.source_url, e.dims, e.vector
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            JOIN embeddings e ON e.chunk_id = c.id
            WHERE d.project_id = ?
              AND d.status = 'completed'
              AND d.deleted_at IS NULL
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::new();
        for row in &rows {
            let dims: i64 = row.get("dims");
            if dims as usize != query_vec.len() {
                return Err(ConsistencyError::DimensionMismatch {
                    expected: dims as usize,
                    actual: query_vec.len(),
                }
                .into());
            }
            let blob: Vec<u8> = row.get("vector");
            let vector = blob_to_vec(&blob);
            let score = cosine_similarity(query_vec, &vector) as f64;
            if score < min_similarity {
                continue;
            }
            results.push(RetrievalResult {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                content: row.get("content"),
                score,
                title: row.get("title"),
                source_url: row.get("source_url"),
                created_at: from_millis(row.get("created_at")),
            });
        }

        rank_results(&mut results);
        results.truncate(top_k);
        Ok(results)
    }

    async fn resolve_conversation(
        &self,
        project_id: &str,
        conversation_id: Option<&str>,
    ) -> Result<String> {
        if let Some(id) = conversation_id {
            let existing: Option<String> =
                sqlx::query_scalar("SELECT id FROM conversations WHERE id = ? AND project_id = ?")
                    .bind(id)
                    .bind(project_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(id) = existing {
                return Ok(id);
            }
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO conversations (id, project_id, created_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(project_id)
            .bind(to_millis(Utc::now()))
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    async fn record_message(&self, message: &NewMessage) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let sources = serde_json::to_string(&message.source_document_ids)?;
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, token_estimate,
                                  source_document_ids, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&message.conversation_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.token_estimate)
        .bind(sources)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("recording message in {}", message.conversation_id))?;
        Ok(id)
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        let rows = sqlx::query(
            r#"
            SELECT id, conversation_id, role, content, token_estimate,
                   source_document_ids, created_at
            FROM messages
            WHERE conversation_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.get("role");
                let sources: String = row.get("source_document_ids");
                Ok(StoredMessage {
                    id: row.get("id"),
                    conversation_id: row.get("conversation_id"),
                    role: parse_role(&role)?,
                    content: row.get("content"),
                    token_estimate: row.get("token_estimate"),
                    source_document_ids: serde_json::from_str(&sources)?,
                    created_at: from_millis(row.get("created_at")),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use ragline_core::chunk::segment;
    use ragline_core::settings::ChunkingMode;

    async fn store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::connect_path(&dir.path().join("test.sqlite"))
            .await
            .unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        (SqliteStore::new(pool), dir)
    }

    async fn indexed(store: &SqliteStore, project: &str, vector: Vec<f32>) -> Document {
        let doc = Document::new(project, "Doc", "Hello there.").with_source_url("https://x.test");
        store.insert_document(&doc).await.unwrap();
        let chunks = store
            .create_chunks(&doc.id, &segment(&doc.content, ChunkingMode::Sentence, 100, 0))
            .await
            .unwrap();
        store
            .create_embeddings(&[NewEmbedding {
                chunk_id: chunks[0].id.clone(),
                vector,
                model: "m".into(),
            }])
            .await
            .unwrap();
        store
            .update_document_status(&doc.id, DocumentStatus::Completed, None)
            .await
            .unwrap();
        doc
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_status() {
        let (store, _dir) = store().await;
        let doc = Document::new("p1", "Title", "Body.");
        store.insert_document(&doc).await.unwrap();

        store
            .update_document_status(&doc.id, DocumentStatus::Failed, Some("boom"))
            .await
            .unwrap();
        let got = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(got.status, DocumentStatus::Failed);
        assert_eq!(got.error_message.as_deref(), Some("boom"));
        assert_eq!(got.created_at.timestamp_millis(), doc.created_at.timestamp_millis());

        let failed = store
            .list_documents("p1", Some(DocumentStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert!(store
            .list_documents("p1", Some(DocumentStatus::Completed))
            .await
            .unwrap()
            .is_empty());
        assert!(store.list_documents("p2", None).await.unwrap().is_empty());

        assert!(store
            .update_document_status("missing", DocumentStatus::Failed, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_search_scoped_and_status_joined() {
        let (store, _dir) = store().await;
        let mine = indexed(&store, "p1", vec![1.0, 0.0]).await;
        indexed(&store, "p2", vec![1.0, 0.0]).await;
        let failed = indexed(&store, "p1", vec![1.0, 0.0]).await;
        store
            .update_document_status(&failed.id, DocumentStatus::Failed, Some("x"))
            .await
            .unwrap();

        let hits = store
            .similarity_search("p1", &[1.0, 0.0], 10, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, mine.id);
        assert_eq!(hits[0].source_url.as_deref(), Some("https://x.test"));
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        store.delete_document(&mine.id).await.unwrap();
        assert!(store
            .similarity_search("p1", &[1.0, 0.0], 10, 0.5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_search() {
        let (store, _dir) = store().await;
        let hits = store
            .similarity_search("p1", &[0.3, 0.4], 5, 0.0)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_reported() {
        let (store, _dir) = store().await;
        indexed(&store, "p1", vec![1.0, 0.0, 0.0]).await;
        let err = store
            .similarity_search("p1", &[1.0, 0.0], 5, 0.0)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<ConsistencyError>().is_some());
    }

    #[tokio::test]
    async fn test_create_chunks_replaces_previous_set() {
        let (store, _dir) = store().await;
        let doc = indexed(&store, "p1", vec![1.0, 0.0]).await;
        let replaced = store
            .create_chunks(
                &doc.id,
                &segment("One. Two. Three.", ChunkingMode::Sentence, 5, 0),
            )
            .await
            .unwrap();
        assert_eq!(replaced.len(), 3);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(&doc.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 3);
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(vectors, 0);
    }

    #[tokio::test]
    async fn test_conversation_and_messages() {
        let (store, _dir) = store().await;
        let conv = store.resolve_conversation("p1", None).await.unwrap();
        assert_eq!(store.resolve_conversation("p1", Some(&conv)).await.unwrap(), conv);
        assert_ne!(store.resolve_conversation("p2", Some(&conv)).await.unwrap(), conv);

        store
            .record_message(&NewMessage {
                conversation_id: conv.clone(),
                role: MessageRole::User,
                content: "hi".into(),
                token_estimate: 1,
                source_document_ids: vec![],
            })
            .await
            .unwrap();
        store
            .record_message(&NewMessage {
                conversation_id: conv.clone(),
                role: MessageRole::Assistant,
                content: "hello".into(),
                token_estimate: 2,
                source_document_ids: vec!["d1".into(), "d2".into()],
            })
            .await
            .unwrap();

        let messages = store.list_messages(&conv).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].source_document_ids, vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn test_stale_documents() {
        let (store, _dir) = store().await;
        let doc = Document::new("p1", "T", "Body.");
        store.insert_document(&doc).await.unwrap();
        store
            .update_document_status(&doc.id, DocumentStatus::Processing, None)
            .await
            .unwrap();

        let future = Utc::now() + chrono::Duration::seconds(5);
        let stale = store
            .list_stale_documents("p1", DocumentStatus::Processing, future)
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        let past = Utc::now() - chrono::Duration::hours(1);
        assert!(store
            .list_stale_documents("p1", DocumentStatus::Processing, past)
            .await
            .unwrap()
            .is_empty());
    }
}
