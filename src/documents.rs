//! Document and conversation inspection: `documents`, `show`, `delete`,
//! `history`.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use ragline_core::models::DocumentStatus;

use crate::app::Stores;
use crate::config::Config;

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// List the documents of `project`, optionally only those in `status`.
pub async fn run_documents(
    config: &Config,
    project: &str,
    status: Option<DocumentStatus>,
) -> Result<()> {
    let app = Stores::open(config).await?;
    let docs = app.store.list_documents(project, status).await;
    app.close().await;
    let docs = docs?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<36}  {:<10}  {:<19}  TITLE", "ID", "STATUS", "UPDATED");
    for doc in &docs {
        println!(
            "{:<36}  {:<10}  {:<19}  {}",
            doc.id,
            doc.status.as_str(),
            format_ts(doc.updated_at),
            doc.title
        );
        if let Some(ref err) = doc.error_message {
            println!("{:<36}  error: {}", "", err);
        }
    }
    println!();
    println!("{} document(s)", docs.len());
    Ok(())
}

/// Print one document's metadata and its chunk and embedding counts.
pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let app = Stores::open(config).await?;
    let found = app.store.get_document(id).await?;
    let Some(doc) = found else {
        app.close().await;
        bail!("document not found: {}", id);
    };

    let counts = sqlx::query(
        r#"
        SELECT COUNT(c.id) AS chunk_count,
               COUNT(e.chunk_id) AS embedded_count,
               COALESCE(SUM(c.token_count), 0) AS token_count
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id
        WHERE c.document_id = ?
        "#,
    )
    .bind(id)
    .fetch_one(&app.pool)
    .await;
    app.close().await;
    let counts = counts?;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("project:      {}", doc.project_id);
    println!("title:        {}", doc.title);
    if let Some(ref url) = doc.source_url {
        println!("source_url:   {}", url);
    }
    println!("status:       {}", doc.status);
    if let Some(ref err) = doc.error_message {
        println!("error:        {}", err);
    }
    println!("created_at:   {}", format_ts(doc.created_at));
    println!("updated_at:   {}", format_ts(doc.updated_at));
    if let Some(deleted) = doc.deleted_at {
        println!("deleted_at:   {}", format_ts(deleted));
    }
    println!("chars:        {}", doc.content.chars().count());
    println!("chunks:       {}", counts.get::<i64, _>("chunk_count"));
    println!("embedded:     {}", counts.get::<i64, _>("embedded_count"));
    println!("tokens:       {}", counts.get::<i64, _>("token_count"));
    Ok(())
}

/// Soft-delete a document so it no longer appears in search.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let app = Stores::open(config).await?;
    let deleted = app.store.delete_document(id).await;
    app.close().await;
    if deleted? {
        println!("Deleted document {}.", id);
        Ok(())
    } else {
        bail!("document not found: {}", id)
    }
}

/// Print the messages of a conversation in order.
pub async fn run_history(config: &Config, conversation: &str) -> Result<()> {
    let app = Stores::open(config).await?;
    let messages = app.store.list_messages(conversation).await;
    app.close().await;
    let messages = messages?;

    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }
    for msg in &messages {
        println!(
            "[{}] {} (~{} tokens)",
            format_ts(msg.created_at),
            msg.role.as_str(),
            msg.token_estimate
        );
        println!("{}", msg.content.trim());
        if !msg.source_document_ids.is_empty() {
            println!("  sources: {}", msg.source_document_ids.join(", "));
        }
        println!();
    }
    Ok(())
}
