//! `ragline ingest`, `process`, `reprocess` and `requeue-stalled`.
//!
//! Each command runs documents through [`IngestionOrchestrator`] on the
//! configured user's allowance.
//!
//! [`IngestionOrchestrator`]: ragline_core::ingest::IngestionOrchestrator

use std::path::Path;

use anyhow::{bail, Context, Result};

use ragline_core::ingest::{IngestOutcome, IngestRequest};
use ragline_core::metering::UsageScope;
use ragline_core::models::{Document, DocumentStatus};

use crate::app::App;
use crate::config::Config;

fn request_for(config: &Config, doc: &Document) -> IngestRequest {
    IngestRequest {
        document_id: doc.id.clone(),
        scope: UsageScope::new(&config.usage.user_id, &doc.project_id),
        plan: config.usage.plan,
    }
}

fn print_outcome(outcome: &IngestOutcome) {
    println!("Document {} completed.", outcome.document_id);
    println!("  chunks:  {}", outcome.chunk_count);
    println!("  tokens:  {}", outcome.total_tokens);
    println!("  model:   {}", outcome.model);
}

async fn process(app: &App, config: &Config, doc: &Document) -> Result<IngestOutcome> {
    match app.ingestion.process_document(&request_for(config, doc)).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            eprintln!("Document {} failed: {}", doc.id, e);
            if e.is_retryable() {
                eprintln!("  (transient; retry with `ragline reprocess {}`)", doc.id);
            }
            Err(e.into())
        }
    }
}

/// Read `file`, submit it to `project` and process it right away.
pub async fn run_ingest(
    config: &Config,
    project: &str,
    file: &Path,
    title: Option<String>,
    url: Option<String>,
) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let title = title.unwrap_or_else(|| {
        file.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string())
    });

    let mut doc = Document::new(project, &title, &content);
    if let Some(url) = url {
        doc = doc.with_source_url(url);
    }

    let app = App::open(config).await?;
    let doc = app.ingestion.submit(doc).await?;
    println!("Submitted document {} ({} chars).", doc.id, content.chars().count());

    let result = process(&app, config, &doc).await;
    app.close().await;
    print_outcome(&result?);
    Ok(())
}

/// Process a document that is already `pending`.
pub async fn run_process(config: &Config, id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let found = app.store.get_document(id).await?;
    let Some(doc) = found else {
        app.close().await;
        bail!("document not found: {}", id);
    };
    let result = process(&app, config, &doc).await;
    app.close().await;
    print_outcome(&result?);
    Ok(())
}

/// Reset a `completed` or `failed` document to `pending` and process it.
pub async fn run_reprocess(config: &Config, id: &str) -> Result<()> {
    let app = App::open(config).await?;
    let found = app.store.get_document(id).await?;
    let Some(doc) = found else {
        app.close().await;
        bail!("document not found: {}", id);
    };
    if let Err(e) = app.ingestion.reprocess(id).await {
        app.close().await;
        return Err(e.into());
    }
    let result = process(&app, config, &doc).await;
    app.close().await;
    print_outcome(&result?);
    Ok(())
}

/// Move documents stuck in `processing` for longer than
/// `older_than_mins` back to `pending`.
pub async fn run_requeue_stalled(config: &Config, project: &str, older_than_mins: i64) -> Result<()> {
    let app = App::open(config).await?;
    let ids = app
        .ingestion
        .requeue_stalled(project, chrono::Duration::minutes(older_than_mins))
        .await;
    app.close().await;
    let ids = ids?;

    if ids.is_empty() {
        println!(
            "No documents stuck in {} for more than {} minutes.",
            DocumentStatus::Processing,
            older_than_mins
        );
        return Ok(());
    }
    println!("Requeued {} document(s):", ids.len());
    for id in &ids {
        println!("  {}", id);
    }
    println!();
    println!("Run `ragline process <id>` to process them again.");
    Ok(())
}
