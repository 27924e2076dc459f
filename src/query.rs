//! `ragline search` and `ragline ask`.

use anyhow::Result;

use ragline_core::chat::ChatRequest;
use ragline_core::metering::ModelTier;
use ragline_core::models::RetrievalResult;
use ragline_core::sanitize::Sanitizer;

use crate::app::App;
use crate::config::Config;

fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(200) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat.to_string(),
    }
}

fn print_results(results: &[RetrievalResult]) {
    for (i, result) in results.iter().enumerate() {
        println!("{}. [{:.2}] {}", i + 1, result.score, result.title);
        if let Some(ref url) = result.source_url {
            println!("    url: {}", url);
        }
        println!("    excerpt: \"{}\"", excerpt(&result.content));
        println!("    document: {}", result.document_id);
        println!("    chunk: {}", result.chunk_id);
        println!();
    }
}

/// Semantic search over the completed documents of `project`.
pub async fn run_search(config: &Config, project: &str, query: &str) -> Result<()> {
    let query = Sanitizer::new(config.sanitizer.max_length).sanitize(query);
    if query.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let app = App::open(config).await?;
    let results = app.retrieval.retrieve(project, &query).await;
    app.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_results(&results);
    Ok(())
}

/// One grounded chat turn. Prints the answer, then the cited sources.
pub async fn run_ask(
    config: &Config,
    project: &str,
    query: &str,
    tier: ModelTier,
    conversation: Option<String>,
    json: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let request = ChatRequest {
        project_id: project.to_string(),
        user_id: config.usage.user_id.clone(),
        plan: config.usage.plan,
        tier,
        conversation_id: conversation,
        query: query.to_string(),
    };
    let response = app.retrieval.chat(&request).await;
    app.close().await;
    let response = response?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    println!("{}", response.answer.trim());
    println!();
    if response.sources.is_empty() {
        println!("(no sources)");
    } else {
        println!("Sources:");
        for (i, source) in response.sources.iter().enumerate() {
            println!(
                "  [Source {}] {} ({:.2})",
                i + 1,
                source.title,
                source.score
            );
        }
    }
    println!();
    println!("conversation: {}", response.conversation_id);
    println!("tokens used:  {}", response.tokens_used);
    Ok(())
}
