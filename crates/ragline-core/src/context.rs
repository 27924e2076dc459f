//! Token-budgeted prompt context assembly.
//!
//! Token counts use a fixed 4-characters-per-token approximation rather
//! than a real tokenizer. The estimate only has to be stable and roughly
//! proportional, since it bounds prompt size and feeds usage reporting.

use crate::models::{RagContext, RetrievalResult};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Separator between formatted sources.
pub const SOURCE_DELIMITER: &str = "\n\n---\n\n";

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Greedily select ranked results under `max_tokens`.
///
/// Results are taken in input order (already sorted by similarity). The
/// first result whose tokens would push the total past `max_tokens` ends
/// the selection; nothing after it is considered and no chunk is ever cut
/// short.
pub fn build_rag_context(results: &[RetrievalResult], max_tokens: usize) -> RagContext {
    let mut chunks = Vec::new();
    let mut total_tokens = 0usize;

    for r in results {
        let tokens = estimate_tokens(&r.content);
        if total_tokens + tokens > max_tokens {
            break;
        }
        total_tokens += tokens;
        chunks.push(r.clone());
    }

    let formatted = format_sources(&chunks);
    RagContext {
        chunks,
        total_tokens,
        formatted,
    }
}

/// Render accepted chunks with 1-based source labels.
pub fn format_sources(chunks: &[RetrievalResult]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut entry = format!("[Source {}] {}\n", i + 1, c.title);
            if let Some(url) = &c.source_url {
                entry.push_str(&format!("URL: {}\n", url));
            }
            entry.push_str(&c.content);
            entry
        })
        .collect::<Vec<_>>()
        .join(SOURCE_DELIMITER)
}
