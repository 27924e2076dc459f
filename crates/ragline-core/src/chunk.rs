//! Sentence-boundary and fixed-width text segmentation.
//!
//! Two strategies split document text into chunks:
//!
//! - [`chunk_document`]: the default. Sentences are detected on `.`, `!`,
//!   or `?` followed by whitespace and accumulated greedily into a buffer
//!   of at most `target_size` characters. A sentence is never split, so a
//!   single sentence longer than the target becomes its own oversized chunk.
//! - [`chunk_fixed`]: a sliding window of `size` characters advancing by
//!   `size - overlap`, for callers that need a hard length cap regardless
//!   of sentence boundaries.
//!
//! All lengths are counted in `char`s so multi-byte text is never cut
//! inside a code point.
//!
//! # Example
//!
//! ```rust
//! use ragline_core::chunk::chunk_document;
//!
//! let chunks = chunk_document("Sentence one. Sentence two. Sentence three.", 20);
//! assert_eq!(chunks, vec!["Sentence one.", "Sentence two.", "Sentence three."]);
//! ```

use sha2::{Digest, Sha256};

use crate::context::estimate_tokens;
use crate::models::NewChunk;
use crate::settings::ChunkingMode;

/// Split text into sentences.
///
/// A boundary is a `.`, `!`, or `?` immediately followed by whitespace; the
/// punctuation stays with its sentence. Trailing text without terminal
/// punctuation is the last sentence. Sentences are whitespace-trimmed and
/// empty ones dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let s = text[start..end].trim();
                    if !s.is_empty() {
                        sentences.push(s);
                    }
                    start = end;
                }
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Greedy sentence chunker.
///
/// # Guarantees
///
/// - Empty or blank input yields no chunks.
/// - Every chunk is at most `target_size` characters unless it is a single
///   sentence longer than `target_size`.
/// - Joining the chunks with single spaces reproduces the input modulo
///   whitespace.
pub fn chunk_document(text: &str, target_size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        let would_be = if buf.is_empty() { len } else { buf_len + 1 + len };

        if would_be > target_size && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
            buf_len = 0;
        }

        if !buf.is_empty() {
            buf.push(' ');
            buf_len += 1;
        }
        buf.push_str(sentence);
        buf_len += len;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Fixed-width chunker with overlap.
///
/// Windows of `size` characters advance by `size - overlap`; when
/// `overlap >= size` the windows do not overlap at all, which keeps the
/// loop terminating. Windows are whitespace-trimmed and empty windows are
/// skipped. Non-blank input that produced nothing (a `size` of zero) comes
/// back whole as a single chunk.
pub fn chunk_fixed(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();

    if size > 0 {
        let step = if overlap < size { size - overlap } else { size };
        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    if chunks.is_empty() {
        chunks.push(text.trim().to_string());
    }
    chunks
}

/// Split `text` with the strategy selected by `mode`.
pub fn split_text(text: &str, mode: ChunkingMode, size: usize, overlap: usize) -> Vec<String> {
    match mode {
        ChunkingMode::Sentence => chunk_document(text, size),
        ChunkingMode::Fixed => chunk_fixed(text, size, overlap),
    }
}

/// Segment `text` with the given mode and attach indices, sizes, and hashes.
///
/// Indices are contiguous from 0 in segmentation order.
pub fn segment(text: &str, mode: ChunkingMode, size: usize, overlap: usize) -> Vec<NewChunk> {
    split_text(text, mode, size, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, content)| make_chunk(i as i64, content))
        .collect()
}

/// Partition items into groups of `batch_size`, the last possibly shorter.
///
/// A `batch_size` of zero is treated as one.
pub fn batch_chunks_for_embedding<T>(items: &[T], batch_size: usize) -> Vec<&[T]> {
    items.chunks(batch_size.max(1)).collect()
}

/// Build a [`NewChunk`] with its char count, token estimate, and SHA-256 hash.
pub fn make_chunk(index: i64, content: String) -> NewChunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    NewChunk {
        chunk_index: index,
        char_count: content.chars().count() as i64,
        token_count: estimate_tokens(&content) as i64,
        content,
        hash,
    }
}
