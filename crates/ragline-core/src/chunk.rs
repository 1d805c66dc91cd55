//! Sentence-boundary text chunker.
//!
//! Splits extracted document text into [`Chunk`]s no longer than a
//! configurable `max_chunk_size` (in characters). Splitting happens only
//! between sentences, so a single sentence longer than the limit becomes a
//! chunk of its own rather than being cut.
//!
//! A sentence ends at `.`, `!` or `?` followed by whitespace. Sentences are
//! accumulated greedily, joined by a single space.

use sha2::{Digest, Sha256};

use crate::models::{Chunk, ChunkMetadata, Document};

/// Chunk size used when the configured size is zero or negative.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 1000;

/// Split text into trimmed, non-empty sentences in document order.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let followed_by_space = chars.peek().is_some_and(|&(_, next)| next.is_whitespace());
        if followed_by_space {
            let end = i + c.len_utf8();
            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let trimmed = s.trim();
    if !trimmed.is_empty() {
        out.push(trimmed);
    }
}

/// Split text into chunk bodies of at most `max_chunk_size` characters.
///
/// Returns an empty vector for empty or whitespace-only input.
pub fn chunk_text(text: &str, max_chunk_size: i64) -> Vec<String> {
    let max = if max_chunk_size <= 0 {
        DEFAULT_MAX_CHUNK_SIZE
    } else {
        max_chunk_size as usize
    };

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();

        if buf_chars > 0 && buf_chars + 1 + len > max {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if buf_chars > 0 {
            buf.push(' ');
            buf_chars += 1;
        }
        buf.push_str(sentence);
        buf_chars += len;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

/// Chunk a document's text and attach ids, hashes, and metadata.
/// Ordinals are contiguous from 0.
pub fn build_chunks(document: &Document, text: &str, max_chunk_size: i64) -> Vec<Chunk> {
    let bodies = chunk_text(text, max_chunk_size);
    let total = bodies.len();

    bodies
        .into_iter()
        .enumerate()
        .map(|(ordinal, content)| make_chunk(document, ordinal, total, content))
        .collect()
}

fn make_chunk(document: &Document, ordinal: usize, total: usize, content: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let metadata = ChunkMetadata {
        file_name: document.file_name.clone(),
        file_type: document.media_type.clone(),
        chunk_index: ordinal,
        total_chunks: total,
        word_count: content.split_whitespace().count(),
        char_count: content.chars().count(),
    };

    Chunk {
        id: format!("{}_chunk_{}", document.id, ordinal),
        document_id: document.id.clone(),
        ordinal,
        content,
        hash,
        embedding: None,
        metadata,
    }
}
