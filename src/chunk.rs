//! Paragraph-boundary text chunker.
//!
//! Splits document text into [`Chunk`]s that respect a `max_tokens` limit.
//! Splitting occurs on paragraph boundaries (`\n\n`); paragraphs larger than
//! the limit are hard-split at the last newline or space before the limit.
//! With `overlap_tokens > 0`, each chunk after the first is prefixed with the
//! tail of its predecessor so retrieval keeps some surrounding context.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks with contiguous indices starting at 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens * CHARS_PER_TOKEN;
    let pieces = split_pieces(text, max_chars);

    if pieces.is_empty() {
        return vec![make_chunk(document_id, 0, text.trim())];
    }

    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;
    pieces
        .iter()
        .enumerate()
        .map(|(i, piece)| {
            if i == 0 || overlap_chars == 0 {
                return make_chunk(document_id, i as i64, piece);
            }
            let tail = overlap_tail(&pieces[i - 1], overlap_chars);
            if tail.is_empty() {
                make_chunk(document_id, i as i64, piece)
            } else {
                make_chunk(document_id, i as i64, &format!("{}\n\n{}", tail, piece))
            }
        })
        .collect()
}

fn split_pieces(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    pieces.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    pieces
}

/// Last `max_chars` bytes of `text`, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut start = text.len() - max_chars;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash: sha256_hex(text.as_bytes()),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", 700, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_multiple_paragraphs_exceed_limit() {
        // max_tokens=5 => max_chars=20
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text("doc1", text, 5, 0);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, "doc1");
        }
    }

    #[test]
    fn test_oversized_paragraph_splits_on_spaces() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let chunks = chunk_text("doc1", text, 3, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 12, "chunk too long: {:?}", c.text);
            assert!(!c.text.starts_with(' '));
        }
        let rejoined: Vec<&str> = chunks.iter().flat_map(|c| c.text.split(' ')).collect();
        assert_eq!(rejoined.join(" "), text);
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "é".repeat(100);
        let chunks = chunk_text("doc1", &text, 2, 0);
        let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_overlap_prefixes_previous_tail() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
        let chunks = chunk_text("doc1", text, 6, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "First paragraph here.");
        assert!(chunks[1].text.starts_with("here."));
        assert!(chunks[1].text.ends_with("Second paragraph here."));
    }

    #[test]
    fn test_hash_is_sha256_of_text() {
        let chunks = chunk_text("doc1", "abc", 700, 0);
        assert_eq!(
            chunks[0].hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
