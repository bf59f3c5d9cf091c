//! Paragraph-boundary text chunker.
//!
//! Splits a document body into chunk texts bounded by
//! [`ChunkConfig::chunk_chars`]. Splitting prefers paragraph boundaries
//! (`\n\n`); a single oversize paragraph is hard-split at the nearest
//! newline or space. Lengths are measured in characters, never bytes.
//!
//! After splitting:
//! - pieces shorter than `min_chunk_chars` are folded into a neighbour;
//! - each chunk after the first is prefixed with the last
//!   `overlap_chars` characters of the previous piece.
//!
//! A blank document, or one whose whole text is shorter than
//! `min_chunk_chars`, yields no chunks.
//!
//! # Example
//!
//! ```rust
//! use ragsync_core::chunk::chunk_text;
//! use ragsync_core::models::ChunkConfig;
//!
//! let conf = ChunkConfig { chunk_chars: 200, overlap_chars: 0, min_chunk_chars: 0 };
//! let chunks = chunk_text("Hello world.\n\nSecond paragraph.", &conf);
//! assert_eq!(chunks.len(), 1);
//! ```

use crate::models::ChunkConfig;

/// Split `text` into chunk texts. Indices of the returned vector are the
/// chunk indices used for chunk ids.
pub fn chunk_text(text: &str, conf: &ChunkConfig) -> Vec<String> {
    let max_chars = conf.chunk_chars.max(1);
    let pieces = split_paragraphs(text, max_chars);
    let pieces = fold_small_pieces(pieces, conf.min_chunk_chars);
    apply_overlap(pieces, conf.overlap_chars)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let para_len = char_len(trimmed);
        let would_be = if current_buf.is_empty() {
            para_len
        } else {
            char_len(&current_buf) + 2 + para_len
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if para_len > max_chars {
            hard_split(trimmed, max_chars, &mut pieces);
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

/// Split an oversize paragraph at whitespace near `max_chars`.
fn hard_split(paragraph: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut remaining = paragraph;
    while !remaining.is_empty() {
        let limit = match remaining.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => byte_idx,
            None => {
                push_trimmed(remaining, out);
                break;
            }
        };

        let head = &remaining[..limit];
        let split_at = head
            .rfind('\n')
            .or_else(|| head.rfind(' '))
            .filter(|pos| *pos > 0)
            .map(|pos| pos + 1)
            .unwrap_or(limit);

        push_trimmed(&remaining[..split_at], out);
        remaining = &remaining[split_at..];
    }
}

fn push_trimmed(piece: &str, out: &mut Vec<String>) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

fn fold_small_pieces(pieces: Vec<String>, min_chars: usize) -> Vec<String> {
    if min_chars == 0 {
        return pieces;
    }

    let mut merged: Vec<String> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        match merged.last_mut() {
            Some(last) if char_len(&piece) < min_chars => {
                last.push_str("\n\n");
                last.push_str(&piece);
            }
            _ => merged.push(piece),
        }
    }

    // A short leading piece has no predecessor; fold it forward.
    if merged.len() > 1 && char_len(&merged[0]) < min_chars {
        let head = merged.remove(0);
        merged[0] = format!("{}\n\n{}", head, merged[0]);
    }

    if merged.len() == 1 && char_len(&merged[0]) < min_chars {
        merged.clear();
    }

    merged
}

fn apply_overlap(pieces: Vec<String>, overlap_chars: usize) -> Vec<String> {
    if overlap_chars == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut out = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            out.push(piece.clone());
            continue;
        }
        let prev = &pieces[i - 1];
        let skip = char_len(prev).saturating_sub(overlap_chars);
        let tail: String = prev.chars().skip(skip).collect();
        let tail = tail.trim();
        if tail.is_empty() {
            out.push(piece.clone());
        } else {
            out.push(format!("{} {}", tail, piece));
        }
    }
    out
}
