//! Recursive text chunking with overlap, plus metadata stamping.
//!
//! Splits normalized document text along a separator hierarchy (paragraph,
//! then line, then word) so each chunk stays under the configured size, then
//! merges adjacent pieces with a character overlap carried between chunks.
//! Thread-sourced records go through a markdown-aware pre-pass that keeps
//! heading sections together, falling back to the generic splitter when no
//! structure is found.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::ProcessedRecord;

/// A chunk ready for embedding and vector-store insertion.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// The chunk's text, as embedded and searched.
    pub content: String,
    /// Record metadata stamped identically onto every chunk.
    pub metadata: Value,
}

/// Split one processed record into chunks, stamping its metadata onto each.
pub fn chunk_record(record: &ProcessedRecord, cfg: &ChunkingConfig, markdown: bool) -> Vec<Chunk> {
    let pieces = if markdown {
        split_markdown(&record.content, cfg)
    } else {
        split_text(&record.content, cfg)
    };

    pieces
        .into_iter()
        .map(|content| Chunk {
            content,
            metadata: record.metadata.clone(),
        })
        .collect()
}

/// Split text along the configured separator hierarchy, then merge adjacent
/// pieces up to `chunk_size` characters with `overlap` characters carried
/// from each chunk into the next.
pub fn split_text(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let units = split_units(trimmed, &cfg.separators, cfg.chunk_size);
    merge_units(units, cfg.chunk_size, cfg.overlap)
}

/// Markdown-aware split: sections start at heading lines so a heading stays
/// with its body. Falls back to the generic splitter when the text has no
/// headings to anchor on.
pub fn split_markdown(text: &str, cfg: &ChunkingConfig) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut saw_heading = false;

    for line in text.lines() {
        let is_heading = {
            let hashes = line.chars().take_while(|c| *c == '#').count();
            (1..=6).contains(&hashes) && line.chars().nth(hashes) == Some(' ')
        };
        if is_heading {
            saw_heading = true;
            if !current.trim().is_empty() {
                sections.push(current.trim().to_string());
            }
            current = String::new();
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current.trim().to_string());
    }

    if !saw_heading {
        return split_text(text, cfg);
    }

    sections
        .iter()
        .flat_map(|section| split_text(section, cfg))
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_units(text: &str, separators: &[String], max: usize) -> Vec<String> {
    if char_len(text) <= max {
        return vec![text.to_string()];
    }
    let Some(sep) = separators.first() else {
        return hard_split(text, max);
    };
    let rest = &separators[1..];
    let mut out = Vec::new();
    for part in text.split(sep.as_str()) {
        let part = part.trim_matches(|c: char| c == '\r');
        if part.trim().is_empty() {
            continue;
        }
        if char_len(part) <= max {
            out.push(part.to_string());
        } else {
            out.extend(split_units(part, rest, max));
        }
    }
    if out.is_empty() {
        return hard_split(text, max);
    }
    out
}

fn hard_split(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max.max(1))
        .map(|c| c.iter().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

fn char_suffix(s: &str, n: usize) -> String {
    let len = char_len(s);
    if n == 0 || len == 0 {
        return String::new();
    }
    s.chars().skip(len.saturating_sub(n)).collect()
}

fn merge_units(units: Vec<String>, max: usize, overlap: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();
    // Tracks whether buf currently starts with overlap text only, so a
    // flush never emits a chunk made of pure overlap.
    let mut buf_has_fresh = false;

    for unit in units {
        let unit = unit.trim();
        if unit.is_empty() {
            continue;
        }
        if !buf.is_empty() && char_len(&buf) + 1 + char_len(unit) > max {
            if buf_has_fresh {
                chunks.push(buf.trim().to_string());
                buf = char_suffix(&buf, overlap).trim_start().to_string();
                buf_has_fresh = false;
            }
            // The carried overlap counts toward the bound too; shrink it
            // so the next unit fits.
            if !buf.is_empty() && char_len(&buf) + 1 + char_len(unit) > max {
                let room = max.saturating_sub(char_len(unit) + 1);
                buf = char_suffix(&buf, room).trim_start().to_string();
            }
        }
        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(unit);
        buf_has_fresh = true;
    }

    if buf_has_fresh && !buf.trim().is_empty() {
        chunks.push(buf.trim().to_string());
    }
    chunks
}

/// SHA-256 hex of whitespace-normalized text.
///
/// Shared by the embedding ledger (skip-unchanged detection) and the
/// retriever (cross-source dedup), so the two always agree on identity.
pub fn content_hash(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
