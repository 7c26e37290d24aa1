//! Transcript text splitting.
//!
//! Three strategies over the same window/overlap parameters:
//! - `sentence`: sliding character window, cut back to a sentence boundary
//! - `paragraph`: blank-line blocks packed into windows
//! - `section`: heading-delimited blocks, windowed individually when too long
//!
//! Overlap applies inside the sliding window only. The block strategies keep
//! blocks whole, so consecutive packed chunks never share text; an oversized
//! block that spills into the windowed splitter gets overlap again.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Sentence,
    Paragraph,
    Section,
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::Paragraph => "paragraph",
            ChunkStrategy::Section => "section",
        };
        f.write_str(s)
    }
}

impl FromStr for ChunkStrategy {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sentence" => Ok(ChunkStrategy::Sentence),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            "section" => Ok(ChunkStrategy::Section),
            other => Err(ApiError::BadRequest(format!(
                "unknown chunk strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub strategy: ChunkStrategy,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, characters.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Sentence,
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// A bounded span of transcript text, the retrieval unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    /// Character offset in the original document.
    pub start_offset: usize,
    /// Ordinal within the transcript.
    pub index: usize,
}

pub fn split(text: &str, config: &ChunkerConfig) -> Vec<TextSpan> {
    let spans = match config.strategy {
        ChunkStrategy::Sentence => split_windowed(text, 0, config),
        ChunkStrategy::Paragraph => split_blocks(config, paragraph_blocks(text)),
        ChunkStrategy::Section => split_blocks(config, section_blocks(text)),
    };

    spans
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .enumerate()
        .map(|(index, mut span)| {
            span.index = index;
            span.text = span.text.trim().to_string();
            span
        })
        .collect()
}

/// Overlapping character windows, each cut back to the nearest sentence
/// boundary in its tail.
fn split_windowed(text: &str, base_offset: usize, config: &ChunkerConfig) -> Vec<TextSpan> {
    let chunk_size = config.chunk_size.max(1);
    let step = chunk_size.saturating_sub(config.chunk_overlap).max(1);

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < total {
        let end = (start + chunk_size).min(total);
        let window: String = chars[start..end].iter().collect();

        let final_text = if end < total {
            cut_at_sentence_boundary(&window)
        } else {
            window
        };

        spans.push(TextSpan {
            text: final_text,
            start_offset: base_offset + start,
            index: 0,
        });

        if end == total {
            break;
        }
        start += step;
    }

    spans
}

/// Packs pre-split blocks into windows, spilling oversized blocks back into
/// the sentence splitter.
fn split_blocks(config: &ChunkerConfig, blocks: Vec<(usize, String)>) -> Vec<TextSpan> {
    let chunk_size = config.chunk_size.max(1);
    let mut spans = Vec::new();
    let mut current = String::new();
    let mut current_offset = 0usize;

    for (offset, block) in blocks {
        let block_len = block.chars().count();

        if block_len > chunk_size {
            if !current.is_empty() {
                spans.push(TextSpan {
                    text: std::mem::take(&mut current),
                    start_offset: current_offset,
                    index: 0,
                });
            }
            spans.extend(split_windowed(&block, offset, config));
            continue;
        }

        if current.is_empty() {
            current_offset = offset;
            current = block;
        } else if current.chars().count() + block_len + 2 <= chunk_size {
            current.push_str("\n\n");
            current.push_str(&block);
        } else {
            spans.push(TextSpan {
                text: std::mem::take(&mut current),
                start_offset: current_offset,
                index: 0,
            });
            current_offset = offset;
            current = block;
        }
    }

    if !current.is_empty() {
        spans.push(TextSpan {
            text: current,
            start_offset: current_offset,
            index: 0,
        });
    }

    spans
}

/// Blank-line separated blocks with their character offsets.
fn paragraph_blocks(text: &str) -> Vec<(usize, String)> {
    let mut blocks = Vec::new();
    let mut offset = 0usize;
    let mut block_start = 0usize;
    let mut block = String::new();

    for line in text.split('\n') {
        let line_len = line.chars().count() + 1;
        if line.trim().is_empty() {
            if !block.trim().is_empty() {
                blocks.push((block_start, block.trim().to_string()));
            }
            block.clear();
        } else {
            if block.is_empty() {
                block_start = offset;
            }
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(line);
        }
        offset += line_len;
    }
    if !block.trim().is_empty() {
        blocks.push((block_start, block.trim().to_string()));
    }

    blocks
}

/// Heading-delimited blocks: a section starts at a markdown heading or a
/// short ALL-CAPS line (common in meeting transcripts).
fn section_blocks(text: &str) -> Vec<(usize, String)> {
    let heading =
        Regex::new(r"^(#{1,6}\s+\S|[A-Z][A-Z0-9 :\-]{3,60}$)").expect("valid heading regex");

    let mut blocks = Vec::new();
    let mut offset = 0usize;
    let mut block_start = 0usize;
    let mut block = String::new();

    for line in text.split('\n') {
        let line_len = line.chars().count() + 1;
        if heading.is_match(line.trim()) && !block.trim().is_empty() {
            blocks.push((block_start, block.trim().to_string()));
            block.clear();
            block_start = offset;
        }
        if block.is_empty() {
            block_start = offset;
        }
        if !block.is_empty() {
            block.push('\n');
        }
        block.push_str(line);
        offset += line_len;
    }
    if !block.trim().is_empty() {
        blocks.push((block_start, block.trim().to_string()));
    }

    blocks
}

/// Cuts a window back to the last sentence ending in its final 20%, when one
/// exists. Char-indexed so multibyte text never splits mid-codepoint.
fn cut_at_sentence_boundary(window: &str) -> String {
    let endings = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

    let chars: Vec<char> = window.chars().collect();
    let search_start = (chars.len() * 80) / 100;
    let tail: String = chars[search_start..].iter().collect();

    let mut best: Option<usize> = None;
    for ending in endings {
        if let Some(pos) = tail.rfind(ending) {
            let char_pos = tail[..pos].chars().count() + ending.chars().count();
            best = Some(best.map_or(char_pos, |b: usize| b.max(char_pos)));
        }
    }

    match best {
        Some(rel) => chars[..search_start + rel].iter().collect(),
        None => window.to_string(),
    }
}
