//! Boundary-aware chunking of chapter text.
//!
//! A chunk is at most `max_chars` characters. Cuts prefer a paragraph
//! break, then a sentence boundary, within `boundary_tolerance` characters
//! behind the ideal cut point; only when neither exists does the cut land
//! mid-text. Consecutive chunks overlap by `overlap_chars` so retrieval
//! never loses context at a seam.

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::splitter::ChapterSegment;

/// One retrievable span of a chapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Order of the chapter this chunk came from.
    pub chapter_order: usize,
    /// 0-based position within the chapter.
    pub index: usize,
    pub text: String,
    /// Character (not byte) count of `text`.
    pub char_count: usize,
}

/// Chunks one chapter segment. Empty or whitespace-only chapters yield no
/// chunks.
pub fn chunk_segment(segment: &ChapterSegment, config: &ChunkingConfig) -> Vec<Chunk> {
    if segment.text.trim().is_empty() {
        return Vec::new();
    }

    let max_chars = config.max_chars.max(1);
    let overlap = config.overlap_chars.min(max_chars.saturating_sub(1));

    // Char index -> byte offset, plus the terminal boundary.
    let boundaries: Vec<usize> = segment
        .text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(segment.text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start_char = 0;

    while start_char < total_chars {
        let ideal_end = (start_char + max_chars).min(total_chars);
        let end_char = if ideal_end == total_chars {
            ideal_end
        } else {
            pick_cut(&segment.text, &boundaries, start_char, ideal_end, config)
        };

        let text = segment.text[boundaries[start_char]..boundaries[end_char]].to_string();
        chunks.push(Chunk {
            chapter_order: segment.order,
            index: chunks.len(),
            text,
            char_count: end_char - start_char,
        });

        if end_char == total_chars {
            break;
        }
        // Step back for overlap, but always advance past the previous start.
        start_char = end_char.saturating_sub(overlap).max(start_char + 1);
    }

    chunks
}

/// Chunks every segment, concatenating in chapter order.
pub fn chunk_all(segments: &[ChapterSegment], config: &ChunkingConfig) -> Vec<Chunk> {
    segments
        .iter()
        .flat_map(|segment| chunk_segment(segment, config))
        .collect()
}

/// Picks the actual cut for a chunk ending ideally at `ideal_end` (char
/// index). Searches backward within the tolerance for a paragraph break,
/// then a sentence end; snapping is backward-only so a chunk never exceeds
/// `max_chars`.
fn pick_cut(
    text: &str,
    boundaries: &[usize],
    start_char: usize,
    ideal_end: usize,
    config: &ChunkingConfig,
) -> usize {
    let floor = ideal_end
        .saturating_sub(config.boundary_tolerance)
        .max(start_char + 1);

    if let Some(cut) = paragraph_cut(text, boundaries, floor, ideal_end) {
        return cut;
    }
    if let Some(cut) = sentence_cut(text, boundaries, floor, ideal_end) {
        return cut;
    }
    ideal_end
}

/// Last `"\n\n"` whose end falls in `(floor, ideal_end]`, as a char index.
fn paragraph_cut(
    text: &str,
    boundaries: &[usize],
    floor: usize,
    ideal_end: usize,
) -> Option<usize> {
    let window = &text[boundaries[floor]..boundaries[ideal_end]];
    let rel = window.rfind("\n\n")?;
    let cut_byte = boundaries[floor] + rel + 2;
    let cut_char = boundaries.partition_point(|&b| b < cut_byte);
    (cut_char > floor && cut_char <= ideal_end).then_some(cut_char)
}

/// Last sentence end in `(floor, ideal_end]`, as a char index; sentence
/// boundaries per Unicode text segmentation.
fn sentence_cut(
    text: &str,
    boundaries: &[usize],
    floor: usize,
    ideal_end: usize,
) -> Option<usize> {
    let window = &text[boundaries[floor]..boundaries[ideal_end]];
    let mut last = None;
    let mut consumed = 0;
    for sentence in window.split_sentence_bounds() {
        consumed += sentence.len();
        if consumed < window.len() {
            last = Some(consumed);
        }
    }
    let rel = last?;
    let cut_byte = boundaries[floor] + rel;
    let cut_char = boundaries.partition_point(|&b| b < cut_byte);
    (cut_char > floor && cut_char <= ideal_end).then_some(cut_char)
}
