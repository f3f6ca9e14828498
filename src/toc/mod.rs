//! Table-of-contents extraction from converted book text.
//!
//! Extraction is a ladder: a format-specific structural pass first (EPUB
//! chapter markers, PDF contents-page scan, Markdown outline), then a
//! heuristic pattern pass over the rendered text when structure yields
//! nothing usable. The contract never fails — an unrecognizable document
//! produces an empty TOC, which downstream splitting treats as "no TOC".

mod heuristics;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::types::FormatHint;

/// Where a TOC entry points inside (or outside) the converted text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TocAnchor {
    /// Source-document reference carried through conversion (EPUB item name).
    Href(String),
    /// Byte offset of the boundary line in the converted text.
    Offset(usize),
}

/// A single chapter-title candidate with its structural position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// Nesting depth, 1-based. Entries with equal `level` are siblings.
    pub level: usize,
    /// 0-based position in the TOC; strictly increasing across entries.
    pub order: usize,
    pub anchor: Option<TocAnchor>,
}

/// Candidate entry before deduplication and monotonicity filtering.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
    pub title: String,
    pub level: usize,
    /// Byte offset of the candidate (or its resolved anchor) in the text.
    pub offset: usize,
    pub anchor: Option<TocAnchor>,
}

/// Extracts an ordered TOC from converted document text.
///
/// Returns an empty vector when no usable structure is found; never errors.
pub fn extract(document_text: &str, hint: FormatHint) -> Vec<TocEntry> {
    let structural = match hint {
        FormatHint::Epub => chapter_marker_candidates(document_text),
        FormatHint::Pdf => contents_page_candidates(document_text),
        FormatHint::Markdown => Vec::new(),
    };
    if structural.len() >= 2 {
        return finalize(structural);
    }

    let headings = heading_candidates(document_text);
    if headings.len() >= 2 {
        return finalize(headings);
    }

    finalize(heuristics::detect(document_text))
}

/// Collapses a title for duplicate detection and tolerant matching:
/// lowercase, non-alphanumeric folded to single spaces.
pub(crate) fn normalize_title(title: &str) -> String {
    let folded: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deduplicates by normalized title, drops entries that move backwards in
/// the text, and assigns final `order` values.
///
/// Non-monotonic entries are dropped rather than reordered: a backwards jump
/// usually means a misparsed contents line, and reordering would hide the
/// ambiguity instead of surfacing it.
fn finalize(candidates: Vec<Candidate>) -> Vec<TocEntry> {
    let mut seen = HashSet::new();
    let mut last_offset = None;
    let mut entries = Vec::new();

    for candidate in candidates {
        let key = normalize_title(&candidate.title);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        if let Some(last) = last_offset {
            if candidate.offset <= last {
                debug!(
                    title = %candidate.title,
                    offset = candidate.offset,
                    "dropping non-monotonic toc candidate"
                );
                continue;
            }
        }
        last_offset = Some(candidate.offset);
        entries.push(TocEntry {
            title: candidate.title,
            level: candidate.level,
            order: entries.len(),
            anchor: candidate.anchor,
        });
    }
    entries
}

/// Markdown outline pass: ATX headings at the shallowest level present.
///
/// Deeper headings are section structure, not chapter boundaries, so only
/// the minimum level participates.
fn heading_candidates(text: &str) -> Vec<Candidate> {
    let heading = Regex::new(r"(?m)^(#{1,6})[ \t]+(.+?)[ \t]*$").expect("static regex");
    let mut all: Vec<(usize, String, usize)> = Vec::new();
    for caps in heading.captures_iter(text) {
        let level = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1);
        let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        let offset = caps.get(0).map(|m| m.start()).unwrap_or(0);
        if title.is_empty() || title.chars().count() > 100 {
            continue;
        }
        all.push((level, title.to_string(), offset));
    }
    let Some(min_level) = all.iter().map(|(level, _, _)| *level).min() else {
        return Vec::new();
    };
    all.into_iter()
        .filter(|(level, _, _)| *level == min_level)
        .map(|(level, title, offset)| Candidate {
            title,
            level,
            offset,
            anchor: Some(TocAnchor::Offset(offset)),
        })
        .collect()
}

/// EPUB pass: the converter emits `<!-- CHAPTER name -->` at each spine
/// item boundary. The title is the first heading (or non-empty line) that
/// follows the marker.
fn chapter_marker_candidates(text: &str) -> Vec<Candidate> {
    let marker = Regex::new(r"<!-- CHAPTER (.*?) -->").expect("static regex");
    let markers: Vec<(usize, usize, String)> = marker
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim().to_string();
            Some((whole.start(), whole.end(), name))
        })
        .collect();

    let mut candidates = Vec::new();
    for (idx, (start, end, name)) in markers.iter().enumerate() {
        let region_end = markers
            .get(idx + 1)
            .map(|(next_start, _, _)| *next_start)
            .unwrap_or(text.len());
        let title = title_from_region(&text[*end..region_end])
            .unwrap_or_else(|| format!("Chapter {}", idx + 1));
        candidates.push(Candidate {
            title,
            level: 1,
            offset: *start,
            anchor: Some(TocAnchor::Href(name.clone())),
        });
    }
    candidates
}

fn title_from_region(region: &str) -> Option<String> {
    for line in region.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("<!--") {
            continue;
        }
        let stripped = trimmed.trim_start_matches('#').trim();
        if stripped.is_empty() || stripped.chars().count() > 100 {
            return None;
        }
        return Some(stripped.to_string());
    }
    None
}

/// PDF pass: find a contents page near the front of the document, parse its
/// "Title ..... 123" lines, and resolve page numbers to text offsets via the
/// `<!-- PAGE n -->` markers the converter emits.
///
/// Resolved offsets are frequently imperfect (logical vs. physical page
/// numbering), which is exactly why [`finalize`] drops non-monotonic
/// entries instead of trusting them.
fn contents_page_candidates(text: &str) -> Vec<Candidate> {
    let page_marker = Regex::new(r"<!-- PAGE (\d+) -->").expect("static regex");
    let mut page_offsets = std::collections::HashMap::new();
    for caps in page_marker.captures_iter(text) {
        if let (Some(whole), Some(num)) = (caps.get(0), caps.get(1)) {
            if let Ok(page) = num.as_str().parse::<usize>() {
                page_offsets.entry(page).or_insert(whole.start());
            }
        }
    }
    if page_offsets.is_empty() {
        return Vec::new();
    }

    // Only scan the front of the book for a contents heading.
    let scan_limit = text.len().min(front_matter_window(text, &page_offsets));
    let head = &text[..scan_limit];
    let Some(contents_at) = ["contents", "table of contents", "目录"]
        .iter()
        .filter_map(|needle| find_heading_line(head, needle))
        .min()
    else {
        return Vec::new();
    };

    let dotted = Regex::new(r"^(.+?)\s*\.{2,}\s*(\d+)$").expect("static regex");
    let spaced = Regex::new(r"^(.{5,}?)\s{2,}(\d{1,4})$").expect("static regex");

    let mut candidates = Vec::new();
    for line in text[contents_at..].lines().skip(1).take(200) {
        let trimmed = line.trim_end();
        let body = trimmed.trim_start();
        if body.is_empty() {
            continue;
        }
        let indent = trimmed.len() - body.len();
        let level = 1 + (indent / 2).min(2);
        let caps = dotted.captures(body).or_else(|| spaced.captures(body));
        let Some(caps) = caps else { continue };
        let (Some(title), Some(page)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(page) = page.as_str().parse::<usize>() else {
            continue;
        };
        let title = title.as_str().trim_end_matches('.').trim();
        if title.chars().count() < 2 || title.chars().count() > 100 {
            continue;
        }
        let Some(offset) = page_offsets.get(&page).copied() else {
            debug!(title, page, "contents line refers to a page with no marker");
            continue;
        };
        candidates.push(Candidate {
            title: title.to_string(),
            level,
            offset,
            anchor: Some(TocAnchor::Offset(offset)),
        });
    }
    candidates
}

/// End of the 15th page, mirroring how far the original front-matter scan
/// looked for a contents heading.
fn front_matter_window(
    text: &str,
    page_offsets: &std::collections::HashMap<usize, usize>,
) -> usize {
    page_offsets.get(&16).copied().unwrap_or(text.len())
}

fn find_heading_line(text: &str, needle: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.lines() {
        let lowered = line.trim().trim_start_matches('#').trim().to_lowercase();
        if lowered == needle {
            return Some(offset);
        }
        offset += line.len() + 1;
    }
    None
}
