//! Pattern-ranked heuristic TOC detection for documents with no usable
//! structural metadata.
//!
//! Patterns are tried in rank order and the first one matching at least two
//! lines wins: mixing pattern families produces noisy, interleaved TOCs,
//! while a single consistent family usually reflects the book's real
//! heading convention.

use regex::Regex;

use super::{Candidate, TocAnchor};

const MIN_MATCHES: usize = 2;
const MAX_TITLE_CHARS: usize = 100;

/// Ranked heading conventions, most specific first.
fn ranked_patterns() -> Vec<Regex> {
    [
        // CJK chapter/section forms.
        r"^第[零一二三四五六七八九十百千万\d]+[章节篇部]",
        // English chapter headings.
        r"^(?:Chapter|CHAPTER)\s+\d+",
        r"^(?:Part|PART|Section|SECTION)\s+\d+",
        // Numbered headings: "3. Title" / "3、Title".
        r"^\d{1,3}[.、]\s*\S",
        // Standalone ALL-CAPS display lines.
        r"^[A-Z][A-Z0-9 ,:'\-]{4,60}$",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static regex"))
    .collect()
}

/// Scans the text line by line and returns candidates for the best-ranked
/// pattern with enough support.
pub(crate) fn detect(text: &str) -> Vec<Candidate> {
    let lines = candidate_lines(text);
    for pattern in ranked_patterns() {
        let matched: Vec<Candidate> = lines
            .iter()
            .filter(|(line, _)| pattern.is_match(line))
            .map(|(line, offset)| Candidate {
                title: line.clone(),
                level: 1,
                offset: *offset,
                anchor: Some(TocAnchor::Offset(*offset)),
            })
            .collect();
        if matched.len() >= MIN_MATCHES {
            return matched;
        }
    }
    Vec::new()
}

/// Trimmed, length-bounded lines paired with their byte offsets. Long lines
/// are body text, not headings.
fn candidate_lines(text: &str) -> Vec<(String, usize)> {
    let mut lines = Vec::new();
    let mut offset = 0;
    for line in text.split('\n') {
        let trimmed = line.trim();
        let char_len = trimmed.chars().count();
        if char_len >= 2 && char_len <= MAX_TITLE_CHARS {
            let lead = line.len() - line.trim_start().len();
            lines.push((trimmed.to_string(), offset + lead));
        }
        offset += line.len() + 1;
    }
    lines
}
