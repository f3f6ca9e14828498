//! TOC-anchored chapter splitting with a content-heuristic fallback.
//!
//! The primary path walks the TOC in order and locates each title with a
//! left-to-right windowed search, so repeated or similar titles can never
//! match backwards. When the TOC locates too few of its entries the whole
//! TOC is distrusted and the text is partitioned into paragraph-respecting
//! fixed windows instead.
//!
//! Segments are contiguous and non-overlapping by construction:
//! concatenating their texts in order reconstructs the source, except for
//! whitespace-only front matter, which is dropped.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SplitConfig;
use crate::toc::{TocAnchor, TocEntry, normalize_title};

/// How a segment's boundaries were derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentSource {
    /// Boundaries come from a located TOC entry (or the synthetic front
    /// matter before the first located entry).
    TocDerived,
    /// Boundaries come from content heuristics; semantically arbitrary.
    FallbackHeuristic,
}

/// One contiguous slice of the source document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChapterSegment {
    pub title: String,
    /// 0-based position among the produced segments.
    pub order: usize,
    pub text: String,
    /// Byte offsets into the source text; `end_offset` of segment *i*
    /// equals `start_offset` of segment *i + 1*.
    pub start_offset: usize,
    pub end_offset: usize,
    pub source: SegmentSource,
}

/// Splits `document_text` into ordered, non-overlapping chapter segments.
///
/// Unlocatable TOC entries are dropped and logged as structural gaps; when
/// fewer than `config.min_located_fraction` of the entries locate, the TOC
/// is abandoned for heuristic windows.
pub fn split(document_text: &str, toc: &[TocEntry], config: &SplitConfig) -> Vec<ChapterSegment> {
    if toc.is_empty() {
        info!("empty toc; splitting by content heuristics");
        return fallback_split(document_text, config);
    }

    let located = locate_entries(document_text, toc);
    let needed = (toc.len() as f64 * config.min_located_fraction).ceil() as usize;
    if located.len() < needed.max(1) {
        warn!(
            located = located.len(),
            total = toc.len(),
            "too few toc entries located; splitting by content heuristics"
        );
        return fallback_split(document_text, config);
    }

    segments_from_anchors(document_text, &located)
}

/// A TOC entry resolved to a concrete position in the text.
struct LocatedEntry<'a> {
    entry: &'a TocEntry,
    offset: usize,
}

/// Left-to-right monotonic title search: each entry is searched only after
/// the previous match, first verbatim, then with whitespace/punctuation
/// folded away.
fn locate_entries<'a>(text: &str, toc: &'a [TocEntry]) -> Vec<LocatedEntry<'a>> {
    let mut located = Vec::new();
    let mut cursor = 0;

    for entry in toc {
        match anchored_offset(text, cursor, entry)
            .or_else(|| find_title(text, cursor, &entry.title))
        {
            Some(offset) => {
                cursor = (offset + entry.title.len().max(1)).min(text.len());
                located.push(LocatedEntry { entry, offset });
            }
            None => {
                warn!(
                    title = %entry.title,
                    order = entry.order,
                    "toc entry not located in text; structural gap"
                );
            }
        }
    }
    located
}

/// Trusts a forward offset anchor when the title actually appears near it.
/// Anchored positions point at the boundary line itself, so segments start
/// at the heading rather than mid-line.
fn anchored_offset(text: &str, cursor: usize, entry: &TocEntry) -> Option<usize> {
    let TocAnchor::Offset(offset) = entry.anchor.as_ref()? else {
        return None;
    };
    let offset = *offset;
    if offset < cursor || offset >= text.len() || !text.is_char_boundary(offset) {
        return None;
    }
    let probe_end = ceil_char_boundary(text, (offset + 200).min(text.len()));
    text[offset..probe_end]
        .contains(&entry.title)
        .then_some(offset)
}

fn find_title(text: &str, from: usize, title: &str) -> Option<usize> {
    if title.is_empty() {
        return None;
    }
    if let Some(pos) = text[from..].find(title) {
        return Some(from + pos);
    }
    normalized_line_match(text, from, title)
}

/// Fallback match: a line whose normalized form equals the normalized
/// title. Tolerates collapsed whitespace, stray punctuation, and heading
/// markers that conversion may have altered.
fn normalized_line_match(text: &str, from: usize, title: &str) -> Option<usize> {
    let wanted = normalize_title(title);
    if wanted.is_empty() {
        return None;
    }
    let mut offset = from;
    for line in text[from..].split('\n') {
        if normalize_title(line) == wanted {
            let lead = line.len() - line.trim_start().len();
            return Some(offset + lead);
        }
        offset += line.len() + 1;
    }
    None
}

/// Builds contiguous segments from located anchors. Front matter before the
/// first anchor becomes a synthetic segment (or is dropped when
/// whitespace-only); trailing text is folded into the last segment by
/// ending it at the document end.
fn segments_from_anchors(text: &str, located: &[LocatedEntry<'_>]) -> Vec<ChapterSegment> {
    let mut segments = Vec::new();

    if let Some(first) = located.first() {
        let front = &text[..first.offset];
        if !front.trim().is_empty() {
            segments.push(ChapterSegment {
                title: "Front Matter".to_string(),
                order: 0,
                text: front.to_string(),
                start_offset: 0,
                end_offset: first.offset,
                source: SegmentSource::TocDerived,
            });
        } else if !front.is_empty() {
            debug!(chars = front.len(), "dropping whitespace-only front matter");
        }
    }

    for (idx, loc) in located.iter().enumerate() {
        let end = located
            .get(idx + 1)
            .map(|next| next.offset)
            .unwrap_or(text.len());
        let order = segments.len();
        segments.push(ChapterSegment {
            title: loc.entry.title.clone(),
            order,
            text: text[loc.offset..end].to_string(),
            start_offset: loc.offset,
            end_offset: end,
            source: SegmentSource::TocDerived,
        });
    }
    segments
}

/// Content-heuristic fallback: fixed-size windows that never cut inside a
/// paragraph, covering the whole text with no gaps.
fn fallback_split(text: &str, config: &SplitConfig) -> Vec<ChapterSegment> {
    let window = config.fallback_window_chars.max(1);
    let mut segments = Vec::new();
    let mut start = 0;

    while start < text.len() || segments.is_empty() {
        let mut end = ceil_char_boundary(text, (start + window).min(text.len()));
        if end < text.len() {
            // Extend to the next paragraph break when one is close enough.
            if let Some(para) = text[end..].find("\n\n") {
                if para <= config.fallback_max_drift {
                    end = end + para + 2;
                }
            } else {
                end = text.len();
            }
        }
        let order = segments.len();
        segments.push(ChapterSegment {
            title: format!("Part {}", order + 1),
            order,
            text: text[start..end].to_string(),
            start_offset: start,
            end_offset: end,
            source: SegmentSource::FallbackHeuristic,
        });
        if end == start {
            break;
        }
        start = end;
    }
    segments
}

/// Smallest char boundary at or after `index`.
fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index.min(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toc::TocEntry;

    fn entry(title: &str, order: usize) -> TocEntry {
        TocEntry {
            title: title.to_string(),
            level: 1,
            order,
            anchor: None,
        }
    }

    fn reassemble(segments: &[ChapterSegment]) -> String {
        segments.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn two_titles_split_at_second_title() {
        let text = "Intro\nintro body.\nChapter 1\nchapter body.\n";
        let toc = vec![entry("Intro", 0), entry("Chapter 1", 1)];
        let segments = split(text, &toc, &SplitConfig::default());

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].title, "Intro");
        let chapter_start = text.find("Chapter 1").unwrap();
        assert_eq!(segments[0].end_offset, chapter_start);
        assert_eq!(segments[1].start_offset, chapter_start);
        assert_eq!(segments[1].end_offset, text.len());
        assert!(segments.iter().all(|s| s.source == SegmentSource::TocDerived));
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn normalized_match_locates_reformatted_title() {
        let text = "Chapter  1:  Start\nbody one.\nChapter   2\nbody two.\n";
        let toc = vec![entry("Chapter 1: Start", 0), entry("Chapter 2", 1)];
        let segments = split(text, &toc, &SplitConfig::default());

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].title, "Chapter 2");
        assert_eq!(segments[1].source, SegmentSource::TocDerived);
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn unlocatable_minority_is_dropped_as_gap() {
        let text = "Alpha\na body.\nBeta\nb body.\nGamma\nг body.\n";
        let toc = vec![
            entry("Alpha", 0),
            entry("Missing Chapter", 1),
            entry("Beta", 2),
            entry("Gamma", 3),
        ];
        let segments = split(text, &toc, &SplitConfig::default());
        let titles: Vec<&str> = segments.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Beta", "Gamma"]);
        assert_eq!(segments[2].order, 2);
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn too_many_gaps_trigger_fallback() {
        let text = "one paragraph.\n\nanother paragraph.\n";
        let toc = vec![entry("Nope", 0), entry("Also Nope", 1), entry("one paragraph.", 2)];
        let segments = split(text, &toc, &SplitConfig::default());
        assert!(!segments.is_empty());
        assert!(
            segments
                .iter()
                .all(|s| s.source == SegmentSource::FallbackHeuristic)
        );
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn empty_toc_fallback_covers_everything() {
        let text = "para one.\n\npara two.\n\npara three.\n";
        let config = SplitConfig::default()
            .with_fallback_window_chars(12)
            .with_fallback_max_drift(30);
        let segments = split(text, &[], &config);

        assert!(segments.len() > 1);
        assert_eq!(segments[0].start_offset, 0);
        assert_eq!(segments.last().unwrap().end_offset, text.len());
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(reassemble(&segments), text);
        // Windows end on paragraph boundaries, not mid-paragraph.
        assert!(segments[0].text.ends_with("\n\n"));
    }

    #[test]
    fn front_matter_becomes_synthetic_segment() {
        let text = "This preface has no toc entry.\n\nChapter 1\nbody.\nChapter 2\nbody.\n";
        let toc = vec![entry("Chapter 1", 0), entry("Chapter 2", 1)];
        let segments = split(text, &toc, &SplitConfig::default());

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].title, "Front Matter");
        assert_eq!(segments[0].order, 0);
        assert_eq!(segments[1].order, 1);
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn whitespace_front_matter_is_dropped() {
        let text = "\n\n  \nChapter 1\nbody.\nChapter 2\nbody.\n";
        let toc = vec![entry("Chapter 1", 0), entry("Chapter 2", 1)];
        let segments = split(text, &toc, &SplitConfig::default());

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].title, "Chapter 1");
        // Round trip modulo the dropped whitespace prefix.
        assert_eq!(reassemble(&segments), text.trim_start_matches(['\n', ' ']));
    }

    #[test]
    fn repeated_titles_match_left_to_right() {
        let text = "Recap\nearly mention of Final Thoughts here.\nFinal Thoughts\nreal chapter.\n";
        let toc = vec![entry("Recap", 0), entry("Final Thoughts", 1)];
        let segments = split(text, &toc, &SplitConfig::default());

        assert_eq!(segments.len(), 2);
        // The second entry matches the first occurrence after "Recap", which
        // is the inline mention; monotonic search guarantees order, not
        // semantic precision.
        assert!(segments[1].start_offset > segments[0].start_offset);
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn offset_anchor_starts_segment_at_heading_line() {
        let text = "# One\n\nbody a\n\n# Two\n\nbody b\n";
        let toc = vec![
            TocEntry {
                title: "One".into(),
                level: 1,
                order: 0,
                anchor: Some(TocAnchor::Offset(0)),
            },
            TocEntry {
                title: "Two".into(),
                level: 1,
                order: 1,
                anchor: Some(TocAnchor::Offset(text.find("# Two").unwrap())),
            },
        ];
        let segments = split(text, &toc, &SplitConfig::default());

        assert_eq!(segments.len(), 2);
        assert!(segments[0].text.starts_with("# One"));
        assert!(segments[1].text.starts_with("# Two"));
        assert_eq!(reassemble(&segments), text);
    }

    #[test]
    fn empty_document_with_empty_toc_yields_single_empty_segment() {
        let segments = split("", &[], &SplitConfig::default());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "");
        assert_eq!(segments[0].source, SegmentSource::FallbackHeuristic);
    }
}
