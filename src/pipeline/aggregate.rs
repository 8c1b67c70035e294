//! Aggregator: page transcripts → one bounded document.
//!
//! Each meaningful transcript is wrapped in numbered start/end markers so the
//! synthesis model can tell pages apart, and pages appear in their original
//! order. The whole document is then cut at the tail to the character budget.

use crate::config::QualityThresholds;
use crate::output::PageTranscript;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--- PAGE \d+ (START|END) ---$").unwrap());

pub fn page_start_marker(page_num: usize) -> String {
    format!("--- PAGE {page_num} START ---")
}

pub fn page_end_marker(page_num: usize) -> String {
    format!("--- PAGE {page_num} END ---")
}

/// `true` for a line that is a page marker and nothing else.
pub fn is_page_marker(line: &str) -> bool {
    RE_PAGE_MARKER.is_match(line.trim())
}

/// The document handed to synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedDocument {
    /// Marked-up, truncated text.
    pub text: String,
    /// Pages that contributed.
    pub page_count: usize,
    /// Characters of transcript content, excluding markers.
    pub content_chars: usize,
}

/// Join the transcripts, or `None` when there is nothing meaningful to
/// synthesise from.
pub fn aggregate(
    pages: &[PageTranscript],
    thresholds: &QualityThresholds,
) -> Option<AggregatedDocument> {
    let mut sorted: Vec<&PageTranscript> = pages
        .iter()
        .filter(|p| !p.text.trim().is_empty())
        .collect();
    sorted.sort_by_key(|p| p.page_num);

    let content_chars: usize = sorted.iter().map(|p| p.text.trim().chars().count()).sum();
    if content_chars <= thresholds.min_transcript_chars {
        return None;
    }

    let text = sorted
        .iter()
        .map(|p| {
            format!(
                "{}\n{}\n{}",
                page_start_marker(p.page_num),
                p.text.trim(),
                page_end_marker(p.page_num)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    Some(AggregatedDocument {
        text: truncate_chars(&text, thresholds.max_document_chars),
        page_count: sorted.len(),
        content_chars,
    })
}

/// Keep the first `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
