//! Fallback generator: deterministic, model-free cards from the transcript.
//!
//! Used only when both model strategies failed their quality gate. Each
//! card pairs a fixed diagnostic question with one fragment of the raw
//! notes, so the student still gets their own material back and a prompt to
//! retry with a better photo. After filtering, identical fronts collapse to
//! a single card.

use crate::config::QualityThresholds;
use crate::output::{Flashcard, GenerationResult, DEFAULT_TOPIC};
use crate::pipeline::aggregate::is_page_marker;
use crate::pipeline::filter::{normalize_and_filter, FilterRules};
use crate::pipeline::patterns::PhraseTable;
use once_cell::sync::Lazy;
use regex::Regex;

/// Front of every fallback card.
pub const FALLBACK_FRONT: &str = "Transcription unclear: can you re-upload a clearer image?";

static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s+").unwrap());

/// Split on line breaks and after sentence-ending punctuation. Page marker
/// lines are skipped.
pub fn split_fragments(document: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    for line in document.lines() {
        if is_page_marker(line) {
            continue;
        }
        let mut start = 0;
        for m in RE_SENTENCE_END.find_iter(line) {
            // Keep the punctuation, drop the whitespace.
            let end = m.start() + 1;
            fragments.push(line[start..end].trim().to_string());
            start = m.end();
        }
        fragments.push(line[start..].trim().to_string());
    }
    fragments.retain(|f| !f.is_empty());
    fragments
}

/// Build the candidate cards (before filtering).
pub fn fallback_candidates(document: &str, thresholds: &QualityThresholds) -> Vec<Flashcard> {
    split_fragments(document)
        .into_iter()
        .filter(|f| f.chars().count() > thresholds.min_fallback_fragment_chars)
        .take(thresholds.max_fallback_cards)
        .map(|f| Flashcard::new(FALLBACK_FRONT, f))
        .collect()
}

/// Run the fallback and the filter. The deck may be empty.
pub fn fallback_cards(
    document: &str,
    thresholds: &QualityThresholds,
    boilerplate: &PhraseTable,
) -> GenerationResult {
    let flashcards = normalize_and_filter(
        fallback_candidates(document, thresholds),
        FilterRules {
            min_field_chars: thresholds.min_card_field_chars,
            boilerplate,
        },
    );
    GenerationResult {
        topic: DEFAULT_TOPIC.to_string(),
        flashcards,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "--- PAGE 1 START ---\n\
        Photosynthesis converts light energy into chemical energy. It happens in chloroplasts!\n\
        Short line.\n\
        --- PAGE 1 END ---\n\n\
        --- PAGE 2 START ---\n\
        The Calvin cycle fixes carbon dioxide into sugars\n\
        --- PAGE 2 END ---";

    #[test]
    fn splits_on_lines_and_sentences() {
        let f = split_fragments(DOC);
        assert_eq!(
            f,
            vec![
                "Photosynthesis converts light energy into chemical energy.",
                "It happens in chloroplasts!",
                "Short line.",
                "The Calvin cycle fixes carbon dioxide into sugars",
            ]
        );
    }

    #[test]
    fn keeps_long_fragments_only() {
        let cards = fallback_candidates(DOC, &QualityThresholds::default());
        let backs: Vec<&str> = cards.iter().map(|c| c.back.as_str()).collect();
        assert_eq!(
            backs,
            vec![
                "Photosynthesis converts light energy into chemical energy.",
                "It happens in chloroplasts!",
                "The Calvin cycle fixes carbon dioxide into sugars",
            ]
        );
        assert!(cards.iter().all(|c| c.front == FALLBACK_FRONT));
    }

    #[test]
    fn takes_at_most_max_fragments() {
        let doc = (0..20)
            .map(|i| format!("Fragment number {i} has plenty of characters."))
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(fallback_candidates(&doc, &QualityThresholds::default()).len(), 8);
    }

    #[test]
    fn filtered_fallback_collapses_to_one_card() {
        let result = fallback_cards(DOC, &QualityThresholds::default(), &PhraseTable::boilerplate());
        assert_eq!(result.topic, "Study Notes");
        assert_eq!(result.flashcards.len(), 1);
        assert_eq!(result.flashcards[0].front, FALLBACK_FRONT);
        assert_eq!(
            result.flashcards[0].back,
            "Photosynthesis converts light energy into chemical energy."
        );
    }

    #[test]
    fn nothing_long_enough_yields_empty_deck() {
        let result = fallback_cards("a b c.\nd e f.", &QualityThresholds::default(), &PhraseTable::boilerplate());
        assert!(result.flashcards.is_empty());
    }
}
