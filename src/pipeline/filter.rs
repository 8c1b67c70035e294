//! Normalizer/filter for candidate flashcards.
//!
//! Pure and total: any list of candidates maps to a list of accepted cards,
//! and running the filter on its own output changes nothing. Rules, in order:
//!
//! 1. trim front and back
//! 2. drop cards with a front or back shorter than the minimum
//! 3. drop fronts that are not questions (no trailing `?`)
//! 4. drop fronts starting with a boilerplate phrase
//! 5. drop repeated fronts (case-insensitive), keeping the first

use crate::output::Flashcard;
use crate::pipeline::patterns::PhraseTable;
use std::collections::HashSet;
use tracing::debug;

/// Parameters of the filter.
#[derive(Debug, Clone, Copy)]
pub struct FilterRules<'a> {
    pub min_field_chars: usize,
    pub boilerplate: &'a PhraseTable,
}

impl FilterRules<'_> {
    fn rejects(&self, card: &Flashcard) -> Option<&'static str> {
        if card.front.chars().count() < self.min_field_chars {
            Some("front too short")
        } else if card.back.chars().count() < self.min_field_chars {
            Some("back too short")
        } else if !card.front.ends_with('?') {
            Some("front is not a question")
        } else if self.boilerplate.find_prefix(&card.front).is_some() {
            Some("boilerplate front")
        } else {
            None
        }
    }
}

/// Apply the rules to `candidates`, preserving order.
pub fn normalize_and_filter<I>(candidates: I, rules: FilterRules<'_>) -> Vec<Flashcard>
where
    I: IntoIterator<Item = Flashcard>,
{
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();

    for candidate in candidates {
        let card = Flashcard::new(candidate.front.trim(), candidate.back.trim());
        if let Some(reason) = rules.rejects(&card) {
            debug!("Dropping card '{}': {}", card.front, reason);
            continue;
        }
        if !seen.insert(card.front.to_lowercase()) {
            debug!("Dropping duplicate card '{}'", card.front);
            continue;
        }
        accepted.push(card);
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(cards: Vec<Flashcard>) -> Vec<Flashcard> {
        let boilerplate = PhraseTable::boilerplate();
        normalize_and_filter(
            cards,
            FilterRules {
                min_field_chars: 12,
                boilerplate: &boilerplate,
            },
        )
    }

    fn card(front: &str, back: &str) -> Flashcard {
        Flashcard::new(front, back)
    }

    #[test]
    fn fields_are_trimmed() {
        let out = filter(vec![card("  What is osmosis?  ", "\tWater diffusion. \n")]);
        assert_eq!(out, vec![card("What is osmosis?", "Water diffusion.")]);
    }

    #[test]
    fn short_fields_and_statements_are_removed() {
        let out = filter(vec![
            card("Why so short?", "Too brief"),
            card("Define it?", "A long enough answer here."),
            card("Osmosis is the movement of water", "Across a membrane."),
            card("What drives osmosis?", "A difference in solute concentration."),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].front, "What drives osmosis?");
    }

    #[test]
    fn case_insensitive_duplicates_keep_the_first() {
        let out = filter(vec![
            card("What is osmosis?", "Passive diffusion of water."),
            card("what is osmosis?", "Something else entirely."),
        ]);
        assert_eq!(out, vec![card("What is osmosis?", "Passive diffusion of water.")]);
    }

    #[test]
    fn boilerplate_fronts_are_removed() {
        let out = filter(vec![
            card("What is key point 1?", "The first thing to remember."),
            card("Key concept of the lecture?", "Cells are the unit of life."),
            card("What is the key enzyme in glycolysis?", "Phosphofructokinase-1."),
        ]);
        assert_eq!(out.len(), 1);
        assert!(out[0].front.starts_with("What is the key enzyme"));
    }

    #[test]
    fn order_is_preserved() {
        let fronts = [
            "Where is DNA stored?",
            "What makes ATP in cells?",
            "Which organelle packages proteins?",
        ];
        let cards: Vec<_> = fronts
            .iter()
            .map(|f| card(f, "An answer that is long enough."))
            .collect();
        let out = filter(cards);
        let got: Vec<&str> = out.iter().map(|c| c.front.as_str()).collect();
        assert_eq!(got, fronts);
    }

    #[test]
    fn filter_is_idempotent() {
        let input = vec![
            card("  What is osmosis?", "Passive diffusion of water.  "),
            card("WHAT IS OSMOSIS?", "Duplicate."),
            card("Key concept?", "Generic boilerplate card."),
            card("Name the powerhouse of the cell?", "The mitochondrion."),
            card("No question mark here", "Some long enough answer."),
        ];
        let once = filter(input);
        let twice = filter(once.clone());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(filter(vec![]).is_empty());
    }
}
