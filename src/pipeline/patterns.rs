//! Phrase tables used to classify model output.
//!
//! Every "does this text look like X" decision in the pipeline is a lookup in
//! one of these tables rather than an inline conditional, so new phrases can
//! be added (and tested) without touching control flow:
//!
//! | Table | Used by | Match |
//! |-------|---------|-------|
//! | [`PhraseTable::ocr_failures`] | transcription | substring |
//! | [`PhraseTable::refusals`] | synthesis | substring in the opening window |
//! | [`PhraseTable::boilerplate`] | filter | prefix |
//! | [`PhraseTable::quota_errors`] / [`PhraseTable::rate_limit_errors`] | error classification | substring |
//!
//! All matching is case-insensitive. Typographic apostrophes are folded to
//! ASCII so `I’m sorry` and `I'm sorry` hit the same entry.

use serde::{Deserialize, Serialize};

/// Default OCR failure phrases. A transcript containing any of these is the
/// model describing a failure, not the page.
pub const OCR_FAILURE_PHRASES: &[&str] = &[
    "unable to extract text",
    "unable to transcribe",
    "unable to read the",
    "image is unclear",
    "image is too blurry",
    "image is blurry",
    "no text found",
    "no readable text",
    "no legible text",
    "cannot read the text",
    "can't read the text",
    "there is no text",
];

/// Default refusal phrases for synthesis replies.
pub const REFUSAL_PHRASES: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "i cannot assist",
    "i can't assist",
    "i cannot help with",
    "i can't help with",
    "i'm unable to",
    "i am unable to",
    "as an ai",
];

/// Default generic-boilerplate front prefixes.
pub const BOILERPLATE_PREFIXES: &[&str] = &[
    "what is key point",
    "what is the key point",
    "key concept",
    "key point",
];

const QUOTA_PHRASES: &[&str] = &[
    "insufficient_quota",
    "exceeded your current quota",
    "quota exceeded",
    "billing hard limit",
];

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
];

/// A case-insensitive list of phrases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseTable {
    phrases: Vec<String>,
}

impl PhraseTable {
    /// Build a table from arbitrary phrases. Blank entries are ignored.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| fold(p.as_ref().trim()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn ocr_failures() -> Self {
        Self::new(OCR_FAILURE_PHRASES)
    }

    pub fn refusals() -> Self {
        Self::new(REFUSAL_PHRASES)
    }

    pub fn boilerplate() -> Self {
        Self::new(BOILERPLATE_PREFIXES)
    }

    pub fn quota_errors() -> Self {
        Self::new(QUOTA_PHRASES)
    }

    pub fn rate_limit_errors() -> Self {
        Self::new(RATE_LIMIT_PHRASES)
    }

    /// Return a copy with one more phrase.
    pub fn with_phrase(mut self, phrase: impl AsRef<str>) -> Self {
        let p = fold(phrase.as_ref().trim());
        if !p.is_empty() && !self.phrases.contains(&p) {
            self.phrases.push(p);
        }
        self
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// First phrase occurring anywhere in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        let haystack = fold(text);
        self.phrases
            .iter()
            .find(|p| haystack.contains(p.as_str()))
            .map(String::as_str)
    }

    /// First phrase occurring within the first `window` characters of `text`
    /// (after leading whitespace).
    pub fn find_within(&self, text: &str, window: usize) -> Option<&str> {
        let head: String = text.trim_start().chars().take(window).collect();
        self.find(&head)
    }

    /// First phrase that `text` starts with (after leading whitespace).
    pub fn find_prefix(&self, text: &str) -> Option<&str> {
        let haystack = fold(text.trim_start());
        self.phrases
            .iter()
            .find(|p| haystack.starts_with(p.as_str()))
            .map(String::as_str)
    }
}

/// Every table the pipeline consults, bundled for configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternTables {
    pub ocr_failures: PhraseTable,
    pub refusals: PhraseTable,
    pub boilerplate: PhraseTable,
    pub quota_errors: PhraseTable,
    pub rate_limit_errors: PhraseTable,
}

impl Default for PatternTables {
    fn default() -> Self {
        Self {
            ocr_failures: PhraseTable::ocr_failures(),
            refusals: PhraseTable::refusals(),
            boilerplate: PhraseTable::boilerplate(),
            quota_errors: PhraseTable::quota_errors(),
            rate_limit_errors: PhraseTable::rate_limit_errors(),
        }
    }
}

/// Lowercase and fold typographic apostrophes.
fn fold(s: &str) -> String {
    s.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}
