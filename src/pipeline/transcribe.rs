//! Transcription stage: one photographed page → plain text.
//!
//! Each page gets up to `max_ocr_retries` sequential attempts. A reply is
//! kept only if, after cleanup, it is longer than
//! `min_transcript_chars` and does not contain an OCR failure phrase; anything
//! else is discarded and the page is tried again. A page that exhausts its
//! attempts contributes nothing, and never aborts its siblings.
//!
//! The one exception is a fatal provider error (throttling or exhausted
//! quota): the page stops retrying immediately and the error is carried in
//! its [`PageOutcome`] for the orchestrator to surface once the batch is done.

use crate::client::{ModelClient, ModelRequest};
use crate::config::GenerationConfig;
use crate::error::ModelError;
use crate::output::PageTranscript;
use crate::pipeline::patterns::PhraseTable;
use crate::pipeline::postprocess::clean_transcript;
use crate::prompts::{DEFAULT_OCR_PROMPT, OCR_USER_PROMPT};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Classification of one transcription reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptVerdict {
    /// Usable page text.
    Meaningful(String),
    /// Nothing left after cleanup.
    Empty,
    /// Too short to be a page of notes.
    TooShort { chars: usize },
    /// The model described a failure instead of transcribing.
    FailurePhrase(String),
}

impl TranscriptVerdict {
    pub fn is_meaningful(&self) -> bool {
        matches!(self, TranscriptVerdict::Meaningful(_))
    }

    fn describe(&self) -> String {
        match self {
            TranscriptVerdict::Meaningful(_) => "meaningful".to_string(),
            TranscriptVerdict::Empty => "empty reply".to_string(),
            TranscriptVerdict::TooShort { chars } => format!("only {chars} characters"),
            TranscriptVerdict::FailurePhrase(p) => format!("failure phrase '{p}'"),
        }
    }
}

/// Classify a raw reply.
pub fn classify_transcript(
    raw: &str,
    min_chars: usize,
    failures: &PhraseTable,
) -> TranscriptVerdict {
    let text = clean_transcript(raw);
    if text.is_empty() {
        return TranscriptVerdict::Empty;
    }
    let chars = text.chars().count();
    if chars <= min_chars {
        return TranscriptVerdict::TooShort { chars };
    }
    if let Some(phrase) = failures.find(&text) {
        return TranscriptVerdict::FailurePhrase(phrase.to_string());
    }
    TranscriptVerdict::Meaningful(text)
}

/// What happened to one page.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    /// 1-indexed page number.
    pub page_num: usize,
    /// The meaningful transcript, if any attempt produced one.
    pub text: Option<String>,
    /// Model calls made for this page.
    pub attempts: u32,
    /// The last call error, if the last attempt errored.
    pub last_error: Option<ModelError>,
    /// `true` if the model answered at least once, whatever it said.
    pub replied: bool,
}

impl PageOutcome {
    /// The fatal provider error that stopped this page, if any.
    pub fn fatal_error(&self) -> Option<&ModelError> {
        self.last_error.as_ref().filter(|e| e.is_fatal())
    }

    pub fn into_transcript(self) -> Option<PageTranscript> {
        let page_num = self.page_num;
        self.text.map(|text| PageTranscript { page_num, text })
    }
}

/// Transcribe one page with bounded retries.
pub async fn transcribe_page(
    client: &dyn ModelClient,
    page_num: usize,
    image_ref: &str,
    config: &GenerationConfig,
) -> PageOutcome {
    let system = config.ocr_prompt.as_deref().unwrap_or(DEFAULT_OCR_PROMPT);
    let request = ModelRequest::new(system, OCR_USER_PROMPT)
        .with_image(image_ref)
        .with_temperature(config.ocr_temperature)
        .with_max_tokens(config.ocr_max_tokens);

    let mut outcome = PageOutcome {
        page_num,
        text: None,
        attempts: 0,
        last_error: None,
        replied: false,
    };

    for attempt in 0..config.max_ocr_retries {
        if attempt > 0 {
            let backoff = config.backoff_ms(attempt);
            debug!(
                "Page {}: retry {}/{} after {}ms",
                page_num,
                attempt + 1,
                config.max_ocr_retries,
                backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        outcome.attempts += 1;

        match client.complete(&request).await {
            Ok(reply) => {
                outcome.replied = true;
                outcome.last_error = None;
                let verdict = classify_transcript(
                    &reply.content,
                    config.thresholds.min_transcript_chars,
                    &config.patterns.ocr_failures,
                );
                debug!(
                    "Page {}: attempt {} → {} ({} output tokens)",
                    page_num,
                    attempt + 1,
                    verdict.describe(),
                    reply.output_tokens
                );
                if let TranscriptVerdict::Meaningful(text) = verdict {
                    outcome.text = Some(text);
                    return outcome;
                }
                warn!(
                    "Page {}: discarding attempt {}: {}",
                    page_num,
                    attempt + 1,
                    verdict.describe()
                );
            }
            Err(e) => {
                warn!("Page {}: attempt {} failed: {}", page_num, attempt + 1, e);
                let fatal = e.is_fatal();
                outcome.last_error = Some(e);
                if fatal {
                    break;
                }
            }
        }
    }

    outcome
}

/// Transcribe every image with bounded concurrency. Outcomes come back in
/// page order whatever order the calls complete in.
pub async fn transcribe_all(
    client: &Arc<dyn ModelClient>,
    image_refs: &[String],
    config: &GenerationConfig,
) -> Vec<PageOutcome> {
    let total_pages = image_refs.len();
    let mut outcomes: Vec<PageOutcome> =
        stream::iter(image_refs.iter().enumerate().map(|(idx, image_ref)| {
            let client = Arc::clone(client);
            let page_num = idx + 1;
            async move {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_start(page_num, total_pages);
                }
                let outcome = transcribe_page(client.as_ref(), page_num, image_ref, config).await;
                if let Some(ref cb) = config.progress_callback {
                    match &outcome.text {
                        Some(text) => {
                            cb.on_page_complete(page_num, total_pages, text.chars().count())
                        }
                        None => cb.on_page_dropped(page_num, total_pages, &drop_reason(&outcome)),
                    }
                }
                outcome
            }
        }))
        .buffer_unordered(config.concurrency)
        .collect()
        .await;

    outcomes.sort_by_key(|o| o.page_num);

    let kept = outcomes.iter().filter(|o| o.text.is_some()).count();
    info!("Transcribed {}/{} pages", kept, total_pages);
    outcomes
}

fn drop_reason(outcome: &PageOutcome) -> String {
    match &outcome.last_error {
        Some(e) => e.to_string(),
        None => format!("no legible text after {} attempt(s)", outcome.attempts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ModelReply;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replies from a queue, one per call.
    struct Scripted(Mutex<VecDeque<Result<ModelReply, ModelError>>>);

    impl Scripted {
        fn new(replies: Vec<Result<&str, ModelError>>) -> Self {
            Self(Mutex::new(
                replies
                    .into_iter()
                    .map(|r| r.map(ModelReply::text))
                    .collect(),
            ))
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, ModelError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelReply::text("")))
        }
    }

    /// Echoes the image reference back, after a delay that shrinks with the
    /// page so later pages finish first.
    struct EchoImage;

    #[async_trait]
    impl ModelClient for EchoImage {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
            let r = request.images[0].clone();
            let n: u64 = r.trim_start_matches("page-").parse().unwrap_or(0);
            sleep(Duration::from_millis(40u64.saturating_sub(n * 10))).await;
            Ok(ModelReply::text(format!("notes transcribed from image {r}")))
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig::builder().retry_backoff_ms(0).build().unwrap()
    }

    const PAGE: &str = "Mitochondria produce ATP through cellular respiration.";

    #[test]
    fn classify_verdicts() {
        let t = PhraseTable::ocr_failures();
        assert_eq!(classify_transcript("   \n ", 20, &t), TranscriptVerdict::Empty);
        assert_eq!(
            classify_transcript("short text", 20, &t),
            TranscriptVerdict::TooShort { chars: 10 }
        );
        assert_eq!(
            classify_transcript("I'm afraid the image is unclear to me.", 20, &t),
            TranscriptVerdict::FailurePhrase("image is unclear".into())
        );
        assert!(classify_transcript(PAGE, 20, &t).is_meaningful());
    }

    #[test]
    fn exactly_min_chars_is_not_meaningful() {
        let t = PhraseTable::ocr_failures();
        let twenty = "a".repeat(20);
        assert!(!classify_transcript(&twenty, 20, &t).is_meaningful());
        assert!(classify_transcript(&format!("{twenty}b"), 20, &t).is_meaningful());
    }

    #[test]
    fn classify_strips_fences() {
        let t = PhraseTable::ocr_failures();
        let v = classify_transcript(&format!("```\n{PAGE}\n```"), 20, &t);
        assert_eq!(v, TranscriptVerdict::Meaningful(PAGE.to_string()));
    }

    #[tokio::test]
    async fn retries_after_failure_phrase() {
        let client = Scripted::new(vec![Ok("No text found in this image."), Ok(PAGE)]);
        let out = transcribe_page(&client, 1, "p1.jpg", &config()).await;
        assert_eq!(out.text.as_deref(), Some(PAGE));
        assert_eq!(out.attempts, 2);
        assert!(out.replied);
    }

    #[tokio::test]
    async fn page_dropped_after_exhaustion() {
        let client = Scripted::new(vec![
            Err(ModelError::Provider {
                message: "502 Bad Gateway".into(),
            }),
            Ok("too short"),
        ]);
        let out = transcribe_page(&client, 3, "p3.jpg", &config()).await;
        assert!(out.text.is_none());
        assert_eq!(out.attempts, 2);
        assert!(out.replied);
        assert!(out.last_error.is_none());
        assert!(out.into_transcript().is_none());
    }

    #[tokio::test]
    async fn fatal_error_stops_retrying() {
        let client = Scripted::new(vec![
            Err(ModelError::RateLimited {
                message: "429".into(),
            }),
            Ok(PAGE),
        ]);
        let out = transcribe_page(&client, 1, "p1.jpg", &config()).await;
        assert_eq!(out.attempts, 1);
        assert!(out.fatal_error().is_some());
        assert!(!out.replied);
    }

    #[tokio::test]
    async fn transcribe_all_preserves_page_order() {
        let client: Arc<dyn ModelClient> = Arc::new(EchoImage);
        let refs: Vec<String> = (1..=4).map(|i| format!("page-{i}")).collect();
        let outcomes = transcribe_all(&client, &refs, &config()).await;
        let pages: Vec<usize> = outcomes.iter().map(|o| o.page_num).collect();
        assert_eq!(pages, vec![1, 2, 3, 4]);
        assert!(outcomes[2].text.as_deref().unwrap().ends_with("page-3"));
    }
}
