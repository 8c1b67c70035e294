//! Generation entry points: the orchestrator.
//!
//! [`generate`] sequences the whole run for one session:
//!
//! ```text
//! resolve client ─▶ begin_generation ─▶ transcribe ×N ─▶ aggregate ─▶ synthesize
//!                      (generating)                                      │
//!                                          commit_success ◀── Ok ────────┤
//!                                          commit_failure ◀── Err/panic ─┘
//! ```
//!
//! Preconditions (`Unauthenticated`, `NotFound`, `NoImages`, an unresolvable
//! provider) fail before anything is written. Once the session is
//! `generating`, every exit path writes exactly one terminal status, and a
//! panic anywhere in the pipeline is caught and committed as `error`.

use crate::client::{resolve_client, ModelClient};
use crate::config::GenerationConfig;
use crate::error::GenerateError;
use crate::output::{GenerationResult, PageTranscript};
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::synthesize::synthesize;
use crate::pipeline::transcribe::{transcribe_all, PageOutcome};
use crate::session::{begin_generation, commit_failure, commit_success, Session};
use crate::store::SessionStore;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Generate flashcards for a session.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// The committed deck. The session is `completed` and holds the same topic
/// and cards.
///
/// # Errors
/// Precondition errors leave the session untouched. Every other error is
/// returned after the session has been moved to `error`.
pub async fn generate(
    store: &dyn SessionStore,
    session_id: &str,
    user_id: &str,
    config: &GenerationConfig,
) -> Result<GenerationResult, GenerateError> {
    run(store, session_id, user_id, None, config).await
}

/// Synchronous wrapper around [`generate`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_sync(
    store: &dyn SessionStore,
    session_id: &str,
    user_id: &str,
    config: &GenerationConfig,
) -> Result<GenerationResult, GenerateError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| GenerateError::GenerationFailed {
            detail: format!("failed to create tokio runtime: {e}"),
        })?
        .block_on(generate(store, session_id, user_id, config))
}

/// A store and a configuration bound together, for callers that generate
/// for many sessions.
#[derive(Clone)]
pub struct FlashcardGenerator {
    store: Arc<dyn SessionStore>,
    config: GenerationConfig,
    title: Option<String>,
}

impl FlashcardGenerator {
    pub fn new(store: Arc<dyn SessionStore>, config: GenerationConfig) -> Self {
        Self {
            store,
            config,
            title: None,
        }
    }

    /// Commit this title instead of one derived from the topic.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// See [`generate`].
    pub async fn generate(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<GenerationResult, GenerateError> {
        run(
            self.store.as_ref(),
            session_id,
            user_id,
            self.title.as_deref(),
            &self.config,
        )
        .await
    }
}

async fn run(
    store: &dyn SessionStore,
    session_id: &str,
    user_id: &str,
    title: Option<&str>,
    config: &GenerationConfig,
) -> Result<GenerationResult, GenerateError> {
    let result = run_session(store, session_id, user_id, title, config).await;
    if let (Err(e), Some(cb)) = (&result, &config.progress_callback) {
        cb.on_generation_failed(e.code(), &e.to_string());
    }
    result
}

async fn run_session(
    store: &dyn SessionStore,
    session_id: &str,
    user_id: &str,
    title: Option<&str>,
    config: &GenerationConfig,
) -> Result<GenerationResult, GenerateError> {
    let start = Instant::now();
    if user_id.trim().is_empty() {
        return Err(GenerateError::Unauthenticated);
    }
    info!("Starting generation: session {}", session_id);

    // ── Step 1: Resolve the model client (no writes yet) ─────────────────
    let client = resolve_client(config)?;

    // ── Step 2: Enter `generating` ───────────────────────────────────────
    let session = begin_generation(store, session_id, user_id).await?;
    if let Some(ref cb) = config.progress_callback {
        cb.on_generation_start(session.image_urls.len());
    }

    // ── Step 3: Run the pipeline, catching panics ────────────────────────
    let outcome = AssertUnwindSafe(run_pipeline(&client, &session, config))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let detail = format!("pipeline panicked: {}", panic_message(panic.as_ref()));
            error!("Session {}: {}", session.id, detail);
            Err(GenerateError::GenerationFailed { detail })
        });

    // ── Step 4: Commit exactly one terminal status ───────────────────────
    match outcome {
        Ok(result) => match commit_success(store, &session, &result, title).await {
            Ok(()) => {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_generation_complete(result.flashcards.len());
                }
                info!(
                    "Generation complete: session {}, {} card(s), {}ms",
                    session.id,
                    result.flashcards.len(),
                    start.elapsed().as_millis()
                );
                Ok(result)
            }
            Err(e) => {
                error!("Session {}: committing the deck failed: {}", session.id, e);
                mark_failed(store, &session).await;
                Err(e)
            }
        },
        Err(e) => {
            warn!("Session {}: generation failed [{}]: {}", session.id, e.code(), e);
            mark_failed(store, &session).await;
            Err(e)
        }
    }
}

async fn run_pipeline(
    client: &Arc<dyn ModelClient>,
    session: &Session,
    config: &GenerationConfig,
) -> Result<GenerationResult, GenerateError> {
    let outcomes = transcribe_all(client, &session.image_urls, config).await;

    if let Some(fatal) = outcomes.iter().find_map(PageOutcome::fatal_error) {
        return Err(fatal.clone().into());
    }

    let transcripts: Vec<PageTranscript> = outcomes
        .iter()
        .cloned()
        .filter_map(PageOutcome::into_transcript)
        .collect();

    let document = aggregate(&transcripts, &config.thresholds)
        .ok_or_else(|| transcription_failure(&outcomes))?;
    info!(
        "Aggregated {} page(s), {} characters",
        document.page_count, document.content_chars
    );

    let (result, _strategy) = synthesize(client.as_ref(), &document, config).await?;
    Ok(result)
}

/// The error for a run where no page produced text. Per-page provider
/// failures count as exhausted pages; the last one is only logged.
fn transcription_failure(outcomes: &[PageOutcome]) -> GenerateError {
    let never_replied = outcomes.iter().all(|o| !o.replied);
    if let Some(last) = outcomes
        .iter()
        .rev()
        .filter_map(|o| o.last_error.as_ref())
        .find(|e| e.is_provider_side())
    {
        if never_replied {
            warn!("No page got a model reply; last provider error: {}", last);
        } else {
            debug!("Last provider error during transcription: {}", last);
        }
    }
    GenerateError::OcrFailed {
        pages: outcomes.len(),
    }
}

async fn mark_failed(store: &dyn SessionStore, session: &Session) {
    if let Err(e) = commit_failure(store, session).await {
        error!(
            "Session {}: could not record the error status: {}",
            session.id, e
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
