//! # cramfast
//!
//! Turn photographs of handwritten notes into study flashcards using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! A vision model asked for flashcards straight from a stack of photos will
//! happily skip pages, refuse, return half a JSON document, or pad the deck
//! with "What is key point 1?". This crate splits the job in two (transcribe
//! every page, then synthesise cards from the joined transcript), validates
//! every model reply against fixed content rules, and walks a ladder of
//! progressively less demanding strategies so a run almost always ends with a
//! usable deck, and always ends with a consistent session status.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Session (≤ 50 image refs)
//!  │
//!  ├─ 1. Begin       pending/error/completed → generating
//!  ├─ 2. Transcribe  concurrent VLM calls, 2 attempts per page
//!  ├─ 3. Aggregate   page markers, 12 000-char budget
//!  ├─ 4. Synthesize  Structured → JsonObject → Fallback, each gated
//!  ├─ 5. Filter      trim, length, '?', boilerplate, dedupe
//!  └─ 6. Commit      completed (topic + cards) or error
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cramfast::{generate, GenerationConfig, InMemorySessionStore, SessionStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemorySessionStore::new();
//!     let session = store.create_session("user-1", None).await?;
//!     store
//!         .append_images(&session.id, "user-1", vec!["notes/page1.jpg".into()])
//!         .await?;
//!
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = GenerationConfig::default();
//!     let deck = generate(&store, &session.id, "user-1", &config).await?;
//!     println!("{}", deck.to_markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `cramfast` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! cramfast = { version = "0.3", default-features = false }
//! ```
//!
//! ## Plugging In
//!
//! Storage and the model are traits. Implement [`SessionStore`] over your
//! database and pass it to [`generate`]; implement [`ModelClient`] (or hand
//! over any `edgequake-llm` provider) and set it on the
//! [`GenerationConfigBuilder`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod error;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{ModelClient, ModelReply, ModelRequest, ResponseFormat, StructuredSchema};
pub use config::{GenerationConfig, GenerationConfigBuilder, QualityThresholds};
pub use error::{GenerateError, ModelError, StoreError};
pub use generate::{generate, generate_sync, FlashcardGenerator};
pub use output::{write_markdown, Flashcard, GenerationResult, PageTranscript};
pub use pipeline::patterns::{PatternTables, PhraseTable};
pub use pipeline::synthesize::SynthesisStrategy;
pub use progress::{GenerationProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{Session, SessionStatus};
pub use store::{InMemorySessionStore, SessionStore, MAX_IMAGES_PER_SESSION};
