//! Pipeline stages for notes-to-flashcards generation.
//!
//! Each submodule implements exactly one step, so each is testable against
//! a scripted [`crate::client::ModelClient`] without a network.
//!
//! ## Data Flow
//!
//! ```text
//! image refs ──▶ transcribe ──▶ aggregate ──▶ synthesize ──▶ filter
//!  (per page)     (VLM, ×N)     (markers)     (ladder)      (rules)
//!                                                │
//!                                                └─▶ fallback (no model)
//! ```
//!
//! 1. [`transcribe`] — one model call per page with bounded retries;
//!    replies are classified against [`patterns`] after [`postprocess`]
//!    cleanup. Images reach the model through [`llm`], which loads them via
//!    [`input`] and shrinks them via [`encode`].
//! 2. [`aggregate`] — meaningful pages, in order, between page markers, cut
//!    to the character budget
//! 3. [`synthesize`] — Structured → JsonObject → Fallback, each rung gated
//!    on the number of cards that survive [`filter`]
//! 4. [`fallback`] — deterministic cards from transcript fragments

pub mod aggregate;
pub mod encode;
pub mod fallback;
pub mod filter;
pub mod input;
pub mod llm;
pub mod patterns;
pub mod postprocess;
pub mod synthesize;
pub mod transcribe;
