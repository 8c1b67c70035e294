//! Error types for the cramfast library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`GenerateError`] — **Fatal**: the generation run cannot produce a deck
//!   (no images, nothing legible, provider throttled). Returned as
//!   `Err(GenerateError)` from [`crate::generate::generate`]. Every variant
//!   raised after the session entered `generating` is paired with an `error`
//!   status write, so the failure is also visible on reload.
//!
//! * [`ModelError`] — **Non-fatal**: a single model call failed (timeout,
//!   5xx, unreadable image). Recovered inside the stage that issued the call;
//!   it only escapes as a [`GenerateError`] once every attempt at that stage
//!   is exhausted.
//!
//! * [`StoreError`] — failures reported by a [`crate::store::SessionStore`].
//!
//! The stable [`GenerateError::code`] strings are what a UI should switch on;
//! the `Display` text is for humans and logs.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::pipeline::patterns::PatternTables;

/// All fatal errors returned by a generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    // ── Caller errors (raised before `generating`) ────────────────────────
    /// Missing or empty caller identity.
    #[error("Not authenticated: a user id is required")]
    Unauthenticated,

    /// The session does not exist or belongs to another user.
    #[error("Session '{session_id}' not found")]
    NotFound { session_id: String },

    /// Generation was requested for a session without any images.
    #[error("Session '{session_id}' has no images to transcribe")]
    NoImages { session_id: String },

    // ── Pipeline errors (session is moved to `error`) ─────────────────────
    /// No page produced meaningful text.
    #[error("No legible text could be extracted from {pages} image(s)\nTry a sharper, better-lit photo.")]
    OcrFailed { pages: usize },

    /// Both model paths and the fallback produced no usable flashcard.
    #[error("Flashcard generation failed: {detail}")]
    GenerationFailed { detail: String },

    /// Provider signalled throttling (HTTP 429 or equivalent).
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String },

    /// Provider signalled account or billing exhaustion.
    #[error("Provider quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// Any other provider-side failure.
    #[error("LLM provider error: {message}")]
    ProviderError { message: String },

    // ── Infrastructure errors ─────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The session store failed for a reason other than ownership.
    #[error("Session store error: {message}")]
    Storage { message: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GenerateError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            GenerateError::Unauthenticated => "UNAUTHENTICATED",
            GenerateError::NotFound { .. } => "SESSION_NOT_FOUND",
            GenerateError::NoImages { .. } => "NO_IMAGES",
            GenerateError::OcrFailed { .. } => "OCR_FAILED",
            GenerateError::GenerationFailed { .. } => "GENERATION_FAILED",
            GenerateError::RateLimited { .. } => "RATE_LIMITED",
            GenerateError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            GenerateError::ProviderError { .. } => "PROVIDER_ERROR",
            GenerateError::ProviderNotConfigured { .. } => "PROVIDER_NOT_CONFIGURED",
            GenerateError::Storage { .. } => "STORAGE_ERROR",
            GenerateError::InvalidConfig(_) => "INVALID_CONFIG",
        }
    }

    /// `true` for errors raised before the session entered `generating`.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            GenerateError::Unauthenticated
                | GenerateError::NotFound { .. }
                | GenerateError::NoImages { .. }
                | GenerateError::ProviderNotConfigured { .. }
                | GenerateError::InvalidConfig(_)
        )
    }
}

impl From<ModelError> for GenerateError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::RateLimited { message } => GenerateError::RateLimited { message },
            ModelError::QuotaExceeded { message } => GenerateError::QuotaExceeded { message },
            other => GenerateError::ProviderError {
                message: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for GenerateError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unauthenticated => GenerateError::Unauthenticated,
            StoreError::NotFound { session_id } => GenerateError::NotFound { session_id },
            other => GenerateError::Storage {
                message: other.to_string(),
            },
        }
    }
}

/// A non-fatal error for a single model call.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum ModelError {
    /// Provider throttled the request (HTTP 429).
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Provider refused service for billing reasons.
    #[error("quota exceeded: {message}")]
    QuotaExceeded { message: String },

    /// The call did not complete within the configured timeout.
    #[error("model call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The client has no schema-constrained output mode.
    #[error("structured output is not supported by this provider")]
    StructuredUnsupported,

    /// The image reference could not be loaded or encoded.
    #[error("image '{reference}' could not be loaded: {detail}")]
    Image { reference: String, detail: String },

    /// Any other provider failure.
    #[error("{message}")]
    Provider { message: String },
}

static RE_HTTP_429: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b429\b").unwrap());

impl ModelError {
    /// Classify a raw provider error message.
    ///
    /// Quota phrases are checked first: providers report billing exhaustion
    /// with the same 429 status they use for throttling.
    pub fn classify(message: impl Into<String>) -> Self {
        static DEFAULT_TABLES: Lazy<PatternTables> = Lazy::new(PatternTables::default);
        Self::classify_with(message, &DEFAULT_TABLES)
    }

    /// [`ModelError::classify`] against caller-supplied phrase tables.
    pub fn classify_with(message: impl Into<String>, tables: &PatternTables) -> Self {
        let message = message.into();
        if tables.quota_errors.find(&message).is_some() {
            ModelError::QuotaExceeded { message }
        } else if RE_HTTP_429.is_match(&message)
            || tables.rate_limit_errors.find(&message).is_some()
        {
            ModelError::RateLimited { message }
        } else {
            ModelError::Provider { message }
        }
    }

    /// Errors that end the run: retrying against a throttled or exhausted
    /// account only burns more of it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited { .. } | ModelError::QuotaExceeded { .. }
        )
    }

    /// Errors that originate on the provider side of the wire.
    pub fn is_provider_side(&self) -> bool {
        matches!(
            self,
            ModelError::RateLimited { .. }
                | ModelError::QuotaExceeded { .. }
                | ModelError::Timeout { .. }
                | ModelError::Provider { .. }
        )
    }
}

/// Errors reported by a session store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Session '{session_id}' not found")]
    NotFound { session_id: String },

    #[error("Maximum {limit} images allowed (session has {existing}, tried to add {adding})")]
    TooManyImages {
        existing: usize,
        adding: usize,
        limit: usize,
    },

    #[error("Invalid image reference '{reference}': {reason}")]
    InvalidImage { reference: String, reason: String },

    #[error("{0}")]
    Backend(String),
}
