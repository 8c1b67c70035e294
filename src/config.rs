//! Configuration types for flashcard generation.
//!
//! All generation behaviour is controlled through [`GenerationConfig`], built
//! via its [`GenerationConfigBuilder`]. Every empirical constant in the
//! pipeline (minimum lengths, the card quality gate, the document budget)
//! lives in [`QualityThresholds`] so it can be tuned without code changes.

use crate::client::ModelClient;
use crate::error::GenerateError;
use crate::pipeline::patterns::PatternTables;
use crate::pipeline::synthesize::SynthesisStrategy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Empirical thresholds used by the stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// A transcript (or aggregated document) must be longer than this many
    /// characters to count as meaningful. Default: 20.
    pub min_transcript_chars: usize,

    /// Minimum length of a card's front and back. Default: 12.
    pub min_card_field_chars: usize,

    /// The fallback keeps fragments longer than this. Default: 24.
    pub min_fallback_fragment_chars: usize,

    /// A model attempt is accepted only with at least this many filtered
    /// cards. Default: 6.
    pub min_accepted_cards: usize,

    /// The fallback emits at most this many cards. Default: 8.
    pub max_fallback_cards: usize,

    /// The synthesis request carries at most this many characters of the
    /// aggregated document; the tail is cut. Default: 12 000.
    pub max_document_chars: usize,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_transcript_chars: 20,
            min_card_field_chars: 12,
            min_fallback_fragment_chars: 24,
            min_accepted_cards: 6,
            max_fallback_cards: 8,
            max_document_chars: 12_000,
        }
    }
}

/// Configuration for a generation run.
///
/// # Example
/// ```rust
/// use cramfast::GenerationConfig;
///
/// let config = GenerationConfig::builder()
///     .model("gpt-4o-mini")
///     .concurrency(4)
///     .min_accepted_cards(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct GenerationConfig {
    /// LLM model identifier. If None, uses [`crate::client::DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed edgequake provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed model client. Takes precedence over everything else.
    pub client: Option<Arc<dyn ModelClient>>,

    /// Number of pages transcribed concurrently. Default: 4.
    ///
    /// Pages are independent; results are re-ordered by page number before
    /// aggregation, so this only affects wall-clock time.
    pub concurrency: usize,

    /// Sampling temperature for transcription. Default: 0.0.
    pub ocr_temperature: f32,

    /// Maximum output tokens per transcribed page. Default: 1500.
    pub ocr_max_tokens: usize,

    /// Sampling temperature for flashcard synthesis. Default: 0.0.
    pub synthesis_temperature: f32,

    /// Maximum output tokens for a synthesis reply. Default: 4096.
    pub synthesis_max_tokens: usize,

    /// Attempts per page before it is dropped. Default: 2.
    pub max_ocr_retries: u32,

    /// Attempts on the structured synthesis path. Default: 2.
    pub max_gen_retries: u32,

    /// Delay before the second attempt, doubling after each further attempt.
    /// Default: 500.
    pub retry_backoff_ms: u64,

    /// Per model call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Timeout for downloading a remote image. Default: 30.
    pub download_timeout_secs: u64,

    /// Longest image side sent to the model; larger images are downscaled.
    /// Default: 2000.
    pub max_image_dimension: u32,

    /// Custom transcription system prompt.
    pub ocr_prompt: Option<String>,

    /// Custom synthesis system prompt.
    pub synthesis_prompt: Option<String>,

    pub thresholds: QualityThresholds,

    pub patterns: PatternTables,

    /// Synthesis strategies, tried in order until one passes its gate.
    pub strategies: Vec<SynthesisStrategy>,

    /// Receives per-page and per-strategy events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: None,
            provider_name: None,
            provider: None,
            client: None,
            concurrency: 4,
            ocr_temperature: 0.0,
            ocr_max_tokens: 1500,
            synthesis_temperature: 0.0,
            synthesis_max_tokens: 4096,
            max_ocr_retries: 2,
            max_gen_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 30,
            max_image_dimension: 2000,
            ocr_prompt: None,
            synthesis_prompt: None,
            thresholds: QualityThresholds::default(),
            patterns: PatternTables::default(),
            strategies: SynthesisStrategy::default_ladder(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("client", &self.client.as_ref().map(|_| "<dyn ModelClient>"))
            .field("concurrency", &self.concurrency)
            .field("ocr_temperature", &self.ocr_temperature)
            .field("synthesis_temperature", &self.synthesis_temperature)
            .field("max_ocr_retries", &self.max_ocr_retries)
            .field("max_gen_retries", &self.max_gen_retries)
            .field("thresholds", &self.thresholds)
            .field("strategies", &self.strategies)
            .finish()
    }
}

impl GenerationConfig {
    /// Create a new builder for `GenerationConfig`.
    pub fn builder() -> GenerationConfigBuilder {
        GenerationConfigBuilder {
            config: Self::default(),
        }
    }

    /// Backoff before `attempt` (0-indexed); zero for the first attempt.
    pub(crate) fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            0
        } else {
            self.retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(attempt - 1))
        }
    }
}

/// Builder for [`GenerationConfig`].
pub struct GenerationConfigBuilder {
    config: GenerationConfig,
}

impl fmt::Debug for GenerationConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl GenerationConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn client(mut self, client: Arc<dyn ModelClient>) -> Self {
        self.config.client = Some(client);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn ocr_temperature(mut self, t: f32) -> Self {
        self.config.ocr_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn ocr_max_tokens(mut self, n: usize) -> Self {
        self.config.ocr_max_tokens = n;
        self
    }

    pub fn synthesis_temperature(mut self, t: f32) -> Self {
        self.config.synthesis_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn synthesis_max_tokens(mut self, n: usize) -> Self {
        self.config.synthesis_max_tokens = n;
        self
    }

    pub fn max_ocr_retries(mut self, n: u32) -> Self {
        self.config.max_ocr_retries = n;
        self
    }

    pub fn max_gen_retries(mut self, n: u32) -> Self {
        self.config.max_gen_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px.max(256);
        self
    }

    pub fn ocr_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.ocr_prompt = Some(prompt.into());
        self
    }

    pub fn synthesis_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.synthesis_prompt = Some(prompt.into());
        self
    }

    pub fn thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn min_accepted_cards(mut self, n: usize) -> Self {
        self.config.thresholds.min_accepted_cards = n;
        self
    }

    pub fn max_document_chars(mut self, n: usize) -> Self {
        self.config.thresholds.max_document_chars = n;
        self
    }

    pub fn patterns(mut self, patterns: PatternTables) -> Self {
        self.config.patterns = patterns;
        self
    }

    pub fn strategies(mut self, strategies: Vec<SynthesisStrategy>) -> Self {
        self.config.strategies = strategies;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<GenerationConfig, GenerateError> {
        let c = &self.config;
        if c.max_ocr_retries == 0 || c.max_gen_retries == 0 {
            return Err(GenerateError::InvalidConfig(
                "retry counts must be ≥ 1".into(),
            ));
        }
        if c.strategies.is_empty() {
            return Err(GenerateError::InvalidConfig(
                "at least one synthesis strategy is required".into(),
            ));
        }
        let t = &c.thresholds;
        if t.min_accepted_cards == 0 {
            return Err(GenerateError::InvalidConfig(
                "min_accepted_cards must be ≥ 1".into(),
            ));
        }
        if t.max_document_chars <= t.min_transcript_chars {
            return Err(GenerateError::InvalidConfig(format!(
                "max_document_chars ({}) must exceed min_transcript_chars ({})",
                t.max_document_chars, t.min_transcript_chars
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = GenerationConfig::default();
        assert_eq!(c.max_ocr_retries, 2);
        assert_eq!(c.max_gen_retries, 2);
        assert_eq!(c.thresholds.min_accepted_cards, 6);
        assert_eq!(c.thresholds.min_card_field_chars, 12);
        assert_eq!(c.thresholds.min_transcript_chars, 20);
        assert_eq!(c.thresholds.min_fallback_fragment_chars, 24);
        assert_eq!(c.thresholds.max_document_chars, 12_000);
        assert_eq!(c.strategies, SynthesisStrategy::default_ladder());
    }

    #[test]
    fn builder_rejects_zero_retries() {
        let err = GenerationConfig::builder()
            .max_ocr_retries(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, GenerateError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_empty_ladder() {
        let err = GenerationConfig::builder()
            .strategies(vec![])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("strategy"));
    }

    #[test]
    fn builder_clamps() {
        let c = GenerationConfig::builder()
            .concurrency(0)
            .ocr_temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(c.concurrency, 1);
        assert_eq!(c.ocr_temperature, 2.0);
    }

    #[test]
    fn backoff_doubles() {
        let c = GenerationConfig::builder()
            .retry_backoff_ms(100)
            .build()
            .unwrap();
        assert_eq!(c.backoff_ms(0), 0);
        assert_eq!(c.backoff_ms(1), 100);
        assert_eq!(c.backoff_ms(2), 200);
        assert_eq!(c.backoff_ms(3), 400);
    }

    #[test]
    fn debug_hides_injected_provider() {
        let s = format!("{:?}", GenerationConfig::default());
        assert!(s.contains("GenerationConfig"));
        assert!(s.contains("provider: None"));
    }
}
