//! VLM interaction: the [`ModelClient`] implementation over `edgequake-llm`.
//!
//! This module turns a [`ModelRequest`] into provider messages and maps
//! provider failures onto [`ModelError`]. It deliberately does not retry:
//! retry budgets belong to the stages, which know whether a failed call is
//! worth repeating.
//!
//! JSON requests set the provider's `json_object` response format.
//! `edgequake-llm` has no schema-constrained mode, so
//! [`ModelClient::complete_structured`] is served by a JSON-mode request with
//! the schema spelled out in the system prompt.

use crate::client::{ModelClient, ModelReply, ModelRequest, ResponseFormat, StructuredSchema};
use crate::config::GenerationConfig;
use crate::error::ModelError;
use crate::pipeline::patterns::PatternTables;
use crate::pipeline::{encode, input};
use crate::prompts::with_inline_schema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const JSON_ONLY_SUFFIX: &str = "\n\nRespond with a single JSON object and nothing else.";

/// A [`ModelClient`] backed by an `edgequake-llm` provider.
pub struct EdgequakeClient {
    provider: Arc<dyn LLMProvider>,
    api_timeout_secs: u64,
    download_timeout_secs: u64,
    max_image_dimension: u32,
    patterns: PatternTables,
}

impl EdgequakeClient {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &GenerationConfig) -> Self {
        Self {
            provider,
            api_timeout_secs: config.api_timeout_secs,
            download_timeout_secs: config.download_timeout_secs,
            max_image_dimension: config.max_image_dimension,
            patterns: config.patterns.clone(),
        }
    }

    async fn load_image(&self, reference: &str) -> Result<ImageData, ModelError> {
        let resolved = input::resolve_image(reference, self.download_timeout_secs).await?;
        encode::encode_image(
            reference,
            &resolved.bytes,
            resolved.declared_mime.as_deref(),
            self.max_image_dimension,
        )
    }

    /// Build the message list.
    ///
    /// 1. **System message** — the stage prompt (plus a JSON-only reminder in
    ///    JSON mode)
    /// 2. **User message** — the instruction text, with every image attached
    async fn build_messages(&self, request: &ModelRequest) -> Result<Vec<ChatMessage>, ModelError> {
        let system = match request.format {
            ResponseFormat::Text => request.system.clone(),
            ResponseFormat::JsonObject => format!("{}{}", request.system, JSON_ONLY_SUFFIX),
        };
        let mut images = Vec::with_capacity(request.images.len());
        for reference in &request.images {
            images.push(self.load_image(reference).await?);
        }

        // An empty image list yields a plain text user turn.
        Ok(vec![
            ChatMessage::system(system),
            ChatMessage::user_with_images(request.user.clone(), images),
        ])
    }
}

#[async_trait]
impl ModelClient for EdgequakeClient {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        let messages = self.build_messages(request).await?;
        let options = build_options(request);
        let start = Instant::now();

        let call = self.provider.chat(&messages, Some(&options));
        let response = tokio::time::timeout(Duration::from_secs(self.api_timeout_secs), call)
            .await
            .map_err(|_| ModelError::Timeout {
                secs: self.api_timeout_secs,
            })?
            .map_err(|e| classify_llm_error(e, &self.patterns))?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }

    async fn complete_structured(
        &self,
        request: &ModelRequest,
        schema: &StructuredSchema,
    ) -> Result<ModelReply, ModelError> {
        let mut constrained = request.clone();
        constrained.system = with_inline_schema(&request.system, schema);
        constrained.format = ResponseFormat::JsonObject;
        self.complete(&constrained).await
    }
}

/// Build `CompletionOptions` from the request.
fn build_options(request: &ModelRequest) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(request.temperature),
        max_tokens: Some(request.max_tokens),
        response_format: (request.format == ResponseFormat::JsonObject)
            .then(|| "json_object".to_string()),
        ..Default::default()
    }
}

/// Map a provider error onto [`ModelError`].
///
/// Typed variants are trusted first. A throttling error may still carry a
/// billing message, so it goes through the quota table before it is reported
/// as a rate limit.
fn classify_llm_error(e: LlmError, patterns: &PatternTables) -> ModelError {
    match e {
        LlmError::RateLimited(message) => {
            if patterns.quota_errors.find(&message).is_some() {
                ModelError::QuotaExceeded { message }
            } else {
                ModelError::RateLimited { message }
            }
        }
        LlmError::Timeout => ModelError::Provider {
            message: "provider request timed out".to_string(),
        },
        other => ModelError::classify_with(other.to_string(), patterns),
    }
}
