//! The model-provider boundary.
//!
//! Both stages talk to the model through [`ModelClient`], never to a concrete
//! SDK. [`crate::pipeline::llm::EdgequakeClient`] is the production
//! implementation over `edgequake-llm`; tests inject scripted fakes through
//! [`crate::config::GenerationConfigBuilder::client`].

use crate::config::GenerationConfig;
use crate::error::{GenerateError, ModelError};
use crate::pipeline::llm::EdgequakeClient;
use async_trait::async_trait;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Output mode requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// Free text.
    #[default]
    Text,
    /// Any JSON object.
    JsonObject,
}

/// One model request: a system prompt, a user turn and optional images.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system: String,
    pub user: String,
    /// Image references attached to the user turn, in order.
    pub images: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub format: ResponseFormat,
}

impl ModelRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            images: Vec::new(),
            temperature: 0.0,
            max_tokens: 1024,
            format: ResponseFormat::Text,
        }
    }

    pub fn with_image(mut self, reference: impl Into<String>) -> Self {
        self.images.push(reference.into());
        self
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn with_max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }
}

/// Text returned by a model call, with token accounting when known.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl ModelReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// A JSON schema the structured call must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// A vision-capable chat model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Free-form completion. Images in `request.images` are attached to the
    /// user turn.
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError>;

    /// Schema-constrained completion. The reply content is the JSON text of
    /// a conformant object.
    ///
    /// Clients without a native structured mode keep the default, which
    /// reports [`ModelError::StructuredUnsupported`]; the synthesis stage
    /// then falls back to parsing free-form JSON.
    async fn complete_structured(
        &self,
        request: &ModelRequest,
        schema: &StructuredSchema,
    ) -> Result<ModelReply, ModelError> {
        let _ = (request, schema);
        Err(ModelError::StructuredUnsupported)
    }
}

/// Resolve the model client, from most-specific to least-specific.
///
/// 1. **Injected client** (`config.client`) — used as-is; this is how tests
///    and custom middleware plug in.
/// 2. **Pre-built provider** (`config.provider`) — wrapped in an
///    [`EdgequakeClient`].
/// 3. **Named provider + model** (`config.provider_name`).
/// 4. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 5. **OpenAI key** (`OPENAI_API_KEY`) with the configured or default model.
/// 6. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_client(config: &GenerationConfig) -> Result<Arc<dyn ModelClient>, GenerateError> {
    if let Some(ref client) = config.client {
        return Ok(Arc::clone(client));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(EdgequakeClient::new(provider, config)))
}

fn resolve_provider(config: &GenerationConfig) -> Result<Arc<dyn LLMProvider>, GenerateError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| GenerateError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, GenerateError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        GenerateError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
