//! Flashcard synthesis: aggregated document → accepted deck.
//!
//! Synthesis is an ordered ladder of [`SynthesisStrategy`] values. Each rung
//! either returns a deck that passed its quality gate or a [`Rejection`]
//! saying why not, and the next rung is tried:
//!
//! | Strategy | Model calls | Gate |
//! |----------|-------------|------|
//! | `Structured` | up to `max_gen_retries`, schema-constrained | `min_accepted_cards` |
//! | `JsonObject` | one, free JSON object | `min_accepted_cards` |
//! | `Fallback` | none | at least one card |
//!
//! Every model reply goes through the same path: JSON extraction → tolerant
//! parse (an unparsable reply is checked for refusals) →
//! [`normalize_and_filter`] → gate. A fatal
//! provider error (throttling, exhausted quota) stops the whole ladder, since
//! neither a second model call nor a degraded deck is what the caller wants
//! when their account is the problem.

use crate::client::{ModelClient, ModelReply, ModelRequest, ResponseFormat};
use crate::config::GenerationConfig;
use crate::error::{GenerateError, ModelError};
use crate::output::{Flashcard, GenerationResult, DEFAULT_TOPIC};
use crate::pipeline::aggregate::AggregatedDocument;
use crate::pipeline::fallback::fallback_cards;
use crate::pipeline::filter::{normalize_and_filter, FilterRules};
use crate::pipeline::postprocess::extract_json_object;
use crate::prompts::{
    flashcard_schema, synthesis_user_prompt, with_inline_schema, DEFAULT_SYNTHESIS_PROMPT,
    JSON_OBJECT_PROMPT,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Refusals are looked for in the opening of an unparsable reply only.
const REFUSAL_WINDOW_CHARS: usize = 200;

/// One rung of the synthesis ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisStrategy {
    /// Schema-constrained output with retries.
    Structured,
    /// A single less-constrained JSON-object request.
    JsonObject,
    /// Model-free cards from the transcript itself.
    Fallback,
}

impl SynthesisStrategy {
    /// Structured → JsonObject → Fallback.
    pub fn default_ladder() -> Vec<SynthesisStrategy> {
        vec![
            SynthesisStrategy::Structured,
            SynthesisStrategy::JsonObject,
            SynthesisStrategy::Fallback,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            SynthesisStrategy::Structured => "structured",
            SynthesisStrategy::JsonObject => "json_object",
            SynthesisStrategy::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a strategy produced no deck.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The reply opened with a refusal phrase.
    Refused { phrase: String },
    /// The reply held no parsable deck.
    Malformed { detail: String },
    /// Too few cards survived the filter.
    BelowQualityGate { accepted: usize, required: usize },
    /// The model call itself failed.
    Provider(ModelError),
}

impl Rejection {
    fn fatal_error(&self) -> Option<&ModelError> {
        match self {
            Rejection::Provider(e) if e.is_fatal() => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Refused { phrase } => write!(f, "model refused ('{phrase}')"),
            Rejection::Malformed { detail } => write!(f, "malformed reply: {detail}"),
            Rejection::BelowQualityGate { accepted, required } => {
                write!(f, "{accepted} card(s) accepted, {required} required")
            }
            Rejection::Provider(e) => write!(f, "provider error: {e}"),
        }
    }
}

// Replies are parsed leniently: missing fields default, and the common
// alternative key names models drift to are accepted.
#[derive(Debug, Deserialize)]
struct CandidateDeck {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default, alias = "cards")]
    flashcards: Vec<CandidateCard>,
}

#[derive(Debug, Deserialize)]
struct CandidateCard {
    #[serde(default, alias = "question")]
    front: String,
    #[serde(default, alias = "answer")]
    back: String,
}

/// Parse a raw reply into an unfiltered deck.
pub fn parse_deck(raw: &str) -> Result<GenerationResult, Rejection> {
    let json = extract_json_object(raw).ok_or_else(|| Rejection::Malformed {
        detail: "no JSON object in reply".to_string(),
    })?;
    let deck: CandidateDeck = serde_json::from_str(&json).map_err(|e| Rejection::Malformed {
        detail: e.to_string(),
    })?;

    let topic = deck
        .topic
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TOPIC)
        .to_string();

    Ok(GenerationResult {
        topic,
        flashcards: deck
            .flashcards
            .into_iter()
            .map(|c| Flashcard::new(c.front, c.back))
            .collect(),
    })
}

/// Run one model reply through parse, filter and gate.
///
/// A reply that parses as a deck is never a refusal, whatever its cards say.
/// Only unparsable replies are checked against the refusal table.
pub fn evaluate_reply(raw: &str, config: &GenerationConfig) -> Result<GenerationResult, Rejection> {
    let deck = match parse_deck(raw) {
        Ok(deck) => deck,
        Err(malformed) => {
            return Err(
                match config.patterns.refusals.find_within(raw, REFUSAL_WINDOW_CHARS) {
                    Some(phrase) => Rejection::Refused {
                        phrase: phrase.to_string(),
                    },
                    None => malformed,
                },
            )
        }
    };

    let candidates = deck.flashcards.len();
    let flashcards = normalize_and_filter(deck.flashcards, filter_rules(config));
    debug!(
        "{} of {} candidate card(s) passed the filter",
        flashcards.len(),
        candidates
    );

    let required = config.thresholds.min_accepted_cards;
    if flashcards.len() < required {
        return Err(Rejection::BelowQualityGate {
            accepted: flashcards.len(),
            required,
        });
    }
    Ok(GenerationResult {
        topic: deck.topic,
        flashcards,
    })
}

fn filter_rules(config: &GenerationConfig) -> FilterRules<'_> {
    FilterRules {
        min_field_chars: config.thresholds.min_card_field_chars,
        boilerplate: &config.patterns.boilerplate,
    }
}

fn base_request(system: &str, document: &AggregatedDocument, config: &GenerationConfig) -> ModelRequest {
    ModelRequest::new(system, synthesis_user_prompt(&document.text, document.page_count))
        .with_temperature(config.synthesis_temperature)
        .with_max_tokens(config.synthesis_max_tokens)
        .with_format(ResponseFormat::JsonObject)
}

/// One schema-constrained call, degrading to free-form JSON with the schema
/// in the prompt when the client has no structured mode.
async fn structured_call(
    client: &dyn ModelClient,
    request: &ModelRequest,
) -> Result<ModelReply, ModelError> {
    let schema = flashcard_schema();
    match client.complete_structured(request, &schema).await {
        Err(ModelError::StructuredUnsupported) => {
            debug!("Structured output unsupported, requesting free-form JSON");
            let mut inline = request.clone();
            inline.system = with_inline_schema(&request.system, &schema);
            client.complete(&inline).await
        }
        other => other,
    }
}

async fn run_structured(
    client: &dyn ModelClient,
    document: &AggregatedDocument,
    config: &GenerationConfig,
) -> Result<GenerationResult, Rejection> {
    let system = config
        .synthesis_prompt
        .as_deref()
        .unwrap_or(DEFAULT_SYNTHESIS_PROMPT);
    let request = base_request(system, document, config);
    let mut last = Rejection::Malformed {
        detail: "no attempt made".to_string(),
    };

    for attempt in 0..config.max_gen_retries {
        if attempt > 0 {
            sleep(Duration::from_millis(config.backoff_ms(attempt))).await;
        }
        let outcome = match structured_call(client, &request).await {
            Ok(reply) => evaluate_reply(&reply.content, config),
            Err(e) => Err(Rejection::Provider(e)),
        };
        match outcome {
            Ok(result) => return Ok(result),
            Err(rejection) => {
                warn!(
                    "Structured attempt {}/{} rejected: {}",
                    attempt + 1,
                    config.max_gen_retries,
                    rejection
                );
                if rejection.fatal_error().is_some() {
                    return Err(rejection);
                }
                last = rejection;
            }
        }
    }
    Err(last)
}

async fn run_json_object(
    client: &dyn ModelClient,
    document: &AggregatedDocument,
    config: &GenerationConfig,
) -> Result<GenerationResult, Rejection> {
    let request = base_request(JSON_OBJECT_PROMPT, document, config);
    let reply = client.complete(&request).await.map_err(Rejection::Provider)?;
    evaluate_reply(&reply.content, config)
}

fn run_fallback(
    document: &AggregatedDocument,
    config: &GenerationConfig,
) -> Result<GenerationResult, Rejection> {
    let result = fallback_cards(
        &document.text,
        &config.thresholds,
        &config.patterns.boilerplate,
    );
    if result.flashcards.is_empty() {
        return Err(Rejection::BelowQualityGate {
            accepted: 0,
            required: 1,
        });
    }
    Ok(result)
}

/// Run one strategy.
pub async fn run_strategy(
    strategy: SynthesisStrategy,
    client: &dyn ModelClient,
    document: &AggregatedDocument,
    config: &GenerationConfig,
) -> Result<GenerationResult, Rejection> {
    match strategy {
        SynthesisStrategy::Structured => run_structured(client, document, config).await,
        SynthesisStrategy::JsonObject => run_json_object(client, document, config).await,
        SynthesisStrategy::Fallback => run_fallback(document, config),
    }
}

/// Walk the configured ladder until a strategy yields a deck.
///
/// Returns the deck and the strategy that produced it.
pub async fn synthesize(
    client: &dyn ModelClient,
    document: &AggregatedDocument,
    config: &GenerationConfig,
) -> Result<(GenerationResult, SynthesisStrategy), GenerateError> {
    let mut reasons = Vec::with_capacity(config.strategies.len());

    for &strategy in &config.strategies {
        if let Some(ref cb) = config.progress_callback {
            cb.on_strategy_start(strategy);
        }
        match run_strategy(strategy, client, document, config).await {
            Ok(result) => {
                info!(
                    "Strategy '{}' produced {} card(s), topic '{}'",
                    strategy,
                    result.flashcards.len(),
                    result.topic
                );
                return Ok((result, strategy));
            }
            Err(rejection) => {
                if let Some(e) = rejection.fatal_error() {
                    return Err(e.clone().into());
                }
                warn!("Strategy '{}' rejected: {}", strategy, rejection);
                if let Some(ref cb) = config.progress_callback {
                    cb.on_strategy_rejected(strategy, &rejection.to_string());
                }
                reasons.push(format!("{strategy}: {rejection}"));
            }
        }
    }

    Err(GenerateError::GenerationFailed {
        detail: reasons.join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String, ModelError>>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, ModelError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelClient for Scripted {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("{}".to_string()))
                .map(ModelReply::text)
        }
    }

    fn deck(topic: &str, n: usize) -> String {
        let cards: Vec<_> = (1..=n)
            .map(|i| {
                serde_json::json!({
                    "front": format!("What is cell fact number {i}?"),
                    "back": format!("Cell fact {i} explained in full."),
                })
            })
            .collect();
        serde_json::json!({ "topic": topic, "flashcards": cards }).to_string()
    }

    fn document() -> AggregatedDocument {
        AggregatedDocument {
            text: "--- PAGE 1 START ---\nCells are the basic unit of life in all organisms.\n--- PAGE 1 END ---"
                .to_string(),
            page_count: 1,
            content_chars: 50,
        }
    }

    fn config() -> GenerationConfig {
        GenerationConfig::builder().retry_backoff_ms(0).build().unwrap()
    }

    #[test]
    fn parse_deck_is_lenient() {
        let d = parse_deck(
            "Here you go:\n```json\n{\"topic\": \"  Cells \", \"cards\": [{\"question\": \"Q?\", \"answer\": \"A\"}]}\n```",
        )
        .unwrap();
        assert_eq!(d.topic, "Cells");
        assert_eq!(d.flashcards, vec![Flashcard::new("Q?", "A")]);
    }

    #[test]
    fn parse_deck_defaults_blank_topic() {
        let d = parse_deck("{\"topic\": \"\", \"flashcards\": []}").unwrap();
        assert_eq!(d.topic, DEFAULT_TOPIC);
    }

    #[test]
    fn parse_deck_rejects_non_json() {
        assert!(matches!(
            parse_deck("Here are some cards!"),
            Err(Rejection::Malformed { .. })
        ));
        assert!(matches!(
            parse_deck("{\"flashcards\": \"nope\"}"),
            Err(Rejection::Malformed { .. })
        ));
    }

    #[test]
    fn evaluate_detects_refusal() {
        let r = evaluate_reply("I'm sorry, but I can't help with that.", &config());
        assert!(matches!(r, Err(Rejection::Refused { .. })));
    }

    #[test]
    fn evaluate_detects_refusal_wrapped_around_broken_json() {
        let r = evaluate_reply("As an AI, I cannot do this. {\"flashcards\": ", &config());
        assert!(matches!(r, Err(Rejection::Refused { .. })), "got {r:?}");
    }

    #[test]
    fn evaluate_keeps_valid_deck_that_mentions_refusal_phrases() {
        let raw = deck("I'm sorry: apologies in diplomacy", 7);
        let r = evaluate_reply(&raw, &config()).unwrap();
        assert_eq!(r.topic, "I'm sorry: apologies in diplomacy");
        assert_eq!(r.flashcards.len(), 7);
    }

    #[test]
    fn evaluate_applies_gate() {
        let r = evaluate_reply(&deck("Cells", 5), &config());
        assert_eq!(
            r,
            Err(Rejection::BelowQualityGate {
                accepted: 5,
                required: 6
            })
        );
        assert_eq!(evaluate_reply(&deck("Cells", 6), &config()).unwrap().flashcards.len(), 6);
    }

    #[tokio::test]
    async fn structured_success_on_first_attempt() {
        let client = Scripted::new(vec![Ok(deck("Cells", 9))]);
        let (result, strategy) = synthesize(&client, &document(), &config()).await.unwrap();
        assert_eq!(strategy, SynthesisStrategy::Structured);
        assert_eq!(result.topic, "Cells");
        assert_eq!(result.flashcards.len(), 9);
        assert_eq!(client.calls(), 1);
        let req = &client.requests.lock().unwrap()[0];
        assert!(req.system.contains("flashcards"));
        assert!(req.user.contains("--- PAGE 1 START ---"));
    }

    #[tokio::test]
    async fn refusal_is_retried() {
        let client = Scripted::new(vec![
            Ok("As an AI, I cannot do that.".to_string()),
            Ok(deck("Cells", 7)),
        ]);
        let (result, strategy) = synthesize(&client, &document(), &config()).await.unwrap();
        assert_eq!(strategy, SynthesisStrategy::Structured);
        assert_eq!(result.flashcards.len(), 7);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn json_object_rung_after_structured_exhaustion() {
        let client = Scripted::new(vec![
            Ok("not json".to_string()),
            Ok(deck("Cells", 2)),
            Ok(deck("Cell Biology", 8)),
        ]);
        let (result, strategy) = synthesize(&client, &document(), &config()).await.unwrap();
        assert_eq!(strategy, SynthesisStrategy::JsonObject);
        assert_eq!(result.topic, "Cell Biology");
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].system, JSON_OBJECT_PROMPT);
    }

    #[tokio::test]
    async fn fallback_when_models_fall_short() {
        let client = Scripted::new(vec![
            Ok(deck("Cells", 3)),
            Ok(deck("Cells", 3)),
            Ok(deck("Cells", 3)),
        ]);
        let (result, strategy) = synthesize(&client, &document(), &config()).await.unwrap();
        assert_eq!(strategy, SynthesisStrategy::Fallback);
        assert_eq!(result.topic, DEFAULT_TOPIC);
        assert_eq!(result.flashcards.len(), 1);
    }

    #[tokio::test]
    async fn rate_limit_stops_the_ladder() {
        let client = Scripted::new(vec![Err(ModelError::RateLimited {
            message: "429 Too Many Requests".into(),
        })]);
        let err = synthesize(&client, &document(), &config()).await.unwrap_err();
        assert!(matches!(err, GenerateError::RateLimited { .. }));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn transient_provider_error_is_retried() {
        let client = Scripted::new(vec![
            Err(ModelError::Provider {
                message: "503 Service Unavailable".into(),
            }),
            Ok(deck("Cells", 6)),
        ]);
        let (_, strategy) = synthesize(&client, &document(), &config()).await.unwrap();
        assert_eq!(strategy, SynthesisStrategy::Structured);
    }

    #[tokio::test]
    async fn empty_fallback_is_generation_failed() {
        let client = Scripted::new(vec![]);
        let doc = AggregatedDocument {
            text: "short bits.\nand more.\ntiny words here".to_string(),
            page_count: 1,
            content_chars: 35,
        };
        let err = synthesize(&client, &doc, &config()).await.unwrap_err();
        match err {
            GenerateError::GenerationFailed { detail } => {
                assert!(detail.contains("fallback"));
                assert!(detail.contains("structured"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn strategy_serde_names() {
        assert_eq!(
            serde_json::to_string(&SynthesisStrategy::JsonObject).unwrap(),
            "\"json_object\""
        );
        assert_eq!(SynthesisStrategy::Fallback.to_string(), "fallback");
    }
}
