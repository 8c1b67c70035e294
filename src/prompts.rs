//! Prompts and the flashcard JSON schema.
//!
//! Centralising every prompt here means a wording change touches exactly one
//! file, and unit tests can check the prompts without a live model.
//! Callers can override the two system prompts via
//! [`crate::config::GenerationConfig`]; the constants here are used only when
//! no override is provided.

use crate::client::StructuredSchema;
use serde_json::json;

/// System prompt for transcribing one photographed page.
pub const DEFAULT_OCR_PROMPT: &str = r#"You transcribe photographs of handwritten academic notes.

Rules:
1. Transcribe the text VERBATIM, in reading order. Do not summarise, paraphrase or correct the author.
2. Keep line breaks, lists and headings as they appear on the page.
3. Write formulas in plain text or LaTeX exactly as written.
4. Mark any word or span you cannot read as [illegible]. Never guess.
5. Output ONLY the transcribed text. No explanations, no preamble, no code fences."#;

/// User turn accompanying each page image.
pub const OCR_USER_PROMPT: &str = "Transcribe this page exactly.";

/// System prompt for turning the aggregated transcript into flashcards.
pub const DEFAULT_SYNTHESIS_PROMPT: &str = r#"You create memorizable study flashcards from a student's notes.

Rules:
1. Every "front" must be a clear, specific question that ends with "?".
2. Every "back" must be a direct, concise answer (1-3 sentences).
3. Draw cards from EVERY page of the notes. The notes are split into pages marked "--- PAGE n START ---" and "--- PAGE n END ---"; do not over-weight the first page.
4. No duplicate questions. No generic cards such as "What is key point 1?" or "Key concept?".
5. "topic" is a short title (2-6 words) for the notes as a whole.
6. Return ONLY valid JSON of the form {"topic": string, "flashcards": [{"front": string, "back": string}]}."#;

/// Shorter system prompt for the JSON-object fallback mode.
pub const JSON_OBJECT_PROMPT: &str = r#"You create memorizable study flashcards.
Return JSON only, with keys: topic, flashcards[].front, flashcards[].back.
Every front must be a question ending with "?". Every back is a concise answer.
Use material from every page of the notes."#;

/// Name of the structured-output schema.
pub const FLASHCARD_SCHEMA_NAME: &str = "flashcards_schema";

/// The schema every synthesis reply must match.
pub fn flashcard_schema() -> StructuredSchema {
    StructuredSchema {
        name: FLASHCARD_SCHEMA_NAME.to_string(),
        schema: json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "topic": { "type": "string" },
                "flashcards": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "front": { "type": "string" },
                            "back": { "type": "string" }
                        },
                        "required": ["front", "back"]
                    }
                }
            },
            "required": ["topic", "flashcards"]
        }),
    }
}

/// Build the synthesis user turn for an (already truncated) document.
pub fn synthesis_user_prompt(document: &str, page_count: usize) -> String {
    format!(
        "Create 8-15 exam-ready question-and-answer flashcards from these notes \
         ({page_count} page(s)).\n\n{document}"
    )
}

/// Append the schema to a system prompt, for clients that can only be asked
/// for JSON in words.
pub fn with_inline_schema(system: &str, schema: &StructuredSchema) -> String {
    format!(
        "{system}\n\nThe JSON must validate against this schema:\n{}",
        schema.schema
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_requires_topic_and_cards() {
        let s = flashcard_schema();
        assert_eq!(s.name, FLASHCARD_SCHEMA_NAME);
        assert_eq!(s.schema["required"], json!(["topic", "flashcards"]));
        assert_eq!(
            s.schema["properties"]["flashcards"]["items"]["required"],
            json!(["front", "back"])
        );
    }

    #[test]
    fn synthesis_prompt_mentions_page_markers() {
        assert!(DEFAULT_SYNTHESIS_PROMPT.contains("PAGE n START"));
        assert!(DEFAULT_SYNTHESIS_PROMPT.contains("\"?\""));
    }

    #[test]
    fn ocr_prompt_asks_for_illegible_markers() {
        assert!(DEFAULT_OCR_PROMPT.contains("[illegible]"));
    }

    #[test]
    fn user_prompt_embeds_document() {
        let p = synthesis_user_prompt("--- PAGE 1 START ---\nnotes", 1);
        assert!(p.contains("1 page(s)"));
        assert!(p.ends_with("notes"));
    }

    #[test]
    fn inline_schema_is_appended() {
        let p = with_inline_schema("sys", &flashcard_schema());
        assert!(p.starts_with("sys"));
        assert!(p.contains("\"flashcards\""));
    }
}
