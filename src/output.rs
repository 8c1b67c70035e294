//! Value types produced by a generation run.

use crate::error::GenerateError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Topic used whenever the model supplies none, and by the fallback generator.
pub const DEFAULT_TOPIC: &str = "Study Notes";

/// One question/answer card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    /// The question. Accepted cards always end in `?`.
    pub front: String,
    /// The answer.
    pub back: String,
}

impl Flashcard {
    pub fn new(front: impl Into<String>, back: impl Into<String>) -> Self {
        Self {
            front: front.into(),
            back: back.into(),
        }
    }
}

/// The text extracted from one image.
///
/// Lives only for the duration of a run; only the aggregated document built
/// from these is ever sent onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageTranscript {
    /// 1-indexed position of the image in the session.
    pub page_num: usize,
    pub text: String,
}

/// A topic plus its accepted cards: the unit committed to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub topic: String,
    pub flashcards: Vec<Flashcard>,
}

impl GenerationResult {
    /// Render the deck as Markdown: a `#` heading with the topic, then one
    /// `##` section per card.
    pub fn to_markdown(&self) -> String {
        let mut md = format!("# {}\n", self.topic.trim());
        for (i, card) in self.flashcards.iter().enumerate() {
            md.push_str(&format!("\n## {}. {}\n\n{}\n", i + 1, card.front, card.back));
        }
        md
    }
}

/// Write the deck as Markdown to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_markdown(
    result: &GenerationResult,
    path: impl AsRef<Path>,
) -> Result<(), GenerateError> {
    let path = path.as_ref();
    let io_err = |e: std::io::Error| GenerateError::Storage {
        message: format!("failed to write '{}': {e}", path.display()),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, result.to_markdown())
        .await
        .map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)?;
    Ok(())
}
