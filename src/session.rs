//! Session model and the lifecycle state machine.
//!
//! ```text
//!            begin_generation            commit_success
//! pending ───────────────────▶ generating ───────────────▶ completed
//!    ▲                           │    ▲                        │
//!    │                           │    └────── begin ───────────┤
//!  (create)       commit_failure ▼                             │
//!                              error ◀──────── begin ──────────┘
//! ```
//!
//! The three transition functions here are the only code that writes a
//! session's status. [`crate::generate`] calls them in a shape that
//! guarantees a run which reached `generating` ends in `completed` or
//! `error`.

use crate::error::GenerateError;
use crate::output::{Flashcard, GenerationResult};
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Title used when the topic is blank.
pub const UNTITLED: &str = "Untitled";

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, never generated.
    #[default]
    Pending,
    /// A run is in progress.
    Generating,
    /// The last run committed a deck.
    Completed,
    /// The last run failed.
    Error,
}

impl SessionStatus {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Pending | Completed | Error, Generating) | (Generating, Completed | Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Generating => "generating",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A study session: the images a user uploaded and the deck made from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Image references in upload order.
    pub image_urls: Vec<String>,
    pub status: SessionStatus,
    /// Set together with `flashcards`.
    pub topic: Option<String>,
    /// Set together with `topic`.
    pub flashcards: Option<Vec<Flashcard>>,
}

impl Session {
    /// A fresh `pending` session with no images.
    ///
    /// Without an explicit title the session is named after its creation
    /// date, e.g. `Session 2026-10-19`.
    pub fn new(user_id: impl Into<String>, title: Option<String>) -> Self {
        let created_at = Utc::now();
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Session {}", created_at.format("%Y-%m-%d")));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            title: Some(title),
            created_at,
            image_urls: Vec::new(),
            status: SessionStatus::Pending,
            topic: None,
            flashcards: None,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// The committed deck, if any.
    pub fn result(&self) -> Option<GenerationResult> {
        match (&self.topic, &self.flashcards) {
            (Some(topic), Some(cards)) => Some(GenerationResult {
                topic: topic.clone(),
                flashcards: cards.clone(),
            }),
            _ => None,
        }
    }
}

/// Title derived from a topic: the trimmed topic, or [`UNTITLED`].
pub fn derive_title(topic: &str) -> String {
    let t = topic.trim();
    if t.is_empty() {
        UNTITLED.to_string()
    } else {
        t.to_string()
    }
}

/// Enter `generating`.
///
/// Fails with `Unauthenticated` for an empty user id, `NotFound` when the
/// session is absent or owned by someone else, and `NoImages` when there is
/// nothing to transcribe. None of the failures write anything.
pub async fn begin_generation(
    store: &dyn SessionStore,
    session_id: &str,
    user_id: &str,
) -> Result<Session, GenerateError> {
    if user_id.trim().is_empty() {
        return Err(GenerateError::Unauthenticated);
    }

    let mut session = store.get_session(session_id, user_id).await?;
    if !session.is_owned_by(user_id) {
        return Err(GenerateError::NotFound {
            session_id: session_id.to_string(),
        });
    }
    if session.image_urls.is_empty() {
        return Err(GenerateError::NoImages {
            session_id: session_id.to_string(),
        });
    }
    if session.status == SessionStatus::Generating {
        warn!(
            "Session {}: already generating; a previous run may still be active",
            session_id
        );
    }

    store
        .update_status(session_id, user_id, SessionStatus::Generating)
        .await?;
    session.status = SessionStatus::Generating;
    info!(
        "Session {}: generating from {} image(s)",
        session_id,
        session.image_urls.len()
    );
    Ok(session)
}

/// Commit a deck and enter `completed`.
///
/// `title` overrides the title derived from the topic.
pub async fn commit_success(
    store: &dyn SessionStore,
    session: &Session,
    result: &GenerationResult,
    title: Option<&str>,
) -> Result<(), GenerateError> {
    check_transition(session, SessionStatus::Completed);
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| derive_title(&result.topic));

    store
        .commit_flashcards(
            &session.id,
            &session.user_id,
            result.flashcards.clone(),
            result.topic.clone(),
            Some(title),
            SessionStatus::Completed,
        )
        .await?;
    info!(
        "Session {}: completed with {} card(s) on '{}'",
        session.id,
        result.flashcards.len(),
        result.topic
    );
    Ok(())
}

/// Enter `error`, unconditionally.
pub async fn commit_failure(
    store: &dyn SessionStore,
    session: &Session,
) -> Result<(), GenerateError> {
    check_transition(session, SessionStatus::Error);
    store
        .update_status(&session.id, &session.user_id, SessionStatus::Error)
        .await?;
    info!("Session {}: marked as error", session.id);
    Ok(())
}

fn check_transition(session: &Session, next: SessionStatus) {
    if !session.status.can_transition_to(next) {
        debug!(
            "Session {}: unusual transition {} → {}",
            session.id, session.status, next
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemorySessionStore;

    fn deck(topic: &str) -> GenerationResult {
        GenerationResult {
            topic: topic.into(),
            flashcards: vec![Flashcard::new(
                "What is osmosis exactly?",
                "Diffusion of water across a membrane.",
            )],
        }
    }

    #[test]
    fn transitions() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Generating));
        assert!(Error.can_transition_to(Generating));
        assert!(Completed.can_transition_to(Generating));
        assert!(Generating.can_transition_to(Completed));
        assert!(Generating.can_transition_to(Error));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Generating.can_transition_to(Pending));
    }

    #[test]
    fn status_serialises_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Generating).unwrap();
        assert_eq!(json, "\"generating\"");
    }

    #[test]
    fn derive_title_defaults_to_untitled() {
        assert_eq!(derive_title("  Cells "), "Cells");
        assert_eq!(derive_title("   "), UNTITLED);
    }

    #[test]
    fn new_session_is_pending_and_dated() {
        let s = Session::new("u1", None);
        assert_eq!(s.status, SessionStatus::Pending);
        assert!(s.image_urls.is_empty());
        assert!(s.title.as_deref().unwrap().starts_with("Session "));
        assert!(s.result().is_none());
    }

    #[tokio::test]
    async fn begin_generation_without_images_does_not_mutate() {
        let store = InMemorySessionStore::new();
        let s = store.create_session("u1", None).await.unwrap();

        let err = begin_generation(&store, &s.id, "u1").await.unwrap_err();
        assert!(matches!(err, GenerateError::NoImages { .. }));

        let after = store.get_session(&s.id, "u1").await.unwrap();
        assert_eq!(after.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn begin_generation_rejects_other_users() {
        let store = InMemorySessionStore::new();
        let s = store.create_session("owner", None).await.unwrap();
        store
            .append_images(&s.id, "owner", vec!["https://img/1.jpg".into()])
            .await
            .unwrap();

        let err = begin_generation(&store, &s.id, "intruder").await.unwrap_err();
        assert!(matches!(err, GenerateError::NotFound { .. }));
        let err = begin_generation(&store, &s.id, "").await.unwrap_err();
        assert!(matches!(err, GenerateError::Unauthenticated));
    }

    #[tokio::test]
    async fn begin_then_commit_success() {
        let store = InMemorySessionStore::new();
        let s = store.create_session("u1", None).await.unwrap();
        store
            .append_images(&s.id, "u1", vec!["https://img/1.jpg".into()])
            .await
            .unwrap();

        let running = begin_generation(&store, &s.id, "u1").await.unwrap();
        assert_eq!(running.status, SessionStatus::Generating);
        assert_eq!(
            store.get_session(&s.id, "u1").await.unwrap().status,
            SessionStatus::Generating
        );

        commit_success(&store, &running, &deck("Osmosis"), None)
            .await
            .unwrap();
        let done = store.get_session(&s.id, "u1").await.unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.topic.as_deref(), Some("Osmosis"));
        assert_eq!(done.title.as_deref(), Some("Osmosis"));
        assert_eq!(done.flashcards.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn explicit_title_wins_and_blank_topic_is_untitled() {
        let store = InMemorySessionStore::new();
        let s = store.create_session("u1", None).await.unwrap();
        store
            .append_images(&s.id, "u1", vec!["https://img/1.jpg".into()])
            .await
            .unwrap();
        let running = begin_generation(&store, &s.id, "u1").await.unwrap();

        commit_success(&store, &running, &deck("  "), None).await.unwrap();
        let done = store.get_session(&s.id, "u1").await.unwrap();
        assert_eq!(done.title.as_deref(), Some(UNTITLED));

        let running = begin_generation(&store, &s.id, "u1").await.unwrap();
        commit_success(&store, &running, &deck("Osmosis"), Some("Biology week 3"))
            .await
            .unwrap();
        let done = store.get_session(&s.id, "u1").await.unwrap();
        assert_eq!(done.title.as_deref(), Some("Biology week 3"));
    }

    #[tokio::test]
    async fn commit_failure_sets_error() {
        let store = InMemorySessionStore::new();
        let s = store.create_session("u1", None).await.unwrap();
        store
            .append_images(&s.id, "u1", vec!["https://img/1.jpg".into()])
            .await
            .unwrap();
        let running = begin_generation(&store, &s.id, "u1").await.unwrap();

        commit_failure(&store, &running).await.unwrap();
        let after = store.get_session(&s.id, "u1").await.unwrap();
        assert_eq!(after.status, SessionStatus::Error);
        assert!(after.topic.is_none() && after.flashcards.is_none());
    }
}
