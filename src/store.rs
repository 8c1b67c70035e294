//! Session persistence boundary.
//!
//! The generation pipeline never owns storage: it talks to a
//! [`SessionStore`], and every operation is keyed by session id *and* user id
//! so ownership is enforced by the store. [`InMemorySessionStore`] backs the
//! CLI and the test-suite; a hosted deployment implements the trait over its
//! own database.

use crate::error::StoreError;
use crate::output::Flashcard;
use crate::session::{Session, SessionStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Maximum number of images a session may hold.
pub const MAX_IMAGES_PER_SESSION: usize = 50;

/// An abstract store for study sessions.
///
/// Implementations must give read-your-writes consistency for a single
/// session document. Every method except `create_session` and
/// `list_sessions` fails with [`StoreError::NotFound`] when the session is
/// absent or not owned by `user_id`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a `pending` session with no images.
    async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Session, StoreError>;

    /// Fetch one session owned by `user_id`.
    async fn get_session(&self, session_id: &str, user_id: &str) -> Result<Session, StoreError>;

    /// All sessions of `user_id`, newest first.
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError>;

    /// Overwrite the status.
    async fn update_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError>;

    /// Write flashcards, topic and status together. `title` is only written
    /// when present.
    async fn commit_flashcards(
        &self,
        session_id: &str,
        user_id: &str,
        flashcards: Vec<Flashcard>,
        topic: String,
        title: Option<String>,
        status: SessionStatus,
    ) -> Result<(), StoreError>;

    /// Append image references; fails without writing when the total would
    /// exceed [`MAX_IMAGES_PER_SESSION`]. Returns the new image count.
    async fn append_images(
        &self,
        session_id: &str,
        user_id: &str,
        image_urls: Vec<String>,
    ) -> Result<usize, StoreError>;
}

/// Validate one image reference before it is stored.
///
/// Inline uploads must be `data:image/…` URLs; anything else is accepted as a
/// remote URL or local path and checked when it is loaded.
pub fn validate_image_ref(reference: &str) -> Result<(), StoreError> {
    let r = reference.trim();
    if r.is_empty() {
        return Err(StoreError::InvalidImage {
            reference: reference.to_string(),
            reason: "empty reference".into(),
        });
    }
    if r.starts_with("data:") && !r.starts_with("data:image/") {
        return Err(StoreError::InvalidImage {
            reference: r.chars().take(40).collect(),
            reason: "inline uploads must be data:image/… URLs".into(),
        });
    }
    Ok(())
}

/// A process-local [`SessionStore`].
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions across all users.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

fn require_user(user_id: &str) -> Result<(), StoreError> {
    if user_id.trim().is_empty() {
        Err(StoreError::Unauthenticated)
    } else {
        Ok(())
    }
}

fn owned_mut<'a>(
    sessions: &'a mut HashMap<String, Session>,
    session_id: &str,
    user_id: &str,
) -> Result<&'a mut Session, StoreError> {
    require_user(user_id)?;
    sessions
        .get_mut(session_id)
        .filter(|s| s.is_owned_by(user_id))
        .ok_or_else(|| StoreError::NotFound {
            session_id: session_id.to_string(),
        })
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Session, StoreError> {
        require_user(user_id)?;
        let session = Session::new(user_id, title);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        debug!("Created session {} for {}", session.id, user_id);
        Ok(session)
    }

    async fn get_session(&self, session_id: &str, user_id: &str) -> Result<Session, StoreError> {
        require_user(user_id)?;
        self.sessions
            .read()
            .await
            .get(session_id)
            .filter(|s| s.is_owned_by(user_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        if user_id.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_owned_by(user_id))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update_status(
        &self,
        session_id: &str,
        user_id: &str,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        owned_mut(&mut sessions, session_id, user_id)?.status = status;
        Ok(())
    }

    async fn commit_flashcards(
        &self,
        session_id: &str,
        user_id: &str,
        flashcards: Vec<Flashcard>,
        topic: String,
        title: Option<String>,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let session = owned_mut(&mut sessions, session_id, user_id)?;
        session.flashcards = Some(flashcards);
        session.topic = Some(topic);
        if let Some(title) = title {
            session.title = Some(title);
        }
        session.status = status;
        Ok(())
    }

    async fn append_images(
        &self,
        session_id: &str,
        user_id: &str,
        image_urls: Vec<String>,
    ) -> Result<usize, StoreError> {
        for url in &image_urls {
            validate_image_ref(url)?;
        }
        let mut sessions = self.sessions.write().await;
        let session = owned_mut(&mut sessions, session_id, user_id)?;
        let existing = session.image_urls.len();
        if existing + image_urls.len() > MAX_IMAGES_PER_SESSION {
            return Err(StoreError::TooManyImages {
                existing,
                adding: image_urls.len(),
                limit: MAX_IMAGES_PER_SESSION,
            });
        }
        session
            .image_urls
            .extend(image_urls.into_iter().map(|u| u.trim().to_string()));
        Ok(session.image_urls.len())
    }
}
