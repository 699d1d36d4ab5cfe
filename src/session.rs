//! Keyed, in-memory store of upload sessions.
//!
//! A session is one upload-to-result lifecycle. The store is the only shared
//! mutable state in the service; entries are removed by TTL eviction.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::SkygramError;

/// Pipeline stages that can fall back to a placeholder.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Naming what the cloud looks like
    Recognition,
    /// Rendering the cloud art
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Recognition => write!(f, "recognition"),
            Stage::Generation => write!(f, "generation"),
        }
    }
}

/// Opaque, collision-resistant session identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from a URL segment. Anything that isn't a UUID is rejected,
    /// which also keeps path segments out of filenames.
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// One upload and everything derived from it.
#[derive(Clone, Debug)]
pub struct Session {
    /// Unique key
    pub id: SessionId,
    /// When the upload landed
    pub created_at: DateTime<Utc>,
    /// Where the original bytes live
    pub original_path: PathBuf,
    /// Content type sniffed from the original bytes
    pub original_mime: &'static str,
    /// Where the generated art lives, once written
    pub generated_path: Option<PathBuf>,
    /// What the cloud looks like
    pub detected_object: Option<String>,
    /// Joke handed back with the result
    pub caption: Option<String>,
    /// Stages that were substituted with a fallback value
    pub fallbacks: Vec<Stage>,
    /// When the last stage finished; unset while the upload is still running
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// New session for a freshly stored original.
    pub fn new(id: SessionId, original_path: PathBuf, original_mime: &'static str) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            original_path,
            original_mime,
            generated_path: None,
            detected_object: None,
            caption: None,
            fallbacks: Vec::new(),
            completed_at: None,
        }
    }

    /// Filename of the generated art, as used in URLs.
    pub fn generated_filename(&self) -> Option<&str> {
        self.generated_path
            .as_deref()
            .and_then(|path| path.file_name())
            .and_then(|name| name.to_str())
    }

    /// Every file this session owns.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.original_path.clone()];
        if let Some(generated) = &self.generated_path {
            files.push(generated.clone());
        }
        files
    }

    /// Sessions still being processed never expire; the TTL runs from completion.
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Some(completed_at) = self.completed_at else {
            return false;
        };
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => completed_at + ttl <= now,
            // a TTL too large for chrono never expires
            Err(_) => false,
        }
    }
}

/// Shared session map. Cloning hands out another handle to the same map.
#[derive(Clone, Debug, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
}

impl SessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session, refusing to alias an existing id.
    pub async fn insert(&self, session: Session) -> Result<(), SkygramError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id) {
            return Err(SkygramError::InternalServerError(format!(
                "session id collision: {}",
                session.id
            )));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    /// Snapshot of a session.
    pub async fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Applies `update` to a live session and returns the new snapshot.
    pub async fn update<F>(&self, id: &SessionId, update: F) -> Result<Session, SkygramError>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SkygramError::NotFound(format!("session {id}")))?;
        update(session);
        Ok(session.clone())
    }

    /// Drops a session, handing it back so its files can be cleaned up.
    pub async fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }

    /// Removes and returns every finished session completed more than `ttl`
    /// before `now`.
    pub async fn evict_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<Session> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .values()
            .filter(|session| session.is_expired(now, ttl))
            .map(|session| session.id)
            .collect();
        expired
            .iter()
            .filter_map(|id| sessions.remove(id))
            .collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// True when no sessions are live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
