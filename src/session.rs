//! In-memory analysis sessions for the HTTP API.
//!
//! Each session holds at most one analysis result plus the syntheses
//! already produced from it, keyed by trimmed question text. A new result
//! replaces the previous one, drops its syntheses and bumps the session's
//! generation; a synthesis computed from an older generation is never
//! cached. Sessions never share state and are not persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::AnalysisResult;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub result: Option<AnalysisResult>,
    /// Number of results stored so far; identifies the current one.
    pub generation: u64,
    syntheses: HashMap<String, String>,
}

/// Summary returned to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub has_result: bool,
    pub cached_syntheses: usize,
}

impl Session {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            result: None,
            generation: 0,
            syntheses: HashMap::new(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            created_at: self.created_at,
            has_result: self.result.is_some(),
            cached_syntheses: self.syntheses.len(),
        }
    }

    pub fn synthesis(&self, question: &str) -> Option<&str> {
        self.syntheses.get(question.trim()).map(String::as_str)
    }
}

/// Shared, cloneable handle to every live session.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> SessionInfo {
        let session = Session::new();
        let info = session.info();
        self.inner.write().await.insert(session.id, session);
        info
    }

    pub async fn get(&self, id: Uuid) -> Option<Session> {
        self.inner.read().await.get(&id).cloned()
    }

    pub async fn exists(&self, id: Uuid) -> bool {
        self.inner.read().await.contains_key(&id)
    }

    /// Stores a fresh result and returns its generation, or `None` for an
    /// unknown session.
    pub async fn set_result(&self, id: Uuid, result: AnalysisResult) -> Option<u64> {
        let mut sessions = self.inner.write().await;
        let session = sessions.get_mut(&id)?;
        session.result = Some(result);
        session.generation += 1;
        session.syntheses.clear();
        Some(session.generation)
    }

    pub async fn cached_synthesis(&self, id: Uuid, question: &str) -> Option<String> {
        let sessions = self.inner.read().await;
        sessions
            .get(&id)
            .and_then(|s| s.synthesis(question))
            .map(str::to_string)
    }

    /// Caches a synthesis computed from result `generation`. Refused (false)
    /// when the session is gone or its result has been replaced since.
    pub async fn store_synthesis(&self, id: Uuid, generation: u64, question: &str, markdown: String) -> bool {
        let mut sessions = self.inner.write().await;
        match sessions.get_mut(&id) {
            Some(session) if session.generation == generation => {
                session
                    .syntheses
                    .insert(question.trim().to_string(), markdown);
                true
            }
            _ => false,
        }
    }

    pub async fn remove(&self, id: Uuid) -> bool {
        self.inner.write().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SystematicResult;

    fn result() -> AnalysisResult {
        AnalysisResult {
            systematic: Some(SystematicResult::default()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.create().await;
        let b = store.create().await;
        assert_ne!(a.id, b.id);

        let generation = store.set_result(a.id, result()).await.unwrap();
        assert!(store.store_synthesis(a.id, generation, "Objective?", "md".into()).await);

        let b_session = store.get(b.id).await.unwrap();
        assert!(b_session.result.is_none());
        assert!(store.cached_synthesis(b.id, "Objective?").await.is_none());
        assert_eq!(
            store.cached_synthesis(a.id, "  Objective? ").await.as_deref(),
            Some("md")
        );
    }

    #[tokio::test]
    async fn new_result_drops_cached_syntheses() {
        let store = SessionStore::new();
        let s = store.create().await;
        let first = store.set_result(s.id, result()).await.unwrap();
        store.store_synthesis(s.id, first, "Q", "old".into()).await;
        let second = store.set_result(s.id, result()).await.unwrap();
        assert_eq!(second, first + 1);
        assert!(store.cached_synthesis(s.id, "Q").await.is_none());
    }

    #[tokio::test]
    async fn synthesis_of_replaced_result_is_not_cached() {
        let store = SessionStore::new();
        let s = store.create().await;
        let stale = store.set_result(s.id, result()).await.unwrap();
        let current = store.set_result(s.id, result()).await.unwrap();

        assert!(!store.store_synthesis(s.id, stale, "Q", "stale".into()).await);
        assert!(store.cached_synthesis(s.id, "Q").await.is_none());
        assert!(store.store_synthesis(s.id, current, "Q", "fresh".into()).await);
        assert_eq!(store.cached_synthesis(s.id, "Q").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        assert!(store.set_result(id, result()).await.is_none());
        assert!(!store.store_synthesis(id, 0, "Q", "x".into()).await);
        assert!(!store.remove(id).await);

        let s = store.create().await;
        assert!(store.remove(s.id).await);
        assert!(store.is_empty().await);
    }
}
