//! Bridge sessions
//!
//! The bridge issues its own `Mcp-Session-Id` to clients and remembers the
//! backend's session id separately, so a backend restart never leaks a new
//! identity to the client.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A client session bound to one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub deployment_id: Uuid,
    pub protocol_version: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub backend_session_id: Option<String>,
}

pub trait SessionStore: Send + Sync {
    /// Reuse `requested` if it exists and belongs to `deployment_id`, otherwise
    /// start a new session. Touches `last_seen_at` either way.
    fn resolve(&self, deployment_id: Uuid, requested: Option<&str>, protocol_version: &str)
        -> Session;

    fn get(&self, id: &str) -> Option<Session>;

    /// Remember the backend's own session id
    fn set_backend_session(&self, id: &str, backend_session_id: String);

    /// Drop every session of a deployment
    fn purge_deployment(&self, deployment_id: Uuid) -> usize;

    /// Drop sessions idle past the expiry window
    fn sweep_expired(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory session store with idle expiry
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    idle_timeout: chrono::Duration,
}

impl InMemorySessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout: chrono::Duration::from_std(idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        }
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_seen_at > self.idle_timeout
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl SessionStore for InMemorySessionStore {
    fn resolve(
        &self,
        deployment_id: Uuid,
        requested: Option<&str>,
        protocol_version: &str,
    ) -> Session {
        let now = Utc::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());

        if let Some(id) = requested {
            let reusable = sessions
                .get(id)
                .is_some_and(|s| s.deployment_id == deployment_id && !self.is_expired(s, now));
            if reusable {
                if let Some(session) = sessions.get_mut(id) {
                    session.last_seen_at = now;
                    session.protocol_version = protocol_version.to_string();
                    return session.clone();
                }
            }
        }

        let session = Session {
            id: Uuid::new_v4().simple().to_string(),
            deployment_id,
            protocol_version: protocol_version.to_string(),
            created_at: now,
            last_seen_at: now,
            backend_session_id: None,
        };
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    fn get(&self, id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(id).cloned()
    }

    fn set_backend_session(&self, id: &str, backend_session_id: String) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get_mut(id) {
            session.backend_session_id = Some(backend_session_id);
        }
    }

    fn purge_deployment(&self, deployment_id: Uuid) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| s.deployment_id != deployment_id);
        before - sessions.len()
    }

    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        before - sessions.len()
    }

    fn len(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }
}
