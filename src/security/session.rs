//! Session manager. In-memory only; sessions are not persisted across
//! restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{AppError, Result};

use super::permissions::Role;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory table keyed by session id, with a background reaper that
/// expires idle sessions.
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    session_timeout: Duration,
    cleanup_interval: Duration,
    cancel: RwLock<Option<CancellationToken>>,
    reaper: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(session_timeout: Duration, cleanup_interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            session_timeout,
            cleanup_interval,
            cancel: RwLock::new(None),
            reaper: RwLock::new(None),
        });
        manager.clone().spawn_reaper();
        manager
    }

    fn spawn_reaper(self: Arc<Self>) {
        let token = CancellationToken::new();
        *self.cancel.write() = Some(token.clone());
        let sessions = self.sessions.clone();
        let interval = self.cleanup_interval;
        let timeout = self.session_timeout;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                let now = Utc::now();
                let before = sessions.read().len();
                sessions.write().retain(|_, s| {
                    (now - s.last_activity).num_seconds() <= timeout.as_secs() as i64
                });
                let removed = before - sessions.read().len();
                if removed > 0 {
                    info!(removed, "reaped idle sessions");
                }
            }
        });
        *self.reaper.write() = Some(handle);
    }

    pub fn create_session(&self, user_id: &str, role: Role) -> Result<Session> {
        if user_id.trim().is_empty() {
            return Err(AppError::InvalidParam("user_id must not be empty".to_string()));
        }
        let now = Utc::now();
        let session = Session {
            id: generate_session_id(),
            user_id: user_id.to_string(),
            role,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(self.session_timeout.as_secs() as i64),
            last_activity: now,
        };
        self.sessions.write().insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Returns `NotFound` for empty, unknown, or expired ids.
    pub fn validate_session(&self, id: &str) -> Result<Session> {
        if id.is_empty() {
            return Err(AppError::NotFound("session".to_string()));
        }
        let session = self
            .sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {id}")))?;
        if session.is_expired(Utc::now()) {
            self.sessions.write().remove(id);
            return Err(AppError::NotFound(format!("session {id}")));
        }
        Ok(session)
    }

    /// Silently no-ops on unknown or empty ids.
    pub fn update_activity(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        if let Some(session) = self.sessions.write().get_mut(id) {
            session.last_activity = Utc::now();
        }
    }

    pub fn get_session_by_user_id(&self, user_id: &str) -> Vec<Session> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn invalidate_user_sessions(&self, user_id: &str) {
        self.sessions.write().retain(|_, s| s.user_id != user_id);
    }

    pub fn get_session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Terminates the reaper; subsequent calls are safe.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.write().take() {
            token.cancel();
        }
    }
}

fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_rejects_empty_user_id() {
        let manager = SessionManager::new(Duration::from_secs(60), Duration::from_secs(3600));
        assert!(matches!(
            manager.create_session("", Role::Viewer),
            Err(AppError::InvalidParam(_))
        ));
        manager.stop();
    }

    #[test]
    fn validate_session_rejects_empty_and_unknown() {
        let manager = SessionManager::new(Duration::from_secs(60), Duration::from_secs(3600));
        assert!(matches!(manager.validate_session(""), Err(AppError::NotFound(_))));
        assert!(matches!(manager.validate_session("nope"), Err(AppError::NotFound(_))));
        manager.stop();
    }

    #[test]
    fn session_ids_are_unique() {
        let manager = SessionManager::new(Duration::from_secs(60), Duration::from_secs(3600));
        let a = manager.create_session("alice", Role::Viewer).unwrap();
        let b = manager.create_session("alice", Role::Viewer).unwrap();
        assert_ne!(a.id, b.id);
        manager.stop();
    }

    #[test]
    fn update_activity_on_unknown_id_is_a_noop() {
        let manager = SessionManager::new(Duration::from_secs(60), Duration::from_secs(3600));
        manager.update_activity("unknown");
        manager.update_activity("");
        manager.stop();
    }

    #[test]
    fn invalidate_user_sessions_removes_all_of_theirs() {
        let manager = SessionManager::new(Duration::from_secs(60), Duration::from_secs(3600));
        manager.create_session("alice", Role::Viewer).unwrap();
        manager.create_session("alice", Role::Operator).unwrap();
        manager.create_session("bob", Role::Viewer).unwrap();
        manager.invalidate_user_sessions("alice");
        assert!(manager.get_session_by_user_id("alice").is_empty());
        assert_eq!(manager.get_session_by_user_id("bob").len(), 1);
        manager.stop();
    }

    #[tokio::test]
    async fn expired_session_is_reaped_and_validate_returns_not_found() {
        let manager = SessionManager::new(Duration::from_secs(1), Duration::from_millis(50));
        let session = manager.create_session("alice", Role::Viewer).unwrap();
        assert!(manager.validate_session(&session.id).is_ok());

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(matches!(
            manager.validate_session(&session.id),
            Err(AppError::NotFound(_))
        ));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.get_session_count(), 0);
        manager.stop();
    }
}
