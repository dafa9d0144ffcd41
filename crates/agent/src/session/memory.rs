//! In-memory session store for tests and ephemeral runs.

use super::{SessionData, SessionStore};
use async_trait::async_trait;
use krill::{Error, ErrorKind, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, data: &SessionData) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&data.id) {
            return Err(Error::with_detail(
                ErrorKind::AlreadyExists,
                "Session already exists",
                data.id.clone(),
            ));
        }
        sessions.insert(data.id.clone(), data.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<SessionData> {
        self.sessions.read().get(id).cloned().ok_or_else(|| {
            Error::with_detail(ErrorKind::NotFound, "Session not found", id.to_string())
        })
    }

    async fn update(&self, data: &SessionData) -> Result<()> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&data.id) {
            Some(slot) => {
                *slot = data.clone();
                Ok(())
            }
            None => Err(Error::with_detail(
                ErrorKind::NotFound,
                "Session not found",
                data.id.clone(),
            )),
        }
    }

    async fn remove(&self, id: &str) -> Result<()> {
        match self.sessions.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(Error::with_detail(
                ErrorKind::NotFound,
                "Session not found",
                id.to_string(),
            )),
        }
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionData>> {
        let mut sessions: Vec<SessionData> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| std::cmp::Reverse(s.updated_at));
        Ok(sessions)
    }

    async fn remove_expired(&self, ttl_seconds: i64) -> Result<usize> {
        let cutoff = krill::timestamp_ms() - ttl_seconds * 1000;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.updated_at >= cutoff);
        Ok(before - sessions.len())
    }
}
