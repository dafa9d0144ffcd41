//! Session lifecycle management over a [`SessionStore`].

use super::{SessionData, SessionState, SessionStore};
use krill::{Error, ErrorKind, Result};
use serde_json::{Value, json};

/// Default token ceiling above which a parent session is not forked.
pub const DEFAULT_PARENT_FORK_MAX_TOKENS: u64 = 100_000;

/// Result of a fork attempt. When the parent is over the token ceiling,
/// no fork happens and `warning` explains why; the caller starts fresh.
#[derive(Debug)]
pub struct ForkOutcome {
    pub forked: bool,
    pub session: Option<SessionData>,
    pub warning: Option<String>,
}

pub struct SessionManager {
    store: Box<dyn SessionStore>,
    parent_fork_max_tokens: u64,
}

impl SessionManager {
    pub fn new(store: Box<dyn SessionStore>) -> Self {
        SessionManager {
            store,
            parent_fork_max_tokens: DEFAULT_PARENT_FORK_MAX_TOKENS,
        }
    }

    pub fn with_fork_limit(mut self, parent_fork_max_tokens: u64) -> Self {
        self.parent_fork_max_tokens = parent_fork_max_tokens;
        self
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        device_id: &str,
        channel: Option<&str>,
    ) -> Result<SessionData> {
        let now = krill::timestamp_ms();
        let data = SessionData {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            channel: channel.map(str::to_string),
            state: SessionState::Active,
            metadata: json!({}),
            auto_compaction_count: 0,
            total_tokens: 0,
            parent_session_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.create(&data).await?;
        log::info!("Created session {} for user {}", data.id, user_id);
        Ok(data)
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionData> {
        self.store.get(id).await
    }

    /// Heartbeat. Renews `Active` only while the session is already
    /// active; idle sessions keep their state (reopening is an explicit
    /// policy decision) and closed sessions reject the touch.
    pub async fn touch_session(&self, id: &str) -> Result<SessionData> {
        let mut data = self.store.get(id).await?;
        match data.state {
            SessionState::Active | SessionState::Idle => {
                data.updated_at = krill::timestamp_ms();
                self.store.update(&data).await?;
                Ok(data)
            }
            SessionState::Closed => Err(Error::with_detail(
                ErrorKind::Session,
                "Cannot heartbeat a closed session",
                id.to_string(),
            )),
        }
    }

    /// Advance the session state. Transitions only move toward `Closed`.
    pub async fn set_state(&self, id: &str, state: SessionState) -> Result<SessionData> {
        let mut data = self.store.get(id).await?;
        if state.rank() < data.state.rank() {
            return Err(Error::with_detail(
                ErrorKind::Session,
                "Session state transitions are monotonic",
                format!("{:?} -> {:?}", data.state, state),
            ));
        }
        data.state = state;
        data.updated_at = krill::timestamp_ms();
        self.store.update(&data).await?;
        Ok(data)
    }

    /// Close and remove the session.
    pub async fn end_session(&self, id: &str) -> Result<()> {
        // Verify it exists first so the error is NotFound, not a silent
        // no-op.
        self.store.get(id).await?;
        self.store.remove(id).await?;
        log::info!("Ended session {id}");
        Ok(())
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionData>> {
        self.store.list(user_id).await
    }

    pub async fn cleanup_expired(&self, ttl_seconds: i64) -> Result<usize> {
        let removed = self.store.remove_expired(ttl_seconds).await?;
        if removed > 0 {
            log::info!("Expired {removed} stale session(s)");
        }
        Ok(removed)
    }

    pub async fn update_metadata(&self, id: &str, metadata: Value) -> Result<SessionData> {
        let mut data = self.store.get(id).await?;
        data.metadata = metadata;
        data.updated_at = krill::timestamp_ms();
        self.store.update(&data).await?;
        Ok(data)
    }

    pub async fn add_tokens(&self, id: &str, tokens: u64) -> Result<()> {
        let mut data = self.store.get(id).await?;
        data.total_tokens += tokens;
        data.updated_at = krill::timestamp_ms();
        self.store.update(&data).await
    }

    /// Set a context variable in the session metadata.
    pub async fn context_set(&self, id: &str, key: &str, value: Value) -> Result<()> {
        let mut data = self.store.get(id).await?;
        if !data.metadata.is_object() {
            data.metadata = json!({});
        }
        let context = data
            .metadata
            .as_object_mut()
            .and_then(|m| {
                if !m.contains_key("context") {
                    m.insert("context".into(), json!({}));
                }
                m.get_mut("context")?.as_object_mut()
            })
            .ok_or_else(|| Error::new(ErrorKind::Session, "Session context is not an object"))?;
        context.insert(key.to_string(), value);
        data.updated_at = krill::timestamp_ms();
        self.store.update(&data).await
    }

    pub async fn context_get(&self, id: &str, key: Option<&str>) -> Result<Value> {
        let data = self.store.get(id).await?;
        let context = data.metadata.get("context").cloned().unwrap_or_else(|| json!({}));
        match key {
            Some(key) => Ok(context.get(key).cloned().unwrap_or(Value::Null)),
            None => Ok(context),
        }
    }

    pub async fn context_clear(&self, id: &str) -> Result<()> {
        let mut data = self.store.get(id).await?;
        if let Some(map) = data.metadata.as_object_mut() {
            map.remove("context");
        }
        data.updated_at = krill::timestamp_ms();
        self.store.update(&data).await
    }

    /// Fork a session, inheriting its metadata and channel. A parent
    /// whose total tokens exceed the fork ceiling is not forked; the
    /// caller should begin a fresh session instead.
    pub async fn fork_session(&self, parent_id: &str) -> Result<ForkOutcome> {
        let parent = self.store.get(parent_id).await?;

        if parent.total_tokens > self.parent_fork_max_tokens {
            log::warn!(
                "Skipping fork of session {parent_id}: {} tokens exceeds limit {}",
                parent.total_tokens,
                self.parent_fork_max_tokens
            );
            return Ok(ForkOutcome {
                forked: false,
                session: None,
                warning: Some(format!(
                    "parent session has {} tokens, above the fork limit of {}",
                    parent.total_tokens, self.parent_fork_max_tokens
                )),
            });
        }

        let now = krill::timestamp_ms();
        let child = SessionData {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: parent.user_id.clone(),
            device_id: parent.device_id.clone(),
            channel: parent.channel.clone(),
            state: SessionState::Active,
            metadata: parent.metadata.clone(),
            auto_compaction_count: 0,
            total_tokens: 0,
            parent_session_id: Some(parent.id.clone()),
            created_at: now,
            updated_at: now,
        };
        self.store.create(&child).await?;
        log::info!("Forked session {} from {}", child.id, parent_id);
        Ok(ForkOutcome {
            forked: true,
            session: Some(child),
            warning: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::InMemorySessionStore;
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Box::new(InMemorySessionStore::new()))
    }

    #[tokio::test]
    async fn create_and_get() {
        let mgr = manager();
        let session = mgr.create_session("alice", "dev-1", Some("telegram")).await.unwrap();
        let loaded = mgr.get_session(&session.id).await.unwrap();
        assert_eq!(loaded.user_id, "alice");
        assert_eq!(loaded.state, SessionState::Active);
    }

    #[tokio::test]
    async fn state_transitions_are_monotonic() {
        let mgr = manager();
        let session = mgr.create_session("alice", "dev-1", None).await.unwrap();

        mgr.set_state(&session.id, SessionState::Idle).await.unwrap();
        let err = mgr.set_state(&session.id, SessionState::Active).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Session);

        mgr.set_state(&session.id, SessionState::Closed).await.unwrap();
        let err = mgr.set_state(&session.id, SessionState::Idle).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Session);
    }

    #[tokio::test]
    async fn heartbeat_keeps_idle_sessions_idle() {
        let mgr = manager();
        let session = mgr.create_session("alice", "dev-1", None).await.unwrap();

        let touched = mgr.touch_session(&session.id).await.unwrap();
        assert_eq!(touched.state, SessionState::Active);

        mgr.set_state(&session.id, SessionState::Idle).await.unwrap();
        let touched = mgr.touch_session(&session.id).await.unwrap();
        assert_eq!(touched.state, SessionState::Idle);

        mgr.set_state(&session.id, SessionState::Closed).await.unwrap();
        assert!(mgr.touch_session(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn end_session_removes_it() {
        let mgr = manager();
        let session = mgr.create_session("alice", "dev-1", None).await.unwrap();
        mgr.end_session(&session.id).await.unwrap();
        assert_eq!(
            mgr.get_session(&session.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(mgr.end_session("ghost").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn context_set_get_clear() {
        let mgr = manager();
        let session = mgr.create_session("alice", "dev-1", None).await.unwrap();

        mgr.context_set(&session.id, "project", json!("krill")).await.unwrap();
        mgr.context_set(&session.id, "depth", json!(3)).await.unwrap();

        assert_eq!(mgr.context_get(&session.id, Some("project")).await.unwrap(), json!("krill"));
        let all = mgr.context_get(&session.id, None).await.unwrap();
        assert_eq!(all["depth"], json!(3));

        mgr.context_clear(&session.id).await.unwrap();
        assert_eq!(mgr.context_get(&session.id, Some("project")).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn fork_inherits_metadata_and_links_parent() {
        let mgr = manager();
        let parent = mgr.create_session("alice", "dev-1", Some("slack")).await.unwrap();
        mgr.context_set(&parent.id, "topic", json!("rust")).await.unwrap();

        let outcome = mgr.fork_session(&parent.id).await.unwrap();
        assert!(outcome.forked);
        let child = outcome.session.unwrap();
        assert_eq!(child.parent_session_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(child.channel.as_deref(), Some("slack"));
        assert_eq!(child.metadata["context"]["topic"], json!("rust"));
        assert_eq!(child.total_tokens, 0);
    }

    #[tokio::test]
    async fn oversized_parent_is_not_forked() {
        let mgr = manager();
        let parent = mgr.create_session("alice", "dev-1", None).await.unwrap();
        mgr.add_tokens(&parent.id, DEFAULT_PARENT_FORK_MAX_TOKENS + 1).await.unwrap();

        let outcome = mgr.fork_session(&parent.id).await.unwrap();
        assert!(!outcome.forked);
        assert!(outcome.session.is_none());
        assert!(outcome.warning.unwrap().contains("fork limit"));
    }
}
