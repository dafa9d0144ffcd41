//! SQLite-backed session store.

use super::{SessionData, SessionState, SessionStore};
use async_trait::async_trait;
use krill::{Error, ErrorKind, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::path::Path;

/// Sessions in a SQLite file under the gateway data dir. Statements are
/// short and run under a connection mutex; nothing here blocks long
/// enough to matter on the runtime's blocking budget.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

fn db_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::with_detail(ErrorKind::Database, context.to_string(), e.to_string())
}

fn state_to_str(state: SessionState) -> &'static str {
    match state {
        SessionState::Active => "active",
        SessionState::Idle => "idle",
        SessionState::Closed => "closed",
    }
}

fn state_from_str(s: &str) -> SessionState {
    match s {
        "idle" => SessionState::Idle,
        "closed" => SessionState::Closed,
        _ => SessionState::Active,
    }
}

impl SqliteSessionStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| db_err("Failed to open session database", e))?;
        let store = SqliteSessionStore { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| db_err("Failed to open session database", e))?;
        let store = SqliteSessionStore { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY NOT NULL,
                    user_id TEXT NOT NULL,
                    device_id TEXT NOT NULL,
                    channel TEXT,
                    state TEXT NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    auto_compaction_count INTEGER NOT NULL DEFAULT 0,
                    total_tokens INTEGER NOT NULL DEFAULT 0,
                    parent_session_id TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
                CREATE INDEX IF NOT EXISTS idx_sessions_updated_at ON sessions(updated_at);",
            )
            .map_err(|e| db_err("Failed to initialize session schema", e))
    }

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionData> {
        let state: String = row.get("state")?;
        let metadata: String = row.get("metadata")?;
        Ok(SessionData {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            device_id: row.get("device_id")?,
            channel: row.get("channel")?,
            state: state_from_str(&state),
            metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            auto_compaction_count: row.get("auto_compaction_count")?,
            total_tokens: row.get::<_, i64>("total_tokens")? as u64,
            parent_session_id: row.get("parent_session_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, data: &SessionData) -> Result<()> {
        let metadata = serde_json::to_string(&data.metadata)?;
        let inserted = self
            .conn
            .lock()
            .execute(
                "INSERT OR IGNORE INTO sessions
                 (id, user_id, device_id, channel, state, metadata,
                  auto_compaction_count, total_tokens, parent_session_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    data.id,
                    data.user_id,
                    data.device_id,
                    data.channel,
                    state_to_str(data.state),
                    metadata,
                    data.auto_compaction_count,
                    data.total_tokens as i64,
                    data.parent_session_id,
                    data.created_at,
                    data.updated_at,
                ],
            )
            .map_err(|e| db_err("Failed to insert session", e))?;

        if inserted == 0 {
            return Err(Error::with_detail(
                ErrorKind::AlreadyExists,
                "Session already exists",
                data.id.clone(),
            ));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<SessionData> {
        self.conn
            .lock()
            .query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                params![id],
                Self::row_to_session,
            )
            .optional()
            .map_err(|e| db_err("Failed to query session", e))?
            .ok_or_else(|| {
                Error::with_detail(ErrorKind::NotFound, "Session not found", id.to_string())
            })
    }

    async fn update(&self, data: &SessionData) -> Result<()> {
        let metadata = serde_json::to_string(&data.metadata)?;
        let updated = self
            .conn
            .lock()
            .execute(
                "UPDATE sessions SET
                 user_id = ?2, device_id = ?3, channel = ?4, state = ?5, metadata = ?6,
                 auto_compaction_count = ?7, total_tokens = ?8, parent_session_id = ?9,
                 updated_at = ?10
                 WHERE id = ?1",
                params![
                    data.id,
                    data.user_id,
                    data.device_id,
                    data.channel,
                    state_to_str(data.state),
                    metadata,
                    data.auto_compaction_count,
                    data.total_tokens as i64,
                    data.parent_session_id,
                    data.updated_at,
                ],
            )
            .map_err(|e| db_err("Failed to update session", e))?;

        if updated == 0 {
            return Err(Error::with_detail(
                ErrorKind::NotFound,
                "Session not found",
                data.id.clone(),
            ));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .map_err(|e| db_err("Failed to delete session", e))?;

        if removed == 0 {
            return Err(Error::with_detail(
                ErrorKind::NotFound,
                "Session not found",
                id.to_string(),
            ));
        }
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionData>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM sessions WHERE user_id = ?1 ORDER BY updated_at DESC")
            .map_err(|e| db_err("Failed to prepare session list", e))?;
        let rows = stmt
            .query_map(params![user_id], Self::row_to_session)
            .map_err(|e| db_err("Failed to list sessions", e))?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row.map_err(|e| db_err("Failed to read session row", e))?);
        }
        Ok(sessions)
    }

    async fn remove_expired(&self, ttl_seconds: i64) -> Result<usize> {
        let cutoff = krill::timestamp_ms() - ttl_seconds * 1000;
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM sessions WHERE updated_at < ?1", params![cutoff])
            .map_err(|e| db_err("Failed to expire sessions", e))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(id: &str, user: &str) -> SessionData {
        SessionData {
            id: id.to_string(),
            user_id: user.to_string(),
            device_id: "dev-1".into(),
            channel: Some("telegram".into()),
            state: SessionState::Active,
            metadata: json!({"context": {}}),
            auto_compaction_count: 0,
            total_tokens: 0,
            parent_session_id: None,
            created_at: krill::timestamp_ms(),
            updated_at: krill::timestamp_ms(),
        }
    }

    #[tokio::test]
    async fn create_get_update_remove_round_trip() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store.create(&sample("s1", "alice")).await.unwrap();

        let mut loaded = store.get("s1").await.unwrap();
        assert_eq!(loaded.user_id, "alice");
        assert_eq!(loaded.state, SessionState::Active);
        assert_eq!(loaded.channel.as_deref(), Some("telegram"));

        loaded.state = SessionState::Idle;
        loaded.total_tokens = 1234;
        store.update(&loaded).await.unwrap();
        let reloaded = store.get("s1").await.unwrap();
        assert_eq!(reloaded.state, SessionState::Idle);
        assert_eq!(reloaded.total_tokens, 1234);

        store.remove("s1").await.unwrap();
        assert_eq!(store.get("s1").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn duplicate_create_is_already_exists() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store.create(&sample("s1", "alice")).await.unwrap();
        let err = store.create(&sample("s1", "bob")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn list_filters_by_user() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        store.create(&sample("s1", "alice")).await.unwrap();
        store.create(&sample("s2", "alice")).await.unwrap();
        store.create(&sample("s3", "bob")).await.unwrap();

        assert_eq!(store.list("alice").await.unwrap().len(), 2);
        assert_eq!(store.list("bob").await.unwrap().len(), 1);
        assert!(store.list("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expiry_removes_stale_sessions() {
        let store = SqliteSessionStore::open_in_memory().unwrap();
        let mut stale = sample("old", "alice");
        stale.updated_at = krill::timestamp_ms() - 10_000_000;
        store.create(&stale).await.unwrap();
        store.create(&sample("fresh", "alice")).await.unwrap();

        let removed = store.remove_expired(3600).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("fresh").await.is_ok());
        assert!(store.get("old").await.is_err());
    }

    #[tokio::test]
    async fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        {
            let store = SqliteSessionStore::open(&path).unwrap();
            store.create(&sample("s1", "alice")).await.unwrap();
        }
        let store = SqliteSessionStore::open(&path).unwrap();
        assert_eq!(store.get("s1").await.unwrap().user_id, "alice");
    }
}
