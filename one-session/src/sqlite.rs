//! SQLite-backed session store.
//!
//! Sessions and messages live in two tables; every call opens its own
//! connection inside `spawn_blocking` so the async runtime never holds a
//! blocking handle. Timestamps are RFC3339 UTC strings, so lexicographic
//! comparison matches chronological order.

use crate::store::SessionStore;
use crate::types::{MessageType, Role, SessionContext, TurnRecord, WorkflowId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use one_common::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite session store backend.
pub struct SqliteSessionStore {
    db_path: PathBuf,
    session_timeout: Duration,
    context_window: usize,
}

impl SqliteSessionStore {
    /// Open (and initialize) the store at the given database path.
    pub fn new(
        db_path: impl AsRef<Path>,
        session_timeout: Duration,
        context_window: usize,
    ) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&db_path).map_err(store_err)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                primary_workflow TEXT,
                secondary_workflow TEXT,
                workflow_stack TEXT NOT NULL DEFAULT '[]',
                workflow_state TEXT NOT NULL DEFAULT '{}',
                turn_count INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_user
                ON sessions(user_id, last_active);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'chat',
                metadata TEXT NOT NULL DEFAULT 'null'
            );

            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON messages(session_id, id);
            "#,
        )
        .map_err(store_err)?;

        Ok(Self {
            db_path,
            session_timeout,
            context_window,
        })
    }

    fn cutoff(&self) -> String {
        let timeout = chrono::TimeDelta::from_std(self.session_timeout)
            .unwrap_or_else(|_| chrono::TimeDelta::seconds(300));
        (Utc::now() - timeout).to_rfc3339()
    }
}

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

/// Run a blocking store operation on the blocking pool.
async fn run_blocking<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> rusqlite::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| Error::Internal(format!("blocking task failed: {e}")))?
        .map_err(store_err)
}

fn load_recent_messages(
    conn: &Connection,
    session_id: &str,
    limit: usize,
) -> rusqlite::Result<Vec<TurnRecord>> {
    let mut stmt = conn.prepare(
        "SELECT role, content, timestamp, message_type, metadata
         FROM messages WHERE session_id = ?1
         ORDER BY id DESC LIMIT ?2",
    )?;
    let mut records = stmt
        .query_map(params![session_id, limit as i64], |row| {
            let role: String = row.get(0)?;
            let content: String = row.get(1)?;
            let timestamp: String = row.get(2)?;
            let message_type: String = row.get(3)?;
            let metadata: String = row.get(4)?;
            Ok((role, content, timestamp, message_type, metadata))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .map(|(role, content, timestamp, message_type, metadata)| TurnRecord {
            role: Role::parse(&role),
            content,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            message_type: MessageType::parse(&message_type),
            metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        })
        .collect::<Vec<_>>();
    records.reverse(); // oldest first
    Ok(records)
}

fn parse_stack(raw: &str) -> Vec<WorkflowId> {
    serde_json::from_str::<Vec<String>>(raw)
        .map(|ids| ids.iter().map(|s| WorkflowId::parse(s)).collect())
        .unwrap_or_default()
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_session(&self, user_id: &str) -> Result<SessionContext> {
        let db_path = self.db_path.clone();
        let user_id = user_id.to_string();
        let session_id = uuid::Uuid::new_v4().to_string();
        let ctx = SessionContext::new(session_id.clone(), user_id.clone());

        run_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (session_id, user_id, created_at, last_active)
                 VALUES (?1, ?2, ?3, ?3)",
                params![session_id, user_id, now],
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(session_id = %ctx.session_id, "Created session");
        Ok(ctx)
    }

    async fn get_session(&self, user_id: &str) -> Result<Option<SessionContext>> {
        let db_path = self.db_path.clone();
        let user_id = user_id.to_string();
        let cutoff = self.cutoff();
        let window = self.context_window;

        run_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let row = conn
                .query_row(
                    "SELECT session_id, primary_workflow, secondary_workflow,
                            workflow_stack, workflow_state, turn_count
                     FROM sessions
                     WHERE user_id = ?1 AND last_active > ?2
                     ORDER BY last_active DESC LIMIT 1",
                    params![user_id, cutoff],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, u32>(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((session_id, primary, secondary, stack, state, turn_count)) = row else {
                return Ok(None);
            };

            let messages = load_recent_messages(&conn, &session_id, window)?;
            let mut ctx = SessionContext::new(session_id, user_id);
            ctx.primary_workflow = primary.as_deref().map(WorkflowId::parse);
            ctx.secondary_workflow = secondary.as_deref().map(WorkflowId::parse);
            ctx.workflow_stack = parse_stack(&stack);
            ctx.workflow_state = serde_json::from_str(&state).unwrap_or_default();
            ctx.turn_count = turn_count;
            ctx.messages = messages;
            Ok(Some(ctx))
        })
        .await
    }

    async fn append_message(&self, session_id: &str, record: TurnRecord) -> Result<()> {
        let db_path = self.db_path.clone();
        let session_id = session_id.to_string();
        let metadata = serde_json::to_string(&record.metadata)?;

        run_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "INSERT INTO messages (session_id, role, content, timestamp, message_type, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    session_id,
                    record.role.as_str(),
                    record.content,
                    record.timestamp.to_rfc3339(),
                    record.message_type.as_str(),
                    metadata,
                ],
            )?;
            conn.execute(
                "UPDATE sessions
                 SET turn_count = turn_count + 1, last_active = ?2
                 WHERE session_id = ?1",
                params![session_id, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
    }

    async fn save_workflow_state(
        &self,
        session_id: &str,
        primary: Option<WorkflowId>,
        secondary: Option<WorkflowId>,
        stack: &[WorkflowId],
        state: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let db_path = self.db_path.clone();
        let session_id = session_id.to_string();
        let stack_json =
            serde_json::to_string(&stack.iter().map(|w| w.as_str()).collect::<Vec<_>>())?;
        let state_json = serde_json::to_string(state)?;

        run_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "UPDATE sessions
                 SET primary_workflow = ?2, secondary_workflow = ?3,
                     workflow_stack = ?4, workflow_state = ?5, last_active = ?6
                 WHERE session_id = ?1",
                params![
                    session_id,
                    primary.map(WorkflowId::as_str),
                    secondary.map(WorkflowId::as_str),
                    stack_json,
                    state_json,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TurnRecord>> {
        let db_path = self.db_path.clone();
        let session_id = session_id.to_string();

        run_blocking(move || {
            let conn = Connection::open(&db_path)?;
            load_recent_messages(&conn, &session_id, limit)
        })
        .await
    }

    async fn expire_stale_sessions(&self, timeout: Duration) -> Result<u64> {
        let db_path = self.db_path.clone();
        let timeout = chrono::TimeDelta::from_std(timeout)
            .unwrap_or_else(|_| chrono::TimeDelta::seconds(300));
        let cutoff = (Utc::now() - timeout).to_rfc3339();

        let expired = run_blocking(move || {
            let conn = Connection::open(&db_path)?;
            let changed = conn.execute(
                "UPDATE sessions
                 SET primary_workflow = NULL, secondary_workflow = NULL,
                     workflow_stack = '[]', workflow_state = '{}'
                 WHERE last_active < ?1 AND primary_workflow IS NOT NULL",
                params![cutoff],
            )?;
            Ok(changed as u64)
        })
        .await?;

        if expired > 0 {
            tracing::info!(expired, "Expired stale session workflows");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(timeout_secs: u64) -> (tempfile::TempDir, SqliteSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteSessionStore::new(
            dir.path().join("sessions.db"),
            Duration::from_secs(timeout_secs),
            10,
        )
        .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (_dir, store) = test_store(300);
        let created = store.create_session("u1").await.unwrap();

        let loaded = store.get_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, created.session_id);
        assert_eq!(loaded.user_id, "u1");
        assert!(loaded.messages.is_empty());
        assert_eq!(loaded.primary_workflow, None);
    }

    #[tokio::test]
    async fn test_get_session_unknown_user() {
        let (_dir, store) = test_store(300);
        assert!(store.get_session("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_and_list_messages() {
        let (_dir, store) = test_store(300);
        let session = store.create_session("u1").await.unwrap();

        store
            .append_message(&session.session_id, TurnRecord::user("你好"))
            .await
            .unwrap();
        store
            .append_message(
                &session.session_id,
                TurnRecord::assistant("您好，请问有什么可以帮您？"),
            )
            .await
            .unwrap();

        let messages = store
            .list_recent_messages(&session.session_id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "你好");
        assert_eq!(messages[1].role, Role::Assistant);

        let loaded = store.get_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.turn_count, 2);
    }

    #[tokio::test]
    async fn test_message_window_keeps_most_recent() {
        let (_dir, store) = test_store(300);
        let session = store.create_session("u1").await.unwrap();
        for i in 0..15 {
            store
                .append_message(&session.session_id, TurnRecord::user(format!("msg-{i}")))
                .await
                .unwrap();
        }

        let loaded = store.get_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 10);
        assert_eq!(loaded.messages.first().unwrap().content, "msg-5");
        assert_eq!(loaded.messages.last().unwrap().content, "msg-14");
    }

    #[tokio::test]
    async fn test_save_and_reload_workflow_state() {
        let (_dir, store) = test_store(300);
        let session = store.create_session("u1").await.unwrap();

        let mut state = HashMap::new();
        state.insert(
            "product_info".to_string(),
            serde_json::json!({"name": "手机"}),
        );
        store
            .save_workflow_state(
                &session.session_id,
                Some(WorkflowId::AllowanceGroup),
                Some(WorkflowId::Calc),
                &[WorkflowId::AllowanceGroup, WorkflowId::Calc],
                &state,
            )
            .await
            .unwrap();

        let loaded = store.get_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.primary_workflow, Some(WorkflowId::AllowanceGroup));
        assert_eq!(loaded.secondary_workflow, Some(WorkflowId::Calc));
        assert_eq!(
            loaded.workflow_stack,
            vec![WorkflowId::AllowanceGroup, WorkflowId::Calc]
        );
        assert_eq!(loaded.workflow_state["product_info"]["name"], "手机");
    }

    #[tokio::test]
    async fn test_session_outside_timeout_window_not_returned() {
        let (_dir, store) = test_store(0);
        store.create_session("u1").await.unwrap();
        // a zero-second window means the session is immediately stale
        assert!(store.get_session("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_clears_workflows_keeps_history() {
        let (_dir, store) = test_store(300);
        let session = store.create_session("u1").await.unwrap();
        store
            .append_message(&session.session_id, TurnRecord::user("你好"))
            .await
            .unwrap();
        store
            .save_workflow_state(
                &session.session_id,
                Some(WorkflowId::Cashback),
                None,
                &[WorkflowId::Cashback],
                &HashMap::new(),
            )
            .await
            .unwrap();

        // nothing is stale yet
        assert_eq!(
            store
                .expire_stale_sessions(Duration::from_secs(300))
                .await
                .unwrap(),
            0
        );

        // everything is stale with a zero-second window
        let expired = store.expire_stale_sessions(Duration::ZERO).await.unwrap();
        assert_eq!(expired, 1);

        let messages = store
            .list_recent_messages(&session.session_id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);

        let loaded = store.get_session("u1").await.unwrap().unwrap();
        assert_eq!(loaded.primary_workflow, None);
        assert!(loaded.workflow_stack.is_empty());
    }
}
