//! In-memory session store.
//!
//! Backs tests and ephemeral deployments with the same timeout-window
//! semantics as the SQLite backend.

use crate::store::SessionStore;
use crate::types::{SessionContext, TurnRecord, WorkflowId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use one_common::{Error, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

struct StoredSession {
    ctx: SessionContext,
    history: Vec<TurnRecord>,
    last_active: DateTime<Utc>,
}

/// In-memory session store backend.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    session_index: RwLock<HashMap<String, String>>,
    session_timeout: Duration,
    context_window: usize,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new(session_timeout: Duration, context_window: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            session_index: RwLock::new(HashMap::new()),
            session_timeout,
            context_window,
        }
    }

    fn is_live(&self, last_active: DateTime<Utc>) -> bool {
        let timeout = chrono::TimeDelta::from_std(self.session_timeout)
            .unwrap_or_else(|_| chrono::TimeDelta::seconds(300));
        Utc::now() - last_active < timeout
    }

    async fn user_for_session(&self, session_id: &str) -> Option<String> {
        self.session_index.read().await.get(session_id).cloned()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), 10)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_session(&self, user_id: &str) -> Result<SessionContext> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let ctx = SessionContext::new(session_id.clone(), user_id);

        self.session_index
            .write()
            .await
            .insert(session_id, user_id.to_string());
        self.sessions.write().await.insert(
            user_id.to_string(),
            StoredSession {
                ctx: ctx.clone(),
                history: Vec::new(),
                last_active: Utc::now(),
            },
        );
        Ok(ctx)
    }

    async fn get_session(&self, user_id: &str) -> Result<Option<SessionContext>> {
        let sessions = self.sessions.read().await;
        let Some(stored) = sessions.get(user_id) else {
            return Ok(None);
        };
        if !self.is_live(stored.last_active) {
            return Ok(None);
        }

        let mut ctx = stored.ctx.clone();
        let skip = stored.history.len().saturating_sub(self.context_window);
        ctx.messages = stored.history[skip..].to_vec();
        Ok(Some(ctx))
    }

    async fn append_message(&self, session_id: &str, record: TurnRecord) -> Result<()> {
        let Some(user_id) = self.user_for_session(session_id).await else {
            return Err(Error::NotFound(format!("session {session_id}")));
        };
        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.get_mut(&user_id) {
            stored.history.push(record);
            stored.ctx.turn_count += 1;
            stored.last_active = Utc::now();
        }
        Ok(())
    }

    async fn save_workflow_state(
        &self,
        session_id: &str,
        primary: Option<WorkflowId>,
        secondary: Option<WorkflowId>,
        stack: &[WorkflowId],
        state: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let Some(user_id) = self.user_for_session(session_id).await else {
            return Err(Error::NotFound(format!("session {session_id}")));
        };
        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.get_mut(&user_id) {
            stored.ctx.primary_workflow = primary;
            stored.ctx.secondary_workflow = secondary;
            stored.ctx.workflow_stack = stack.to_vec();
            stored.ctx.workflow_state = state.clone();
            stored.last_active = Utc::now();
        }
        Ok(())
    }

    async fn list_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TurnRecord>> {
        let Some(user_id) = self.user_for_session(session_id).await else {
            return Ok(Vec::new());
        };
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(&user_id)
            .map(|stored| {
                let skip = stored.history.len().saturating_sub(limit);
                stored.history[skip..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn expire_stale_sessions(&self, timeout: Duration) -> Result<u64> {
        let timeout = chrono::TimeDelta::from_std(timeout)
            .unwrap_or_else(|_| chrono::TimeDelta::seconds(300));
        let cutoff = Utc::now() - timeout;

        let mut expired = 0;
        let mut sessions = self.sessions.write().await;
        for stored in sessions.values_mut() {
            if stored.last_active < cutoff && stored.ctx.primary_workflow.is_some() {
                stored.ctx.clear_workflows();
                expired += 1;
            }
        }
        Ok(expired)
    }
}
