//! The session persistence seam.

use crate::types::{SessionContext, TurnRecord, WorkflowId};
use async_trait::async_trait;
use one_common::Result;
use std::collections::HashMap;
use std::time::Duration;

/// Trait for session store backends.
///
/// A returned [`SessionContext`] carries only the recent message window;
/// full history stays in the backend. Workflow-state writes are expected
/// immediately after every stack mutation — contexts are not safe to hold
/// dirty across turns.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// Create a fresh session for a user.
    async fn create_session(&self, user_id: &str) -> Result<SessionContext>;

    /// Get the user's current session, if one is active within the
    /// configured timeout window.
    async fn get_session(&self, user_id: &str) -> Result<Option<SessionContext>>;

    /// Append a turn record; bumps the turn count and last-active time.
    async fn append_message(&self, session_id: &str, record: TurnRecord) -> Result<()>;

    /// Persist the workflow fields of a session.
    async fn save_workflow_state(
        &self,
        session_id: &str,
        primary: Option<WorkflowId>,
        secondary: Option<WorkflowId>,
        stack: &[WorkflowId],
        state: &HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// List the most recent records of a session, oldest first.
    async fn list_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<TurnRecord>>;

    /// Clear workflow fields on sessions inactive for longer than `timeout`.
    ///
    /// Message history is kept. Returns the number of sessions expired.
    async fn expire_stale_sessions(&self, timeout: Duration) -> Result<u64>;
}
