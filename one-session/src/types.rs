//! Session types: turn records, workflow identifiers, and the session
//! context with its bounded two-level workflow stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message role in a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// System bookkeeping record (workflow transitions, status markers)
    System,
}

impl Role {
    /// Convert to string representation for database storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => Self::Assistant,
            "system" => Self::System,
            _ => Self::User, // Default fallback
        }
    }
}

/// Kind of turn record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Regular chat message
    Chat,
    /// Workflow transition/status marker
    Workflow,
}

impl MessageType {
    /// Convert to string representation for database storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Workflow => "workflow",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "workflow" => Self::Workflow,
            _ => Self::Chat,
        }
    }
}

/// One record in a session's history. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Record role
    pub role: Role,
    /// Text content
    pub content: String,
    /// Write time (UTC)
    pub timestamp: DateTime<Utc>,
    /// Chat message or workflow marker
    pub message_type: MessageType,
    /// Extra context, e.g. the workflow stack snapshot at write time
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TurnRecord {
    /// Create a new record stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>, message_type: MessageType) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            message_type,
            metadata: serde_json::Value::Null,
        }
    }

    /// Create a user chat record.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageType::Chat)
    }

    /// Create an assistant chat record.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, MessageType::Chat)
    }

    /// Create a system workflow marker record.
    pub fn workflow_marker(content: impl Into<String>, metadata: serde_json::Value) -> Self {
        let mut record = Self::new(Role::System, content, MessageType::Workflow);
        record.metadata = metadata;
        record
    }
}

/// Closed set of workflow identifiers.
///
/// `Claim`, `Calc`, and `Consult` are secondary-tier scenes owned by the
/// allowance-group composite; they never run as a primary workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowId {
    Confirm,
    Cashback,
    Human,
    AllowanceGroup,
    Claim,
    Calc,
    Consult,
}

impl WorkflowId {
    /// Convert to string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Cashback => "cashback",
            Self::Human => "human",
            Self::AllowanceGroup => "allowance_group",
            Self::Claim => "claim",
            Self::Calc => "calc",
            Self::Consult => "consult",
        }
    }

    /// Parse from string representation.
    ///
    /// Unknown identifiers resolve to `Confirm`, the safe default.
    pub fn parse(s: &str) -> Self {
        match s {
            "cashback" => Self::Cashback,
            "human" => Self::Human,
            "allowance_group" => Self::AllowanceGroup,
            "claim" => Self::Claim,
            "calc" => Self::Calc,
            "consult" => Self::Consult,
            _ => Self::Confirm,
        }
    }

    /// Whether this identifier names a secondary-tier scene.
    pub const fn is_secondary_scene(self) -> bool {
        matches!(self, Self::Claim | Self::Calc | Self::Consult)
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Secondary,
}

/// Per-user conversation context.
///
/// Owned exclusively by the engine for the duration of a turn; persisted
/// by a [`crate::SessionStore`] between turns.
///
/// Stack invariants, upheld by the mutating methods below:
/// - `workflow_stack` is empty iff `primary_workflow` is `None`
/// - `workflow_stack[0] == primary_workflow` whenever a primary is set
/// - a secondary implies `workflow_stack == [primary, secondary]`
/// - the stack never exceeds two entries; another secondary switch
///   replaces the current secondary instead of growing the stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    /// Opaque session id, stable while the session is active
    pub session_id: String,
    /// Owning user
    pub user_id: String,
    /// Recent turn records, most-recent-last, bounded to the context window
    pub messages: Vec<TurnRecord>,
    /// Active primary workflow
    pub primary_workflow: Option<WorkflowId>,
    /// Active secondary workflow
    pub secondary_workflow: Option<WorkflowId>,
    /// Active workflow stack, length ≤ 2
    pub workflow_stack: Vec<WorkflowId>,
    /// Handler-private scratch data (e.g. a pending product under calculation)
    pub workflow_state: HashMap<String, serde_json::Value>,
    /// Number of records written to this session
    pub turn_count: u32,
}

impl SessionContext {
    /// Create an empty context for a user.
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            primary_workflow: None,
            secondary_workflow: None,
            workflow_stack: Vec::new(),
            workflow_state: HashMap::new(),
            turn_count: 0,
        }
    }

    /// Switch the primary workflow: secondary is dropped, the stack is
    /// reset to the new primary alone.
    pub fn switch_primary(&mut self, id: WorkflowId) {
        self.primary_workflow = Some(id);
        self.secondary_workflow = None;
        self.workflow_stack = vec![id];
    }

    /// Switch the secondary workflow.
    ///
    /// The stack becomes `[primary, id]`; a previous secondary is replaced,
    /// never shifted under the primary. Without an active primary the id is
    /// promoted to primary — a secondary tier cannot exist alone.
    pub fn switch_secondary(&mut self, id: WorkflowId) {
        match self.primary_workflow {
            Some(primary) => {
                self.secondary_workflow = Some(id);
                self.workflow_stack = vec![primary, id];
            }
            None => self.switch_primary(id),
        }
    }

    /// End the innermost active workflow.
    ///
    /// With a secondary active, pop it and fall back to the primary.
    /// Otherwise clear every workflow field, including handler scratch state.
    pub fn end_current(&mut self) {
        if self.secondary_workflow.take().is_some() {
            self.workflow_stack.truncate(1);
        } else {
            self.primary_workflow = None;
            self.workflow_stack.clear();
            self.workflow_state.clear();
        }
    }

    /// Unconditionally reset all workflow fields. Message history is kept.
    pub fn clear_workflows(&mut self) {
        self.primary_workflow = None;
        self.secondary_workflow = None;
        self.workflow_stack.clear();
        self.workflow_state.clear();
    }

    /// Snapshot of the workflow stack as strings, for record metadata.
    pub fn stack_snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "workflow": self.primary_workflow.map(WorkflowId::as_str),
            "workflow_stack": self.workflow_stack.iter().map(|w| w.as_str()).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        assert_eq!(Role::parse(Role::User.as_str()), Role::User);
        assert_eq!(Role::parse(Role::Assistant.as_str()), Role::Assistant);
        assert_eq!(Role::parse(Role::System.as_str()), Role::System);
        assert_eq!(Role::parse("unknown"), Role::User);
    }

    #[test]
    fn test_workflow_id_parse_defaults_to_confirm() {
        assert_eq!(WorkflowId::parse("cashback"), WorkflowId::Cashback);
        assert_eq!(WorkflowId::parse("allowance_group"), WorkflowId::AllowanceGroup);
        assert_eq!(WorkflowId::parse("nonsense"), WorkflowId::Confirm);
        assert_eq!(WorkflowId::parse(""), WorkflowId::Confirm);
    }

    #[test]
    fn test_secondary_scene_ids() {
        assert!(WorkflowId::Calc.is_secondary_scene());
        assert!(WorkflowId::Claim.is_secondary_scene());
        assert!(WorkflowId::Consult.is_secondary_scene());
        assert!(!WorkflowId::AllowanceGroup.is_secondary_scene());
        assert!(!WorkflowId::Confirm.is_secondary_scene());
    }

    #[test]
    fn test_switch_primary_resets_stack() {
        let mut ctx = SessionContext::new("s1", "u1");
        ctx.switch_primary(WorkflowId::AllowanceGroup);
        ctx.switch_secondary(WorkflowId::Calc);
        ctx.switch_primary(WorkflowId::Cashback);

        assert_eq!(ctx.primary_workflow, Some(WorkflowId::Cashback));
        assert_eq!(ctx.secondary_workflow, None);
        assert_eq!(ctx.workflow_stack, vec![WorkflowId::Cashback]);
    }

    #[test]
    fn test_switch_secondary_caps_stack_at_two() {
        let mut ctx = SessionContext::new("s1", "u1");
        ctx.switch_primary(WorkflowId::AllowanceGroup);
        ctx.switch_secondary(WorkflowId::Calc);
        ctx.switch_secondary(WorkflowId::Consult);
        ctx.switch_secondary(WorkflowId::Claim);

        assert_eq!(ctx.workflow_stack.len(), 2);
        assert_eq!(ctx.workflow_stack[0], WorkflowId::AllowanceGroup);
        assert_eq!(ctx.secondary_workflow, Some(WorkflowId::Claim));
        assert_eq!(ctx.workflow_stack[1], WorkflowId::Claim);
    }

    #[test]
    fn test_stack_head_tracks_primary_under_any_sequence() {
        let mut ctx = SessionContext::new("s1", "u1");
        let moves: &[(bool, WorkflowId)] = &[
            (true, WorkflowId::Confirm),
            (false, WorkflowId::Calc),
            (true, WorkflowId::AllowanceGroup),
            (false, WorkflowId::Claim),
            (false, WorkflowId::Calc),
            (true, WorkflowId::Human),
        ];
        for &(primary, id) in moves {
            if primary {
                ctx.switch_primary(id);
            } else {
                ctx.switch_secondary(id);
            }
            assert!(ctx.workflow_stack.len() <= 2);
            assert_eq!(ctx.workflow_stack.first().copied(), ctx.primary_workflow);
        }
    }

    #[test]
    fn test_switch_secondary_without_primary_promotes() {
        let mut ctx = SessionContext::new("s1", "u1");
        ctx.switch_secondary(WorkflowId::Cashback);

        assert_eq!(ctx.primary_workflow, Some(WorkflowId::Cashback));
        assert_eq!(ctx.secondary_workflow, None);
        assert_eq!(ctx.workflow_stack, vec![WorkflowId::Cashback]);
    }

    #[test]
    fn test_end_current_pops_secondary_first() {
        let mut ctx = SessionContext::new("s1", "u1");
        ctx.switch_primary(WorkflowId::AllowanceGroup);
        ctx.switch_secondary(WorkflowId::Calc);
        ctx.workflow_state
            .insert("product_info".into(), serde_json::json!({"name": "手机"}));

        ctx.end_current();
        assert_eq!(ctx.primary_workflow, Some(WorkflowId::AllowanceGroup));
        assert_eq!(ctx.secondary_workflow, None);
        assert_eq!(ctx.workflow_stack, vec![WorkflowId::AllowanceGroup]);
        // scratch state survives a secondary pop
        assert!(ctx.workflow_state.contains_key("product_info"));

        ctx.end_current();
        assert_eq!(ctx.primary_workflow, None);
        assert!(ctx.workflow_stack.is_empty());
        assert!(ctx.workflow_state.is_empty());
    }

    #[test]
    fn test_clear_workflows_preserves_messages() {
        let mut ctx = SessionContext::new("s1", "u1");
        ctx.messages.push(TurnRecord::user("你好"));
        ctx.switch_primary(WorkflowId::Cashback);
        ctx.workflow_state.insert("k".into(), serde_json::json!(1));

        ctx.clear_workflows();
        assert_eq!(ctx.primary_workflow, None);
        assert_eq!(ctx.secondary_workflow, None);
        assert!(ctx.workflow_stack.is_empty());
        assert!(ctx.workflow_state.is_empty());
        assert_eq!(ctx.messages.len(), 1);
    }

    #[test]
    fn test_stack_snapshot() {
        let mut ctx = SessionContext::new("s1", "u1");
        ctx.switch_primary(WorkflowId::AllowanceGroup);
        ctx.switch_secondary(WorkflowId::Calc);

        let snapshot = ctx.stack_snapshot();
        assert_eq!(snapshot["workflow"], "allowance_group");
        assert_eq!(
            snapshot["workflow_stack"],
            serde_json::json!(["allowance_group", "calc"])
        );
    }

    #[test]
    fn test_turn_record_constructors() {
        let user = TurnRecord::user("买手机");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.message_type, MessageType::Chat);

        let marker =
            TurnRecord::workflow_marker("workflow status: calc", serde_json::json!({"a": 1}));
        assert_eq!(marker.role, Role::System);
        assert_eq!(marker.message_type, MessageType::Workflow);
        assert_eq!(marker.metadata["a"], 1);
    }
}
