//! Workflow handlers and their shared turn contract.
//!
//! Handlers form a closed set dispatched through one `process` entry
//! point; per-turn state travels in [`TurnResult`], turn-to-turn state in
//! the session context. Handlers never persist except where a composite
//! must stage a tier switch before control returns to the engine.

pub mod allowance;
mod cashback;
mod confirm;
mod human;

pub use allowance::AllowanceGroupWorkflow;
pub use cashback::CashbackWorkflow;
pub use confirm::ConfirmWorkflow;
pub use human::HumanWorkflow;

use one_common::config::LlmConfig;
use one_llm::{generate_json, GenerateSpec, Provider};
use one_session::{SessionContext, SessionStore, WorkflowId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Fixed reply when the generator is unavailable mid-workflow.
pub const LLM_FALLBACK_MESSAGE: &str = "抱歉，系统暂时出现问题，请稍后再试。";

/// Turn outcome status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Normal reply, workflow may continue
    Normal,
    /// Hand off to a human agent
    HumanSwitch,
    /// The user asked for a different business — re-route this turn
    WorkflowSwitch,
    /// Handler-level failure, safe for the user to retry
    Error,
    /// Calculation is waiting for a quantity on the next turn
    WaitingQuantity,
}

impl TurnStatus {
    /// Convert to string representation for the transport layer.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::HumanSwitch => "human_switch",
            Self::WorkflowSwitch => "workflow_switch",
            Self::Error => "error",
            Self::WaitingQuantity => "waiting_quantity",
        }
    }

    /// Parse a status string from a generator reply.
    ///
    /// Unknown values are treated as `Normal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "human_switch" => Self::HumanSwitch,
            "workflow_switch" => Self::WorkflowSwitch,
            "error" => Self::Error,
            "waiting_quantity" => Self::WaitingQuantity,
            _ => Self::Normal,
        }
    }
}

/// Order summary produced by the discount calculation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCard {
    pub product_name: String,
    pub original_price: String,
    pub benefit_type: String,
    pub discount_amount: String,
    pub final_price: String,
    pub product_id: String,
    pub quantity: u32,
}

/// Result of one handler turn.
#[derive(Debug, Clone)]
pub struct TurnResult {
    /// Reply text for the user
    pub message: String,
    /// Turn outcome
    pub status: TurnStatus,
    /// Workflow that produced this result
    pub workflow: WorkflowId,
    /// Whether the primary workflow should stay active next turn
    pub need_followup: bool,
    /// Diagnostic reason for the status
    pub reason: String,
    /// Secondary tier the handler wants activated
    pub requested_secondary: Option<WorkflowId>,
    /// Handler-private data to merge into the session's workflow state
    pub context_data: Option<serde_json::Value>,
    /// Order summary, when a calculation completed
    pub order_card: Option<OrderCard>,
}

impl TurnResult {
    /// Create a result with the given status and message.
    pub fn new(workflow: WorkflowId, status: TurnStatus, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            workflow,
            need_followup: false,
            reason: String::new(),
            requested_secondary: None,
            context_data: None,
            order_card: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_followup(mut self, need_followup: bool) -> Self {
        self.need_followup = need_followup;
        self
    }

    pub fn with_secondary(mut self, secondary: WorkflowId) -> Self {
        self.requested_secondary = Some(secondary);
        self
    }

    pub fn with_context_data(mut self, data: serde_json::Value) -> Self {
        self.context_data = Some(data);
        self
    }

    pub fn with_order_card(mut self, card: OrderCard) -> Self {
        self.order_card = Some(card);
        self
    }
}

/// Validated `{status, message, reason}` payload from a generator reply.
pub(crate) struct ReplyPayload {
    pub status: TurnStatus,
    pub message: String,
    pub reason: String,
}

const REPLY_FORMAT_INSTRUCTION: &str = r#"
请以JSON格式返回：
{
    "status": "normal/human_switch/workflow_switch",
    "message": "回复内容",
    "reason": "状态原因说明"
}"#;

/// Ask the generator for a classified reply.
///
/// Appends the JSON reply-format instruction and validates the result. Any
/// failure — transport, timeout, malformed payload — yields the documented
/// fallback: a `human_switch` apology. Never retried within a turn.
pub(crate) async fn call_reply_llm(
    provider: &Arc<dyn Provider>,
    llm: &LlmConfig,
    system_prompt: &str,
    user_message: &str,
) -> ReplyPayload {
    let prompt = format!("{system_prompt}\n{REPLY_FORMAT_INSTRUCTION}");
    let spec = GenerateSpec::reply(
        llm.model.clone(),
        Duration::from_secs(llm.timeout_secs),
    );

    match generate_json(provider, &spec, &prompt, user_message).await {
        Ok(value) => match value["message"].as_str() {
            Some(message) => ReplyPayload {
                status: TurnStatus::parse(value["status"].as_str().unwrap_or("normal")),
                message: message.to_string(),
                reason: value["reason"].as_str().unwrap_or_default().to_string(),
            },
            None => {
                tracing::warn!("Generator reply missing message field, falling back");
                ReplyPayload {
                    status: TurnStatus::HumanSwitch,
                    message: LLM_FALLBACK_MESSAGE.to_string(),
                    reason: "回复缺少message字段".to_string(),
                }
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "Generator call failed, falling back");
            ReplyPayload {
                status: TurnStatus::HumanSwitch,
                message: LLM_FALLBACK_MESSAGE.to_string(),
                reason: format!("错误：{e}"),
            }
        }
    }
}

/// The closed set of workflow handlers.
#[allow(clippy::large_enum_variant)]
pub enum Workflow {
    Confirm(ConfirmWorkflow),
    Cashback(CashbackWorkflow),
    Human(HumanWorkflow),
    AllowanceGroup(AllowanceGroupWorkflow),
}

impl Workflow {
    /// The identifier this handler runs as.
    pub fn id(&self) -> WorkflowId {
        match self {
            Self::Confirm(_) => WorkflowId::Confirm,
            Self::Cashback(_) => WorkflowId::Cashback,
            Self::Human(_) => WorkflowId::Human,
            Self::AllowanceGroup(_) => WorkflowId::AllowanceGroup,
        }
    }

    /// Run one turn of this workflow.
    pub async fn process(
        &self,
        message: &str,
        ctx: &mut SessionContext,
    ) -> anyhow::Result<TurnResult> {
        match self {
            Self::Confirm(w) => Ok(w.process(message, ctx).await),
            Self::Cashback(w) => Ok(w.process(message).await),
            Self::Human(w) => Ok(w.process(message).await),
            Self::AllowanceGroup(w) => w.process(message, ctx).await,
        }
    }
}

/// Resolves workflow identifiers to fresh handler instances.
///
/// Handlers are stateless across turns; every resolve builds a new one
/// bound to the shared provider client and store handle.
pub struct WorkflowRegistry {
    provider: Arc<dyn Provider>,
    store: Arc<dyn SessionStore>,
    llm: LlmConfig,
}

impl WorkflowRegistry {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn SessionStore>, llm: LlmConfig) -> Self {
        Self {
            provider,
            store,
            llm,
        }
    }

    /// Resolve an identifier to a handler.
    ///
    /// Secondary scenes resolve to the allowance-group composite that owns
    /// them; everything unexpected lands on `Confirm` via `WorkflowId::parse`.
    pub fn resolve(&self, id: WorkflowId) -> Workflow {
        match id {
            WorkflowId::Cashback => Workflow::Cashback(CashbackWorkflow::new(
                self.provider.clone(),
                self.llm.clone(),
            )),
            WorkflowId::Human => {
                Workflow::Human(HumanWorkflow::new(self.provider.clone(), self.llm.clone()))
            }
            WorkflowId::AllowanceGroup
            | WorkflowId::Claim
            | WorkflowId::Calc
            | WorkflowId::Consult => Workflow::AllowanceGroup(AllowanceGroupWorkflow::new(
                self.provider.clone(),
                self.store.clone(),
                self.llm.clone(),
            )),
            WorkflowId::Confirm => Workflow::Confirm(ConfirmWorkflow::new(
                self.provider.clone(),
                self.llm.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use one_session::MemorySessionStore;

    struct NeverProvider;

    #[async_trait::async_trait]
    impl Provider for NeverProvider {
        fn name(&self) -> &str {
            "never"
        }

        async fn chat(
            &self,
            request: one_llm::ChatRequest,
        ) -> Result<one_llm::ChatResponse, one_llm::ProviderError> {
            Err(one_llm::ProviderError {
                provider: "never".into(),
                model: request.model,
                message: "unreachable".into(),
                status_code: None,
            })
        }
    }

    fn test_registry() -> WorkflowRegistry {
        WorkflowRegistry::new(
            Arc::new(NeverProvider),
            Arc::new(MemorySessionStore::default()),
            LlmConfig::default(),
        )
    }

    #[test]
    fn test_turn_status_roundtrip() {
        for status in [
            TurnStatus::Normal,
            TurnStatus::HumanSwitch,
            TurnStatus::WorkflowSwitch,
            TurnStatus::Error,
            TurnStatus::WaitingQuantity,
        ] {
            assert_eq!(TurnStatus::parse(status.as_str()), status);
        }
        assert_eq!(TurnStatus::parse("whatever"), TurnStatus::Normal);
    }

    #[test]
    fn test_registry_resolves_each_id() {
        let registry = test_registry();
        assert_eq!(
            registry.resolve(WorkflowId::Cashback).id(),
            WorkflowId::Cashback
        );
        assert_eq!(registry.resolve(WorkflowId::Human).id(), WorkflowId::Human);
        assert_eq!(
            registry.resolve(WorkflowId::Confirm).id(),
            WorkflowId::Confirm
        );
    }

    #[test]
    fn test_secondary_scenes_resolve_to_composite() {
        let registry = test_registry();
        for id in [WorkflowId::Claim, WorkflowId::Calc, WorkflowId::Consult] {
            assert_eq!(registry.resolve(id).id(), WorkflowId::AllowanceGroup);
        }
    }

    #[tokio::test]
    async fn test_call_reply_llm_falls_back_on_failure() {
        let provider: Arc<dyn Provider> = Arc::new(NeverProvider);
        let payload =
            call_reply_llm(&provider, &LlmConfig::default(), "prompt", "你好").await;
        assert_eq!(payload.status, TurnStatus::HumanSwitch);
        assert_eq!(payload.message, LLM_FALLBACK_MESSAGE);
    }

    #[test]
    fn test_turn_result_builders() {
        let result = TurnResult::new(WorkflowId::AllowanceGroup, TurnStatus::Normal, "好的")
            .with_followup(true)
            .with_secondary(WorkflowId::Calc)
            .with_reason("优惠发放成功");
        assert!(result.need_followup);
        assert_eq!(result.requested_secondary, Some(WorkflowId::Calc));
        assert_eq!(result.reason, "优惠发放成功");
        assert!(result.order_card.is_none());
    }
}
