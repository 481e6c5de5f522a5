//! The conversation engine: per-user turn orchestration.
//!
//! One turn = load session → (maybe) classify and route → run the active
//! workflow handler → reconcile its directives against the workflow stack
//! → record the turn. At most one turn per user is in flight at a time;
//! the per-user lock is held for the whole algorithm and released on every
//! exit path. Any fault below the engine is converted into a fixed safe
//! reply — the transport never sees a raw error.

use crate::intent::{IntentClassifier, SwitchDetector};
use crate::scene::{Route, SceneRouter};
use crate::workflows::{TurnResult, TurnStatus, WorkflowRegistry};
use dashmap::DashMap;
use one_common::Config;
use one_llm::Provider;
use one_session::{SessionContext, SessionStore, Tier, TurnRecord, WorkflowId};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Fixed reply when a turn fails beyond recovery.
pub const APOLOGY_MESSAGE: &str = "抱歉，系统暂时遇到问题，请稍后再试。";

/// Content prefix of per-turn status marker records.
const STATUS_MARKER_PREFIX: &str = "workflow status:";

/// What the engine hands back to the transport layer.
#[derive(Debug, Clone)]
pub struct EngineReply {
    pub message: String,
    pub workflow_type: String,
    pub status: TurnStatus,
}

/// The per-user conversation orchestrator.
pub struct ConversationEngine {
    store: Arc<dyn SessionStore>,
    classifier: IntentClassifier,
    switch_detector: SwitchDetector,
    registry: WorkflowRegistry,
    locks: DashMap<String, Arc<Mutex<()>>>,
    switch_detection: bool,
}

impl ConversationEngine {
    /// Build an engine over the shared provider client and store handle.
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn SessionStore>, config: &Config) -> Self {
        Self {
            classifier: IntentClassifier::new(provider.clone(), config.llm.clone()),
            switch_detector: SwitchDetector::new(provider.clone(), config.llm.clone()),
            registry: WorkflowRegistry::new(provider, store.clone(), config.llm.clone()),
            store,
            locks: DashMap::new(),
            switch_detection: config.intent.switch_detection,
        }
    }

    /// Process one inbound message for a user.
    ///
    /// Serialized per user; concurrent users proceed independently.
    pub async fn process_message(&self, user_id: &str, message: &str) -> EngineReply {
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        match self.process_inner(user_id, message).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Turn failed, returning safe reply");
                EngineReply {
                    message: APOLOGY_MESSAGE.to_string(),
                    workflow_type: "error".to_string(),
                    status: TurnStatus::Error,
                }
            }
        }
    }

    async fn process_inner(&self, user_id: &str, message: &str) -> anyhow::Result<EngineReply> {
        tracing::info!(user_id = %user_id, "Processing message");

        // 1. Load or create the session.
        let mut ctx = match self.store.get_session(user_id).await? {
            Some(ctx) => ctx,
            None => self.store.create_session(user_id).await?,
        };

        // 2. Best-effort recovery: the store may have lost live workflow
        // fields while keeping message history.
        if ctx.primary_workflow.is_none() {
            if let Some(recovered) = recover_primary_from_history(&ctx.messages) {
                tracing::info!(workflow = %recovered, "Recovered primary workflow from history");
                ctx.switch_primary(recovered);
            }
        }

        // Optional topic-switch detection on a live workflow.
        if self.switch_detection {
            if let Some(current) = ctx.primary_workflow {
                if self
                    .switch_detector
                    .check_switch(message, current, &ctx.messages)
                    .await
                {
                    tracing::info!(from = %current, "Topic switch detected, re-routing");
                    ctx.clear_workflows();
                    self.save_stack(&ctx).await?;
                }
            }
        }

        // 3. No active primary → classify the intent and route.
        if ctx.primary_workflow.is_none() {
            let intent = self.classifier.classify(message, &ctx.messages).await;
            let route = SceneRouter::route(&intent.main_intent);
            tracing::info!(intent = %intent.main_intent, workflow = %route.workflow, "Routed intent");
            self.apply_route(&mut ctx, route).await?;
        }

        // 4. Run the handler for the active primary workflow.
        let primary = ctx.primary_workflow.unwrap_or(WorkflowId::Confirm);
        let handler = self.registry.resolve(primary);
        let mut result = handler.process(message, &mut ctx).await?;

        // 5. Apply a requested secondary-tier switch.
        if let Some(secondary) = result.requested_secondary {
            ctx.switch_secondary(secondary);
            self.save_stack(&ctx).await?;
        }

        // 6. One re-route per turn, not a retry loop.
        if result.status == TurnStatus::WorkflowSwitch {
            let intent = self.classifier.classify(message, &ctx.messages).await;
            let route = SceneRouter::route(&intent.main_intent);
            tracing::info!(intent = %intent.main_intent, workflow = %route.workflow, "Re-routing after workflow switch");
            self.apply_route(&mut ctx, route).await?;

            let next = ctx.primary_workflow.unwrap_or(WorkflowId::Confirm);
            let handler = self.registry.resolve(next);
            result = handler.process(message, &mut ctx).await?;
        }

        // 7. Human handoff ends the current workflow unconditionally.
        if result.status == TurnStatus::HumanSwitch {
            let human = self.registry.resolve(WorkflowId::Human);
            result = human.process(message, &mut ctx).await?;
            ctx.end_current();
            self.save_stack(&ctx).await?;
        }

        // 8. Record the turn: user message, status marker, assistant reply.
        self.store
            .append_message(&ctx.session_id, TurnRecord::user(message))
            .await?;
        if let Some(primary) = ctx.primary_workflow {
            self.store
                .append_message(
                    &ctx.session_id,
                    TurnRecord::workflow_marker(
                        format!("{STATUS_MARKER_PREFIX} {primary}"),
                        ctx.stack_snapshot(),
                    ),
                )
                .await?;
        }
        self.store
            .append_message(&ctx.session_id, TurnRecord::assistant(&result.message))
            .await?;

        if let Some(data) = &result.context_data {
            merge_context_data(&mut ctx, data);
            self.save_stack(&ctx).await?;
        }

        // 9. A finished workflow leaves no stack behind.
        if !result.need_followup {
            ctx.clear_workflows();
            self.save_stack(&ctx).await?;
        }

        Ok(reply_from(&result))
    }

    /// Apply a routing decision and persist it, with a transition record
    /// when the primary actually changes.
    async fn apply_route(&self, ctx: &mut SessionContext, route: Route) -> anyhow::Result<()> {
        let old = ctx.primary_workflow;
        match route.tier {
            Tier::Primary => ctx.switch_primary(route.workflow),
            Tier::Secondary => ctx.switch_secondary(route.workflow),
        }
        self.save_stack(ctx).await?;

        if old != ctx.primary_workflow {
            let from = old.map_or("none", WorkflowId::as_str);
            let to = ctx.primary_workflow.map_or("none", WorkflowId::as_str);
            self.store
                .append_message(
                    &ctx.session_id,
                    TurnRecord::workflow_marker(
                        format!("workflow switched: {from} -> {to}"),
                        ctx.stack_snapshot(),
                    ),
                )
                .await?;
        }
        Ok(())
    }

    async fn save_stack(&self, ctx: &SessionContext) -> anyhow::Result<()> {
        self.store
            .save_workflow_state(
                &ctx.session_id,
                ctx.primary_workflow,
                ctx.secondary_workflow,
                &ctx.workflow_stack,
                &ctx.workflow_state,
            )
            .await?;
        Ok(())
    }
}

fn reply_from(result: &TurnResult) -> EngineReply {
    EngineReply {
        message: result.message.clone(),
        workflow_type: result.workflow.as_str().to_string(),
        status: result.status,
    }
}

/// Scan history backward for the most recent status marker.
///
/// Fallback only: the persisted workflow fields are the source of truth,
/// this recovers them from a store that kept messages but lost the fields.
fn recover_primary_from_history(messages: &[TurnRecord]) -> Option<WorkflowId> {
    messages
        .iter()
        .rev()
        .find(|m| {
            m.role == one_session::Role::System && m.content.starts_with(STATUS_MARKER_PREFIX)
        })
        .map(|m| WorkflowId::parse(m.content[STATUS_MARKER_PREFIX.len()..].trim()))
}

/// Merge handler context data into the session's workflow state.
fn merge_context_data(ctx: &mut SessionContext, data: &serde_json::Value) {
    if let Some(object) = data.as_object() {
        for (key, value) in object {
            ctx.workflow_state.insert(key.clone(), value.clone());
        }
    }
}
