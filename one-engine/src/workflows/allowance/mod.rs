//! Allowance & group-card composite workflow.
//!
//! A small state machine of its own: a brain classification step selects
//! one of three scenes (claim, calc, consult). An active `calc` secondary
//! tier routes straight into the quantity-continuation path — the brain
//! never gets a chance to re-read an in-flight numeric answer as a fresh
//! scene.

pub mod brain;
mod calc;
mod claim;
pub mod constants;
mod consult;

pub use brain::{BenefitType, Brain, ProductInfo, SceneDecision, SceneType};

use crate::workflows::{TurnResult, TurnStatus};
use calc::CalcHandler;
use consult::ConsultHandler;
use one_common::config::LlmConfig;
use one_llm::Provider;
use one_session::{SessionContext, SessionStore, WorkflowId};
use std::sync::Arc;

/// The composite allowance & group-card workflow.
pub struct AllowanceGroupWorkflow {
    store: Arc<dyn SessionStore>,
    brain: Brain,
    calc: CalcHandler,
    consult: ConsultHandler,
}

impl AllowanceGroupWorkflow {
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn SessionStore>, llm: LlmConfig) -> Self {
        Self {
            store,
            brain: Brain::new(provider.clone(), llm.clone()),
            calc: CalcHandler::new(provider.clone(), llm.clone()),
            consult: ConsultHandler::new(provider, llm),
        }
    }

    /// Run one turn of the composite.
    pub async fn process(
        &self,
        message: &str,
        ctx: &mut SessionContext,
    ) -> anyhow::Result<TurnResult> {
        // An active calc tier owns the turn.
        if ctx.secondary_workflow == Some(WorkflowId::Calc) {
            tracing::debug!("Continuing calc secondary tier");
            let mut result = self.calc.handle_quantity_input(message, ctx, &self.brain).await;
            if !matches!(result.status, TurnStatus::WorkflowSwitch | TurnStatus::Error) {
                result.requested_secondary.get_or_insert(WorkflowId::Calc);
            }
            return Ok(result);
        }

        // Entering via a secondary scene id (e.g. after recovery) still
        // means the composite owns the primary slot.
        if ctx.primary_workflow != Some(WorkflowId::AllowanceGroup) {
            ctx.switch_primary(WorkflowId::AllowanceGroup);
            self.save_stack(ctx).await?;
        }

        let decision = self.brain.think(message, &ctx.messages).await;
        let result = match decision.scene {
            SceneType::Claim => {
                let result = claim::handle(&decision);
                // Stage the granted tier here as well: a re-routed run
                // returns through the engine without a step-5 application.
                if let Some(secondary) = result.requested_secondary {
                    ctx.switch_secondary(secondary);
                    self.save_stack(ctx).await?;
                }
                result
            }
            SceneType::Calc => {
                // Stage the calc tier before handling so a waiting turn
                // resumes here next time.
                ctx.switch_secondary(WorkflowId::Calc);
                self.save_stack(ctx).await?;
                self.calc.handle(message, ctx, &decision)
            }
            SceneType::Consult => self.consult.handle(message).await,
            SceneType::Other => TurnResult::new(
                WorkflowId::AllowanceGroup,
                TurnStatus::WorkflowSwitch,
                "抱歉，我可能理解有误，让我转接其他客服帮您。",
            )
            .with_reason(
                decision
                    .exit_reason
                    .unwrap_or_else(|| "非津贴&参团卡意图".to_string()),
            ),
        };
        Ok(result)
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
