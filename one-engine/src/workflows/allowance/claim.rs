//! Claim scene: grant an allowance credit or a group-card pass.

use super::brain::{BenefitType, SceneDecision};
use super::constants::{ALLOWANCE_AMOUNT, COMMAND_CLAIM};
use crate::workflows::{TurnResult, TurnStatus};
use one_session::WorkflowId;

/// Handle a claim request.
///
/// The command kind must be the claim command; anything else is a
/// validation failure with no state change. A successful grant stages the
/// benefit outcome and requests the `calc` secondary tier so the next turn
/// can price a purchase against it.
pub fn handle(decision: &SceneDecision) -> TurnResult {
    if decision.command.kind != COMMAND_CLAIM {
        return TurnResult::new(
            WorkflowId::AllowanceGroup,
            TurnStatus::Error,
            "抱歉，指令类型不正确，请重新尝试。",
        )
        .with_reason("指令类型错误");
    }

    let (message, amount) = match decision.benefit {
        BenefitType::Allowance => (
            format!(
                "已为您发放{ALLOWANCE_AMOUNT}元津贴，请在「我的津贴」中查看。\n您想买哪件产品？我帮您看看怎么用最优惠~"
            ),
            Some(ALLOWANCE_AMOUNT),
        ),
        BenefitType::GroupCard => (
            "已为您发放参团卡，请在「我的卡券」中查看。\n您想买哪件产品？我帮您看看怎么用最优惠~"
                .to_string(),
            None,
        ),
    };

    TurnResult::new(WorkflowId::AllowanceGroup, TurnStatus::Normal, message)
        .with_followup(true)
        .with_secondary(WorkflowId::Calc)
        .with_reason("优惠发放成功")
        .with_context_data(serde_json::json!({
            "scene": "calc",
            "benefit_info": {
                "type": decision.benefit.as_str(),
                "amount": amount,
                "status": "success",
            },
        }))
}
