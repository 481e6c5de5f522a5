//! Cashback workflow: FAQ on the buy-two-refund-one campaign.

use super::{call_reply_llm, TurnResult, TurnStatus};
use one_common::config::LlmConfig;
use one_llm::Provider;
use one_session::WorkflowId;
use std::sync::Arc;

const CASHBACK_PROMPT: &str = r#"你是一个专业的客服助手。现在需要你解答用户关于满二反一活动的问题。
满二反一是指：购买两件商品可以获得一件商品的退款。

请注意以下要点：
1. 解释活动规则和条件
2. 说明退款方式和到账时间
3. 介绍如何参与活动
4. 回答要简洁明了

如果用户要求人工服务，请返回human_switch状态。
如果用户询问其他业务，请返回workflow_switch状态。
如果是正常满二反一咨询，请返回normal状态。"#;

/// Single-shot FAQ handler with a fixed rule prompt.
pub struct CashbackWorkflow {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl CashbackWorkflow {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    pub async fn process(&self, message: &str) -> TurnResult {
        let payload = call_reply_llm(&self.provider, &self.llm, CASHBACK_PROMPT, message).await;
        TurnResult::new(WorkflowId::Cashback, payload.status, payload.message)
            .with_followup(payload.status == TurnStatus::Normal)
            .with_reason(payload.reason)
    }
}
