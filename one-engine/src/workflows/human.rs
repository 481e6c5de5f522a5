//! Human workflow: terminal handoff to a human agent.

use super::{call_reply_llm, TurnResult};
use one_common::config::LlmConfig;
use one_llm::Provider;
use one_session::WorkflowId;
use std::sync::Arc;

const HUMAN_PROMPT: &str = r#"你是一个专业的客服助手。现在需要帮助用户转接人工客服。

请注意以下要点：
1. 表达歉意并说明需要转人工的原因
2. 告知用户预计等待时间
3. 提醒用户准备相关信息
4. 回答要简洁明了"#;

/// Terminal handoff handler. Once entered, the workflow ends after one
/// turn: the follow-up flag is never set.
pub struct HumanWorkflow {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl HumanWorkflow {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    pub async fn process(&self, message: &str) -> TurnResult {
        let payload = call_reply_llm(&self.provider, &self.llm, HUMAN_PROMPT, message).await;
        TurnResult::new(WorkflowId::Human, payload.status, payload.message)
            .with_reason(payload.reason)
    }
}
