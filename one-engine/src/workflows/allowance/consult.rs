//! Consult scene: stateless FAQ over the allowance and group-card rules.

use super::constants::{ALLOWANCE_RULES, GROUP_CARD_RULES};
use crate::workflows::{TurnResult, TurnStatus, LLM_FALLBACK_MESSAGE};
use one_common::config::LlmConfig;
use one_llm::{generate_json, GenerateSpec, Provider};
use one_session::WorkflowId;
use std::sync::Arc;
use std::time::Duration;

/// The consult scene handler.
pub struct ConsultHandler {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl ConsultHandler {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// Answer a rules question from the merged knowledge base.
    ///
    /// The reply status is forced into `Normal` or `HumanSwitch`; the
    /// consult scene never keeps the workflow alive on its own.
    pub async fn handle(&self, message: &str) -> TurnResult {
        let system_prompt = format!(
            r#"你是津贴和参团卡的咨询专家。请根据以下规则解答用户的问题。

# 知识库
# 津贴规则
{ALLOWANCE_RULES}

# 参团卡规则
{GROUP_CARD_RULES}

# 回复要求
1. 根据用户问题和历史对话判断用户意图
2. 回答要简洁明了，控制在50字以内
3. 确保信息准确，完全基于知识库内容
4. 语气友好自然
5. 如果问题超出知识库范围，建议咨询客服

请以JSON格式返回：
{{
    "message": "回复内容",
    "status": "normal/human_switch",
    "need_followup": false,
    "reason": "回复原因"
}}"#
        );

        let spec = GenerateSpec::classify(
            self.llm.model.clone(),
            Duration::from_secs(self.llm.timeout_secs),
        );
        match generate_json(&self.provider, &spec, &system_prompt, message).await {
            Ok(value) => {
                let status = match value["status"].as_str() {
                    Some("human_switch") => TurnStatus::HumanSwitch,
                    _ => TurnStatus::Normal,
                };
                let message = value["message"]
                    .as_str()
                    .unwrap_or(LLM_FALLBACK_MESSAGE)
                    .to_string();
                TurnResult::new(WorkflowId::AllowanceGroup, status, message).with_reason(
                    value["reason"]
                        .as_str()
                        .unwrap_or("规则咨询完成")
                        .to_string(),
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "Consult generation failed, falling back");
                TurnResult::new(
                    WorkflowId::AllowanceGroup,
                    TurnStatus::HumanSwitch,
                    LLM_FALLBACK_MESSAGE,
                )
                .with_reason(format!("错误：{e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use one_llm::{ChatRequest, ChatResponse, ProviderError};

    struct FixedProvider(&'static str);

    #[async_trait]
    impl Provider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                provider: "fixed".into(),
                model: request.model,
                content: self.0.to_string(),
                finish_reason: None,
                latency_ms: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_consult_reply_never_keeps_followup() {
        let handler = ConsultHandler::new(
            Arc::new(FixedProvider(
                r#"{"message": "津贴领取后3天内有效。", "status": "normal", "need_followup": false, "reason": "规则咨询完成"}"#,
            )),
            LlmConfig::default(),
        );
        let result = handler.handle("津贴有效期多久？").await;
        assert_eq!(result.status, TurnStatus::Normal);
        assert!(!result.need_followup);
        assert_eq!(result.workflow, WorkflowId::AllowanceGroup);
    }

    #[tokio::test]
    async fn test_unexpected_status_forced_to_normal() {
        let handler = ConsultHandler::new(
            Arc::new(FixedProvider(
                r#"{"message": "好的", "status": "workflow_switch", "reason": "x"}"#,
            )),
            LlmConfig::default(),
        );
        let result = handler.handle("津贴怎么用？").await;
        assert_eq!(result.status, TurnStatus::Normal);
    }

    #[tokio::test]
    async fn test_consult_failure_hands_to_human() {
        struct FailingProvider;

        #[async_trait]
        impl Provider for FailingProvider {
            fn name(&self) -> &str {
                "failing"
            }

            async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
                Err(ProviderError {
                    provider: "failing".into(),
                    model: request.model,
                    message: "unreachable".into(),
                    status_code: None,
                })
            }
        }

        let handler = ConsultHandler::new(Arc::new(FailingProvider), LlmConfig::default());
        let result = handler.handle("津贴怎么用？").await;
        assert_eq!(result.status, TurnStatus::HumanSwitch);
        assert_eq!(result.message, LLM_FALLBACK_MESSAGE);
    }
}
