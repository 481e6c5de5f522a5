//! Intent classification over the LLM boundary.
//!
//! Both components fail closed: a classifier failure yields the `general`
//! intent, a switch-detector failure yields "no switch". Neither retries.

use one_common::config::LlmConfig;
use one_llm::{generate_json, GenerateSpec, Provider};
use one_session::{Role, TurnRecord, WorkflowId};
use std::sync::Arc;
use std::time::Duration;

/// Default intent when classification fails.
pub const DEFAULT_INTENT: &str = "general";

const INTENT_PROMPT: &str = r#"# Role: 电商客服意图识别专家

# Background
你是一个专业的电商客服意图识别专家，负责准确识别用户的意图。你需要以JSON格式返回分析结果。

# Goals
1. 准确识别用户的主要意图
2. 返回规范的JSON格式结果

# Important Rules
1. 必须且只能从以下6个意图中选择一个返回
2. 参团卡相关问题必须返回 group_card
3. 返现活动相关问题必须返回 cashback
4. 津贴相关问题必须返回 allowance
5. 需要人工服务必须返回 human
6. 优惠券相关问题必须返回 coupon
7. 其他通用对话返回 general

# Available Intents (仅返回以下意图之一)
1. group_card: 参团卡相关问题
2. cashback: 返现活动相关问题
3. allowance: 津贴相关问题
4. human: 需要人工服务
5. coupon: 优惠券相关问题
6. general: 其他通用对话

# Output Format
{
    "main_intent": "group_card|cashback|allowance|human|coupon|general"
}

# Examples
用户: 你好，在吗？
{
    "main_intent": "general"
}

用户: 我想了解一下参团卡
{
    "main_intent": "group_card"
}"#;

/// Classified intent for one message. Transient — never persisted.
#[derive(Debug, Clone)]
pub struct Intent {
    /// One of the closed intent set, or `general`
    pub main_intent: String,
    /// Classifier confidence, when reported
    pub confidence: Option<f64>,
    /// Extracted entities, when reported
    pub entities: Option<serde_json::Value>,
}

impl Default for Intent {
    fn default() -> Self {
        Self {
            main_intent: DEFAULT_INTENT.to_string(),
            confidence: None,
            entities: None,
        }
    }
}

/// Render recent history as dialogue text, newest last.
///
/// System bookkeeping records are skipped — they are markers, not dialogue.
pub(crate) fn history_text(messages: &[TurnRecord], max_turns: usize) -> String {
    let dialogue: Vec<&TurnRecord> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect();
    let skip = dialogue.len().saturating_sub(max_turns);
    dialogue[skip..]
        .iter()
        .map(|m| match m.role {
            Role::User => format!("用户: {}", m.content),
            _ => format!("助手: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Intent classifier over the shared generator client.
pub struct IntentClassifier {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl IntentClassifier {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// Classify a message against the closed intent set.
    ///
    /// Fails closed to [`DEFAULT_INTENT`] on any backend or format error.
    pub async fn classify(&self, message: &str, history: &[TurnRecord]) -> Intent {
        let recent = history_text(history, 10);
        let prompt = if recent.is_empty() {
            INTENT_PROMPT.to_string()
        } else {
            format!("# 对话历史\n{recent}\n\n{INTENT_PROMPT}")
        };

        let spec = GenerateSpec::classify(
            self.llm.model.clone(),
            Duration::from_secs(self.llm.timeout_secs),
        );
        match generate_json(&self.provider, &spec, &prompt, message).await {
            Ok(value) => {
                let main_intent = value["main_intent"]
                    .as_str()
                    .unwrap_or(DEFAULT_INTENT)
                    .to_string();
                tracing::debug!(intent = %main_intent, "Classified intent");
                Intent {
                    main_intent,
                    confidence: value["confidence"].as_f64(),
                    entities: value.get("entities").cloned(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Intent classification failed, using default");
                Intent::default()
            }
        }
    }
}

/// Detects whether the user is leaving the current workflow's topic.
///
/// Wired behind `intent.switch_detection`; defaults to "no switch" on
/// backend failure so a flaky generator never evicts a live workflow.
pub struct SwitchDetector {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl SwitchDetector {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// Check whether the message asks for something outside `current`.
    pub async fn check_switch(
        &self,
        message: &str,
        current: WorkflowId,
        history: &[TurnRecord],
    ) -> bool {
        let recent = history_text(history, 10);
        let prompt = format!(
            r#"你是意图切换检测专家。当前用户正在 {} 场景中。

# 对话历史
{recent}

# 规则
1. 如果用户明确提出新的需求，返回需要切换
2. 如果用户继续当前话题，返回不需要切换
3. 如果不确定，返回不需要切换

请返回 JSON 格式：{{"need_switch": true/false}}"#,
            current.as_str()
        );

        let spec = GenerateSpec::reply(
            self.llm.model.clone(),
            Duration::from_secs(self.llm.timeout_secs),
        )
        .with_temperature(0.7);
        match generate_json(&self.provider, &spec, &prompt, message).await {
            Ok(value) => value["need_switch"].as_bool().unwrap_or(false),
            Err(e) => {
                tracing::warn!(error = %e, "Switch detection failed, staying in workflow");
                false
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

    #[tokio::test]
    async fn test_classify_parses_main_intent() {
        let classifier = IntentClassifier::new(
            Arc::new(FixedProvider(r#"{"main_intent": "group_card"}"#)),
            LlmConfig::default(),
        );
        let intent = classifier.classify("我想了解一下参团卡", &[]).await;
        assert_eq!(intent.main_intent, "group_card");
    }

    #[tokio::test]
    async fn test_classify_fails_closed_to_general() {
        let classifier =
            IntentClassifier::new(Arc::new(FailingProvider), LlmConfig::default());
        let intent = classifier.classify("你好", &[]).await;
        assert_eq!(intent.main_intent, DEFAULT_INTENT);
    }

    #[tokio::test]
    async fn test_classify_malformed_field_falls_back() {
        let classifier = IntentClassifier::new(
            Arc::new(FixedProvider(r#"{"main_intent": 42}"#)),
            LlmConfig::default(),
        );
        let intent = classifier.classify("你好", &[]).await;
        assert_eq!(intent.main_intent, DEFAULT_INTENT);
    }

    #[tokio::test]
    async fn test_switch_detector_fails_closed_to_false() {
        let detector = SwitchDetector::new(Arc::new(FailingProvider), LlmConfig::default());
        assert!(
            !detector
                .check_switch("我要退款", WorkflowId::Cashback, &[])
                .await
        );
    }

    #[tokio::test]
    async fn test_switch_detector_reads_flag() {
        let detector = SwitchDetector::new(
            Arc::new(FixedProvider(r#"{"need_switch": true}"#)),
            LlmConfig::default(),
        );
        assert!(
            detector
                .check_switch("我要退款", WorkflowId::Cashback, &[])
                .await
        );
    }

    #[test]
    fn test_history_text_skips_system_records() {
        let messages = vec![
            TurnRecord::user("你好"),
            TurnRecord::workflow_marker("workflow status: confirm", serde_json::Value::Null),
            TurnRecord::assistant("您好，请问有什么可以帮您？"),
        ];
        let text = history_text(&messages, 10);
        assert_eq!(text, "用户: 你好\n助手: 您好，请问有什么可以帮您？");
    }

    #[test]
    fn test_history_text_window() {
        let messages: Vec<TurnRecord> =
            (0..6).map(|i| TurnRecord::user(format!("m{i}"))).collect();
        let text = history_text(&messages, 2);
        assert_eq!(text, "用户: m4\n用户: m5");
    }
}
