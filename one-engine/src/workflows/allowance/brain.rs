//! Scene classification for the allowance & group-card workflow.
//!
//! The brain turns one message (plus recent history) into a typed
//! [`SceneDecision`]. On generator failure it returns a safe default that
//! requests an exit to `human` — the composite never leaves a session
//! without a terminal directive.

use crate::intent::history_text;
use one_common::config::LlmConfig;
use one_llm::{generate_json, GenerateSpec, Provider};
use one_session::{TurnRecord, WorkflowId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const BRAIN_PROMPT: &str = r#"# Role: 津贴&参团卡意图识别专家

# 任务
分析用户输入，判断具体意图并返回指令。

# 历史对话
{history}

# 场景类型
1. claim: 领取津贴或参团卡
2. calc: 商品优惠计算
3. consult: 咨询规则
4. other: 非相关意图

如果用户提到具体商品，请提取商品信息。

请返回JSON格式：
{
    "scene": "claim|calc|consult|other",
    "type": "allowance|group_card",
    "command": {
        "type": "领取优惠|商品优惠计算|咨询规则",
        "product_info": {
            "name": "商品名称",
            "id": "",
            "price": ""
        }
    }
}"#;

/// Scene selected by the brain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    Claim,
    Calc,
    Consult,
    Other,
}

impl SceneType {
    fn parse(s: &str) -> Self {
        match s {
            "claim" => Self::Claim,
            "calc" => Self::Calc,
            "consult" => Self::Consult,
            _ => Self::Other,
        }
    }
}

/// Kind of benefit under discussion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenefitType {
    Allowance,
    GroupCard,
}

impl BenefitType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allowance => "allowance",
            Self::GroupCard => "group_card",
        }
    }

    /// User-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Allowance => "津贴",
            Self::GroupCard => "参团卡",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "group_card" => Self::GroupCard,
            _ => Self::Allowance,
        }
    }
}

/// Product details extracted (or synthesized) for a calculation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub quantity: Option<u32>,
}

/// Brain command: what the user asked the workflow to do.
#[derive(Debug, Clone, Default)]
pub struct SceneCommand {
    /// Command kind string, e.g. "领取优惠"
    pub kind: String,
    pub product: ProductInfo,
}

/// One brain verdict.
#[derive(Debug, Clone)]
pub struct SceneDecision {
    pub scene: SceneType,
    pub benefit: BenefitType,
    pub command: SceneCommand,
    /// In-scene reply text, when the brain offered one
    pub reply: Option<String>,
    /// Exit target for the `Other` scene
    pub target_workflow: WorkflowId,
    /// Why the brain requested an exit
    pub exit_reason: Option<String>,
}

impl SceneDecision {
    /// Safe default after a generator failure: exit to human with the
    /// failure recorded.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            scene: SceneType::Other,
            benefit: BenefitType::Allowance,
            command: SceneCommand::default(),
            reply: None,
            target_workflow: WorkflowId::Human,
            exit_reason: Some(format!("生成服务调用失败: {}", reason.into())),
        }
    }
}

/// The allowance & group-card decision brain.
pub struct Brain {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl Brain {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// Classify one message into a scene decision.
    pub async fn think(&self, message: &str, history: &[TurnRecord]) -> SceneDecision {
        let prompt = BRAIN_PROMPT.replace("{history}", &history_text(history, 10));
        let spec = GenerateSpec::classify(
            self.llm.model.clone(),
            Duration::from_secs(self.llm.timeout_secs),
        );

        match generate_json(&self.provider, &spec, &prompt, message).await {
            Ok(value) => {
                let decision = parse_decision(&value);
                tracing::debug!(scene = ?decision.scene, benefit = ?decision.benefit, "Brain decision");
                decision
            }
            Err(e) => {
                tracing::warn!(error = %e, "Brain call failed, requesting human exit");
                SceneDecision::failure(e.to_string())
            }
        }
    }
}

fn parse_decision(value: &serde_json::Value) -> SceneDecision {
    let command = &value["command"];
    let product_value = &command["product_info"];
    let quantity = product_value["quantity"]
        .as_u64()
        .map(|q| q as u32)
        .or_else(|| product_value["quantity"].as_str().and_then(|s| s.parse().ok()));

    SceneDecision {
        scene: SceneType::parse(value["scene"].as_str().unwrap_or_default()),
        benefit: BenefitType::parse(value["type"].as_str().unwrap_or_default()),
        command: SceneCommand {
            kind: command["type"].as_str().unwrap_or_default().to_string(),
            product: ProductInfo {
                name: product_value["name"].as_str().unwrap_or_default().to_string(),
                id: product_value["id"].as_str().unwrap_or_default().to_string(),
                price: product_value["price"].as_str().unwrap_or_default().to_string(),
                quantity,
            },
        },
        reply: value["reply"].as_str().map(String::from),
        target_workflow: value["target_workflow"]
            .as_str()
            .map(WorkflowId::parse)
            .unwrap_or(WorkflowId::Human),
        exit_reason: value["exit_reason"].as_str().map(String::from),
    }
}
