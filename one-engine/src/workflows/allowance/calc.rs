//! Calculate scene: price a purchase against an allowance or group card.
//!
//! Runs in two steps across turns. The first turn resolves the product
//! (extracted by the brain or synthesized from free text) and, lacking a
//! quantity, stages the partial product and waits. The continuation turn
//! resolves the quantity — local parsing first, then the generator's
//! quantity classifier, and only for non-quantity input the brain decides
//! whether to stay in scene or exit.

use super::brain::{BenefitType, Brain, ProductInfo, SceneDecision, SceneType};
use super::constants::{
    ALLOWANCE_DISCOUNT_CAP, ALLOWANCE_DISCOUNT_RATE, COMMAND_CALC, DEFAULT_PRODUCT_ID,
    DEFAULT_PRODUCT_NAME, DEFAULT_PRODUCT_PRICE, FILLER_PHRASES, GROUP_CARD_DISCOUNT_RATE,
};
use crate::workflows::{OrderCard, TurnResult, TurnStatus};
use one_common::config::LlmConfig;
use one_llm::{generate_json, GenerateSpec, Provider};
use one_session::{SessionContext, WorkflowId};
use std::sync::Arc;
use std::time::Duration;

const QUANTITY_PROMPT: &str = r#"你是一个专业的数量识别助手。请严格按照指定格式返回结果。
判断用户输入是否为商品数量。

规则：
1. 支持的数量格式：
   - 纯数字："5"
   - 带单位："5件"、"5个"
   - 中文数字："五件"、"五个"
2. 如果是数量，需要转换为阿拉伯数字
3. 如果不是数量，返回 is_quantity=false

请返回JSON格式：
{
    "is_quantity": true/false,
    "value": 数量值(阿拉伯数字),
    "reason": "判断原因"
}

示例：
输入："5件" -> {"is_quantity": true, "value": 5, "reason": "明确的数量表达"}
输入："五个" -> {"is_quantity": true, "value": 5, "reason": "中文数字数量表达"}
输入："我要退款" -> {"is_quantity": false, "value": null, "reason": "非数量表达"}"#;

/// The calculate scene handler.
pub struct CalcHandler {
    provider: Arc<dyn Provider>,
    llm: LlmConfig,
}

impl CalcHandler {
    pub fn new(provider: Arc<dyn Provider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// First entry: validate the command, resolve the product, and either
    /// compute or wait for a quantity.
    pub fn handle(&self, message: &str, ctx: &SessionContext, decision: &SceneDecision) -> TurnResult {
        if decision.command.kind != COMMAND_CALC {
            return TurnResult::new(
                WorkflowId::AllowanceGroup,
                TurnStatus::Error,
                "抱歉，指令类型不正确，请重新尝试。",
            )
            .with_reason("指令类型错误");
        }

        let mut product = decision.command.product.clone();
        if product.name.is_empty() || product.price.is_empty() || product.price == "未提供" {
            product = synthesize_product(message);
        }

        match product.quantity {
            Some(quantity) => compute(ctx, product, quantity),
            None => TurnResult::new(
                WorkflowId::AllowanceGroup,
                TurnStatus::WaitingQuantity,
                "请问您要购买几件呢？我帮您看看怎么下单最优惠~",
            )
            .with_followup(true)
            .with_reason("等待用户输入数量")
            .with_context_data(serde_json::json!({
                "scene": "calc",
                "product_info": product,
            })),
        }
    }

    /// Continuation entry while the `calc` secondary tier is active.
    pub async fn handle_quantity_input(
        &self,
        message: &str,
        ctx: &SessionContext,
        brain: &Brain,
    ) -> TurnResult {
        // A fresh product query restarts the calculation instead of being
        // force-read as a quantity.
        if message.contains("我想买") || message.contains("看看优惠") {
            let decision = SceneDecision {
                scene: SceneType::Calc,
                benefit: BenefitType::Allowance,
                command: super::brain::SceneCommand {
                    kind: COMMAND_CALC.to_string(),
                    product: ProductInfo::default(),
                },
                reply: None,
                target_workflow: WorkflowId::Human,
                exit_reason: None,
            };
            return self.handle(message, ctx, &decision);
        }

        if let Some(quantity) = parse_quantity(message) {
            return resolve_quantity(ctx, quantity);
        }

        if let Some(quantity) = self.classify_quantity(message).await {
            return resolve_quantity(ctx, quantity);
        }

        // Not a quantity — let the brain decide whether to stay in scene.
        let decision = brain.think(message, &ctx.messages).await;
        match decision.scene {
            SceneType::Claim | SceneType::Calc | SceneType::Consult => TurnResult::new(
                WorkflowId::AllowanceGroup,
                TurnStatus::Normal,
                decision
                    .reply
                    .unwrap_or_else(|| "抱歉，我没有理解您的问题".to_string()),
            )
            .with_followup(true)
            .with_secondary(WorkflowId::Calc)
            .with_reason("处理津贴相关问题"),
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
        }
    }

    /// Ask the generator whether the input is a quantity.
    ///
    /// Any failure or non-quantity verdict yields `None` — the brain takes
    /// over from there.
    async fn classify_quantity(&self, message: &str) -> Option<u32> {
        let spec = GenerateSpec::classify(
            self.llm.model.clone(),
            Duration::from_secs(self.llm.timeout_secs),
        )
        .with_temperature(0.1);

        match generate_json(&self.provider, &spec, QUANTITY_PROMPT, message).await {
            Ok(value) if value["is_quantity"].as_bool() == Some(true) => {
                value["value"].as_u64().map(|q| q as u32)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Quantity classification failed");
                None
            }
        }
    }
}

/// Build a product from free text: strip known filler phrases, fall back
/// to the default price.
fn synthesize_product(message: &str) -> ProductInfo {
    let mut name = message.to_string();
    for phrase in FILLER_PHRASES {
        name = name.replace(phrase, "");
    }
    ProductInfo {
        name: name.trim().to_string(),
        id: DEFAULT_PRODUCT_ID.to_string(),
        price: DEFAULT_PRODUCT_PRICE.to_string(),
        quantity: None,
    }
}

/// Merge the resolved quantity into the staged product and compute.
fn resolve_quantity(ctx: &SessionContext, quantity: u32) -> TurnResult {
    let mut product: ProductInfo = ctx
        .workflow_state
        .get("product_info")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    if product.name.is_empty() {
        product.name = DEFAULT_PRODUCT_NAME.to_string();
    }
    if product.price.is_empty() {
        product.price = DEFAULT_PRODUCT_PRICE.to_string();
    }
    if product.id.is_empty() {
        product.id = DEFAULT_PRODUCT_ID.to_string();
    }
    product.quantity = Some(quantity);

    compute(ctx, product, quantity)
}

/// Compute the discount and build the order summary.
///
/// The benefit kind granted by an earlier claim is authoritative; the
/// random draw only covers direct-entry calculation with no prior claim.
fn compute(ctx: &SessionContext, product: ProductInfo, quantity: u32) -> TurnResult {
    let benefit = granted_benefit(ctx).unwrap_or_else(|| {
        if rand::random::<bool>() {
            BenefitType::Allowance
        } else {
            BenefitType::GroupCard
        }
    });

    let Ok(price) = product.price.trim().parse::<f64>() else {
        tracing::warn!(price = %product.price, "Unparseable product price");
        return TurnResult::new(
            WorkflowId::AllowanceGroup,
            TurnStatus::Error,
            "抱歉，计算优惠时出现问题，请稍后重试。",
        )
        .with_reason(format!("计算错误: 无法解析价格 {}", product.price));
    };

    let subtotal = price * f64::from(quantity);
    let discount = match benefit {
        BenefitType::Allowance => (subtotal * ALLOWANCE_DISCOUNT_RATE).min(ALLOWANCE_DISCOUNT_CAP),
        BenefitType::GroupCard => subtotal * GROUP_CARD_DISCOUNT_RATE,
    };
    let final_price = subtotal - discount;

    let card = OrderCard {
        product_name: product.name.clone(),
        original_price: format!("{subtotal:.2}"),
        benefit_type: benefit.label().to_string(),
        discount_amount: format!("{discount:.2}"),
        final_price: format!("{final_price:.2}"),
        product_id: product.id.clone(),
        quantity,
    };

    TurnResult::new(
        WorkflowId::AllowanceGroup,
        TurnStatus::Normal,
        "已为您生成优惠下单，点击卡片可直接下单，记得及时付款哦~",
    )
    .with_reason("优惠计算完成")
    .with_order_card(card)
    .with_context_data(serde_json::json!({ "product_info": product }))
}

/// Benefit kind already granted by Claim in this session, if any.
fn granted_benefit(ctx: &SessionContext) -> Option<BenefitType> {
    ctx.workflow_state
        .get("benefit_info")
        .and_then(|info| info["type"].as_str())
        .map(BenefitType::parse)
}

/// Parse a quantity locally: digits with an optional unit, or spelled-out
/// Chinese numerals up to 99.
pub(super) fn parse_quantity(text: &str) -> Option<u32> {
    let trimmed: String = text
        .trim()
        .trim_end_matches(['件', '个', '台', '张', '只', '部'])
        .to_string();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed.parse().ok().filter(|&q| q > 0);
    }

    parse_chinese_numeral(&trimmed)
}

fn chinese_digit(c: char) -> Option<u32> {
    match c {
        '一' => Some(1),
        '两' | '二' => Some(2),
        '三' => Some(3),
        '四' => Some(4),
        '五' => Some(5),
        '六' => Some(6),
        '七' => Some(7),
        '八' => Some(8),
        '九' => Some(9),
        _ => None,
    }
}

fn parse_chinese_numeral(text: &str) -> Option<u32> {
    let chars: Vec<char> = text.chars().collect();
    match chars.as_slice() {
        [c] if *c == '十' => Some(10),
        [c] => chinese_digit(*c),
        ['十', c] => chinese_digit(*c).map(|units| 10 + units),
        [c, '十'] => chinese_digit(*c).map(|tens| tens * 10),
        [tens, '十', units] => {
            Some(chinese_digit(*tens)? * 10 + chinese_digit(*units)?)
        }
        _ => None,
    }
}
