//! Business constants for the allowance & group-card workflow.

/// Command kind emitted by the brain for a claim request.
pub const COMMAND_CLAIM: &str = "领取优惠";
/// Command kind emitted by the brain for a discount calculation.
pub const COMMAND_CALC: &str = "商品优惠计算";

/// Flat allowance credit granted per claim, in yuan.
pub const ALLOWANCE_AMOUNT: u32 = 200;

/// Allowance discount: 10% of the subtotal, capped.
pub const ALLOWANCE_DISCOUNT_RATE: f64 = 0.10;
/// Cap on the allowance discount, in yuan.
pub const ALLOWANCE_DISCOUNT_CAP: f64 = 200.0;
/// Group-card discount: 15% of the subtotal, uncapped.
pub const GROUP_CARD_DISCOUNT_RATE: f64 = 0.15;

/// Defaults used when a product can't be resolved from the conversation.
pub const DEFAULT_PRODUCT_NAME: &str = "iPhone15pro";
pub const DEFAULT_PRODUCT_ID: &str = "P001";
pub const DEFAULT_PRODUCT_PRICE: &str = "7999.00";

/// Filler phrases stripped when synthesizing a product name from free text.
pub const FILLER_PHRASES: &[&str] = &["我想买", "帮我看看优惠"];

/// Allowance rule knowledge base.
pub const ALLOWANCE_RULES: &str = r#"1. 领取规则：
- 活动时间：11月1日-11月11日
- 活动内容：商城首页15%津贴抵扣活动
- 领取额度：可领取999元津贴

2. 使用规则：
- 抵扣比例：一般8%-10%，特殊活动可达15%
- 使用方式：可单独或多件商品一起使用
- 叠加规则：多个津贴可叠加，但不能与其他优惠活动叠加
- 有效期：领取后3天内有效

3. 退款规则：
- 有效期内退款：津贴仍可继续使用
- 过期后退款：津贴不可继续使用"#;

/// Group-card rule knowledge base.
pub const GROUP_CARD_RULES: &str = r#"1. 领取规则：
- 在指定活动中领取
- 领取数量因活动而异

2. 使用规则：
- 适用范围：团购活动商品
- 优惠力度：无最低消费限制
- 特别说明：部分商品可能不参与活动

3. 有效期规则：
- 在指定活动有效期内使用
- 过期自动失效"#;
