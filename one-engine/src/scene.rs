//! Scene routing: classified intent → workflow and tier.

use one_session::{Tier, WorkflowId};

/// A routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub workflow: WorkflowId,
    pub tier: Tier,
}

/// Pure mapping from a main intent to a workflow route.
pub struct SceneRouter;

impl SceneRouter {
    /// Route a main intent.
    ///
    /// Total and deterministic: every input yields a route, unknown intents
    /// fall back to `(confirm, primary)`.
    pub fn route(main_intent: &str) -> Route {
        let (workflow, tier) = match main_intent {
            "group_card" | "allowance" => (WorkflowId::AllowanceGroup, Tier::Primary),
            "cashback" => (WorkflowId::Cashback, Tier::Primary),
            "human" => (WorkflowId::Human, Tier::Primary),
            "coupon" => (WorkflowId::Cashback, Tier::Secondary),
            _ => (WorkflowId::Confirm, Tier::Primary),
        };
        Route { workflow, tier }
    }
}
