//! One Engine - conversation orchestration for the One bot.
//!
//! This crate provides:
//! - Intent classification over the LLM boundary
//! - Scene routing from intents to workflows
//! - Workflow handlers (confirm, cashback, human, allowance-group)
//! - The per-user conversation engine and its turn algorithm
//! - The HTTP chat API

#![warn(clippy::all)]

pub mod engine;
pub mod intent;
pub mod routes;
pub mod scene;
pub mod workflows;

pub use engine::{ConversationEngine, EngineReply};
pub use intent::{Intent, IntentClassifier, SwitchDetector};
pub use routes::{build_router, AppState};
pub use scene::{Route, SceneRouter};
pub use workflows::{TurnResult, TurnStatus, Workflow, WorkflowRegistry};
