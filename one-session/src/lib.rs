//! Session data model and persistence for the One bot.
//!
//! This crate provides:
//! - Turn records and the per-user session context
//! - The bounded two-level workflow stack and its invariants
//! - The `SessionStore` trait with SQLite and in-memory backends

#![warn(clippy::all)]

mod memory;
mod sqlite;
mod store;
mod types;

pub use memory::MemorySessionStore;
pub use sqlite::SqliteSessionStore;
pub use store::SessionStore;
pub use types::{MessageType, Role, SessionContext, Tier, TurnRecord, WorkflowId};
