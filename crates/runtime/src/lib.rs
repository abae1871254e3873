//! Chat Coordinator (C11): wires the LLM Provider Orchestrator, Tiered
//! Memory Engine, Usage Ledger, and Reflection task queue into the
//! single-turn request sequence spec.md §4.11 defines.

mod coordinator;

pub use coordinator::{ChatCoordinator, ChatTurnRequest, ChatTurnResponse};
