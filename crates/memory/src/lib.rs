//! Tiered Memory Engine: Redis Tier Store (C5), Relational Memory Store
//! (C6), Usage Ledger (C7), and the Memory Engine façade (C8) that the Chat
//! Coordinator and Distillation Scheduler call against.

mod engine;
mod redis_store;
mod relational_store;
mod storage;
mod usage_ledger;

pub use engine::{MemoryContext, MemoryEngine};
pub use redis_store::TierStore;
pub use relational_store::{NewMemory, RelationalStore};
pub use storage::{bytes_to_human_readable, estimate_memory_size};
pub use usage_ledger::UsageLedger;
