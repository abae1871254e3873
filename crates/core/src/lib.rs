//! Shared domain vocabulary for the memory/reflection backend.
//!
//! Every other crate in the workspace imports its `Memory`, `MemoryTier`,
//! `MemoryType`, `Outcome` and `AigentError` from here rather than redefining
//! them, so a tier transition or a new error kind only needs to change in one
//! place.

mod error;
mod memory;
mod metadata;

pub use error::AigentError;
pub use memory::{
    AccountTier, DistilledKnowledge, ItmEntry, Memory, MemoryPatch, MemoryTier, MemoryType,
    Outcome, ResourceType, StmInteraction, UsageLedgerEntry,
};
pub use metadata::{Metadata, MetadataValue};

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, AigentError>;

/// Embedding dimensionality the whole stack is built around (C2's contract).
pub const EMBEDDING_DIM: usize = 384;
