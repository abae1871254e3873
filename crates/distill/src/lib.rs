//! Nightly Distillation Worker (C10): promotes recurring, emotionally
//! salient or confidently-held reflections into durable principles, sweeps
//! eligible ITM memories into LTM, and canonicalizes expired tombstones.

mod groups;
mod scheduler;

pub use groups::{group_reflections, ReflectionGroup};
pub use scheduler::{DistillationScheduler, DistillationSummary};
