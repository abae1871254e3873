//! Reflection Pipeline (C9): an async worker that drains the task queue the
//! Chat Coordinator feeds after every turn, self-assesses the interaction
//! against the configured principles, and writes the result back as a
//! durable memory. Queue and worker are split into their own modules since
//! the Chat Coordinator only ever needs `queue::ReflectionQueue::enqueue`
//! and `queue::ReflectionTask`, never the worker itself.

mod assessment;
mod queue;
mod worker;

pub use queue::{Delivery, ReflectionQueue, ReflectionTask};
pub use worker::{consumer_name, ReflectionWorker};
