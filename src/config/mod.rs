//! Configuration for the task queue and the scheduling cycle.

pub mod queue;

pub use queue::{load, QueueConfig};
