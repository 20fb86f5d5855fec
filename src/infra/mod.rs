//! Infrastructure adapters: an in-memory store for tests and embedding, and
//! the Postgres statement catalog for external executors.

pub mod memory;
pub mod postgres;

pub use memory::{InMemoryActionEmitter, InMemoryStore, StaticStatusRegistry};
