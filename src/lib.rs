//! # Errata Queue
//!
//! Drains the errata queue into scheduled auto-update actions.
//!
//! Each queue row names an erratum and the channel it was published into. A
//! scheduling cycle selects pending rows and hands each one to a bounded
//! [`TaskQueue`](core::TaskQueue) of dedicated worker threads. A worker
//! claims its row, finds every auto-update server subscribed to the channel,
//! creates one action per server (committing each on its own), then writes a
//! notification marker and removes the row.
//!
//! ## Task queue
//!
//! `TaskQueue::submit` blocks while every worker is busy. Workers never hold
//! the queue itself; they receive a [`SlotLease`](core::SlotLease) that marks
//! the slot Running and frees it on drop, so a panicking job still releases
//! its slot.
//!
//! ## Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use errata_queue::builders::CycleBuilder;
//! use errata_queue::config;
//! use errata_queue::infra::{InMemoryActionEmitter, InMemoryStore, StaticStatusRegistry};
//!
//! errata_queue::util::init_tracing();
//! let store = Arc::new(InMemoryStore::new());
//! let cycle = CycleBuilder::new(config::load(None)?)
//!     .database(store.clone())
//!     .catalog(store.clone())
//!     .emitter(Arc::new(InMemoryActionEmitter::new()))
//!     .statuses(Arc::new(StaticStatusRegistry::with_defaults()))
//!     .build()?;
//! let report = cycle.run_once()?;
//! println!("{} actions scheduled", report.actions_scheduled);
//! cycle.shutdown();
//! ```
//!
//! Store, catalog, emitter, and status registry are traits in
//! [`core::ports`]; `infra::memory` provides in-process implementations and
//! `infra::postgres` the SQL an external executor binds.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Queue, worker, cycle, and the ports they consume.
pub mod core;
/// Configuration models and loading.
pub mod config;
/// Builders to construct a cycle from configuration.
pub mod builders;
/// Infrastructure adapters for the store and action emitter.
pub mod infra;
/// Shared utilities.
pub mod util;
