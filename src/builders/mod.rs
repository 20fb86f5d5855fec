//! Builders to assemble the errata queue from configuration and collaborators.

pub mod cycle_builder;

pub use cycle_builder::CycleBuilder;
