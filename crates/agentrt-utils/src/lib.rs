//! Ambient stack shared by the agent runtime crates: tracing setup and a
//! handful of small error-conversion helpers used at crate boundaries.

pub mod telemetry;

pub use telemetry::init_tracing;
