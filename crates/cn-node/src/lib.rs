//! CAN node: library half of the `cn-node` binary.
//!
//! Exposes config loading, runner wiring and the status loop so that
//! `cn-e2e-tests` can drive a whole node against the mock transport.

pub mod config;
pub mod node;
pub mod status;
