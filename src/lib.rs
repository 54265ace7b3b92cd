//! Muster: converge a fleet of nodes onto a declared group topology, then run
//! named phases across the fleet with optional cross-node barriers.
//!
//! The entry point for library users is [`orchestrator::ConvergeOrchestrator`].
//! Shared domain types (nodes, groups, phase results) live in `muster-common`.

pub mod config;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod reconcile;
pub mod sync;

pub use muster_common as common;
