//! Shared domain types for the muster convergence engine.
//!
//! These types are consumed by the engine and by the collaborator
//! implementations (node providers, phase executors):
//! - `Node` / `AdminUser` - what a provider returns and needs
//! - `GroupSpec` - desired state for a named set of nodes
//! - `Target` - a node bound to its group
//! - `PhasePath` / `PhaseDef` - phase identity and declaration
//! - `PhaseResult` / `ActionResult` - per-target execution outcome

pub mod group;
pub mod node;
pub mod phase;
pub mod result;
pub mod target;

pub use group::{GroupSpec, NodeFilter};
pub use node::{AdminUser, Node};
pub use phase::{PhaseDef, PhasePath};
pub use result::{ActionResult, PhaseResult};
pub use target::Target;
