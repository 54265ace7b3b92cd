//! Phase executor seam.
//!
//! The pipeline never interprets phase commands itself; it hands each
//! `(target, phase)` pair to a `PhaseExecutor`. Ordinary action failures are
//! reported inside the returned `PhaseResult`. `Err` is reserved for faults
//! that stop the phase from running at all.

mod shell;

pub use shell::ShellExecutor;

use async_trait::async_trait;
use muster_common::{PhaseResult, Target};

#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    async fn execute(&self, target: &Target, phase: &str) -> anyhow::Result<PhaseResult>;
}
