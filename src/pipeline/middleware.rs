//! Phase middleware.
//!
//! A group's `PhaseDef` may name a middleware tag. Targets sharing a tag run
//! through the registered middleware: `before` sees every target of the
//! group before any task is dispatched, `after` sees (and may amend) their
//! results once all of them finished.

use anyhow::Result;
use async_trait::async_trait;
use muster_common::{PhaseResult, Target};

#[async_trait]
pub trait PhaseMiddleware: Send + Sync {
    /// Failing here fails the phase for every target of the group.
    async fn before(&self, _phase: &str, _targets: &[Target]) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _phase: &str, _results: &mut [PhaseResult]) -> Result<()> {
        Ok(())
    }
}
