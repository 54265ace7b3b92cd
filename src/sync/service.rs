//! The phase synchronization service.

use muster_common::PhasePath;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::options::{LeaveValue, PhaseOptions};
use super::state::{SyncSnapshot, SyncState};
use crate::errors::SyncError;

/// Result of a successful `enter_phase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterOutcome {
    /// The phase every target was in before entering
    pub previous: PhasePath,
    /// The phase every target is in now
    pub phase: PhasePath,
    /// Guard outcome; unguarded targets skip their work but still leave
    pub guarded: bool,
}

/// Result of a successful `leave_phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// The target is blocked until its siblings arrive.
    Waiting,
    /// This arrival completed the barrier and `count` handles were signalled.
    Released { count: usize },
}

/// Barrier state machine shared by the per-target tasks of one run.
///
/// Every operation is one transition applied inside a single short critical
/// section. Guards, `leave_value`, `on_complete` and release handles all run
/// after the section is left, so callbacks may call back into the service.
#[derive(Debug, Default)]
pub struct PhaseSyncService {
    state: Mutex<SyncState>,
}

impl PhaseSyncService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `segment` for every target in lock-step.
    pub fn enter_phase(
        &self,
        segment: &str,
        targets: &[String],
        options: PhaseOptions,
    ) -> Result<EnterOutcome, SyncError> {
        let guarded = options.evaluate_guard();
        let previous = self.lock().enter(segment, targets, &options, guarded)?;
        let phase = previous.child(segment);

        debug!(
            phase = %phase,
            targets = targets.len(),
            guarded,
            "Cohort entered phase"
        );

        Ok(EnterOutcome {
            previous,
            phase,
            guarded,
        })
    }

    /// Block `target` at the exit of `segment` until every sibling arrives.
    ///
    /// `release` is signalled exactly once, when the barrier opens. The call
    /// that completes the barrier signals every member before returning.
    pub fn leave_phase(
        &self,
        segment: &str,
        target: &str,
        release: oneshot::Sender<LeaveValue>,
    ) -> Result<LeaveOutcome, SyncError> {
        let batch = self.lock().leave(segment, target, release)?;

        let Some(batch) = batch else {
            debug!(node = target, phase = segment, "Target blocked at phase exit");
            return Ok(LeaveOutcome::Waiting);
        };

        let count = batch.releases.len();
        debug!(
            phase = %batch.outcome.phase,
            count,
            aborted = batch.outcome.any_aborted(),
            "Releasing cohort"
        );

        for release in batch.releases {
            let value = release.options.leave_value(&batch.outcome);
            if value.is_continue() && release.guarded {
                release.options.complete();
            }
            if release.handle.send(value).is_err() {
                warn!(
                    node = %release.target,
                    phase = %batch.outcome.phase,
                    "Release handle dropped before the barrier opened"
                );
            }
        }

        Ok(LeaveOutcome::Released { count })
    }

    /// Record that `target` failed inside `segment`; its cohort is released
    /// with the abort folded into the outcome.
    pub fn abort_phase(&self, segment: &str, target: &str) -> Result<(), SyncError> {
        self.lock().abort(segment, target)?;
        debug!(node = target, phase = segment, "Target aborted phase");
        Ok(())
    }

    pub fn current_phase(&self, target: &str) -> PhasePath {
        self.lock().current_phase(target)
    }

    pub fn dump_state(&self) -> SyncSnapshot {
        self.lock().snapshot()
    }

    fn lock(&self) -> MutexGuard<'_, SyncState> {
        // Transitions validate before writing, so a poisoned lock still
        // guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
