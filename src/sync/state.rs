//! Barrier state and its transitions.
//!
//! `SyncState` is only ever touched through the methods here. Each method
//! validates every precondition before its first write, so a failed
//! transition leaves the state exactly as it found it. Release handles and
//! callbacks are handed back to the caller in a `ReleaseBatch` rather than
//! being fired from inside a transition.

use muster_common::PhasePath;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::oneshot;

use super::options::{CohortOutcome, LeaveValue, MemberOutcome, PhaseOptions};
use crate::errors::SyncError;

/// One level of a target's phase stack.
#[derive(Debug)]
pub(crate) struct PhaseFrame {
    segment: String,
    options: PhaseOptions,
    guarded: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TargetPhaseState {
    frames: Vec<PhaseFrame>,
    blocked: Option<oneshot::Sender<LeaveValue>>,
    aborted: bool,
}

impl TargetPhaseState {
    fn path(&self) -> PhasePath {
        PhasePath::new(self.frames.iter().map(|f| f.segment.as_str()))
    }

    fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }
}

/// A single member's release, produced when its cohort's barrier opens.
#[derive(Debug)]
pub(crate) struct Release {
    pub target: String,
    pub options: PhaseOptions,
    pub guarded: bool,
    pub handle: oneshot::Sender<LeaveValue>,
}

/// Everything needed to signal a released cohort.
#[derive(Debug)]
pub(crate) struct ReleaseBatch {
    pub outcome: CohortOutcome,
    pub releases: Vec<Release>,
}

#[derive(Debug, Default)]
pub(crate) struct SyncState {
    targets: HashMap<String, TargetPhaseState>,
}

impl SyncState {
    pub fn current_phase(&self, target: &str) -> PhasePath {
        self.targets
            .get(target)
            .map(TargetPhaseState::path)
            .unwrap_or_default()
    }

    /// Push `segment` onto every target's stack. Targets must be distinct and
    /// currently share one phase path; that path is returned.
    pub fn enter(
        &mut self,
        segment: &str,
        targets: &[String],
        options: &PhaseOptions,
        guarded: bool,
    ) -> Result<PhasePath, SyncError> {
        let mut seen = HashSet::new();
        if let Some(duplicate) = targets.iter().find(|t| !seen.insert(t.as_str())) {
            return Err(SyncError::DuplicateTarget {
                target: duplicate.clone(),
                phase: segment.to_string(),
            });
        }

        let distinct: BTreeSet<PhasePath> =
            targets.iter().map(|t| self.current_phase(t)).collect();

        if distinct.len() > 1 {
            return Err(SyncError::HeterogeneousPhase {
                phase: segment.to_string(),
                phases: distinct.into_iter().collect(),
            });
        }
        let previous = distinct.into_iter().next().unwrap_or_default();

        for target in targets {
            self.targets
                .entry(target.clone())
                .or_default()
                .frames
                .push(PhaseFrame {
                    segment: segment.to_string(),
                    options: options.clone(),
                    guarded,
                });
        }

        Ok(previous)
    }

    /// Block `target` on leaving `segment`. Returns the cohort's releases if
    /// this arrival completed the barrier.
    pub fn leave(
        &mut self,
        segment: &str,
        target: &str,
        handle: oneshot::Sender<LeaveValue>,
    ) -> Result<Option<ReleaseBatch>, SyncError> {
        let path = self.checked_path(segment, target)?;
        let state = self
            .targets
            .get_mut(target)
            .ok_or_else(|| SyncError::UnknownTarget {
                target: target.to_string(),
            })?;
        if state.is_blocked() {
            return Err(SyncError::AlreadyBlocked {
                target: target.to_string(),
                phase: path,
            });
        }
        state.blocked = Some(handle);

        let parent = path.parent().unwrap_or_default();
        let mut cohort: Vec<String> = Vec::new();
        for (id, state) in &self.targets {
            let current = state.path();
            if !parent.is_ancestor_of(&current) {
                continue;
            }
            if current != path || !state.is_blocked() {
                return Ok(None);
            }
            cohort.push(id.clone());
        }
        cohort.sort();

        Ok(Some(self.release(path, cohort)))
    }

    /// Mark `target` as having aborted `segment`.
    pub fn abort(&mut self, segment: &str, target: &str) -> Result<(), SyncError> {
        let path = self.checked_path(segment, target)?;
        let state = self
            .targets
            .get_mut(target)
            .ok_or_else(|| SyncError::UnknownTarget {
                target: target.to_string(),
            })?;
        if state.is_blocked() {
            return Err(SyncError::AbortWhileBlocked {
                target: target.to_string(),
                phase: path,
            });
        }
        state.aborted = true;
        Ok(())
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let targets = self
            .targets
            .iter()
            .map(|(id, state)| {
                (
                    id.clone(),
                    TargetSnapshot {
                        phase: state.path(),
                        blocked: state.is_blocked(),
                        aborted: state.aborted,
                        guarded: state.frames.iter().map(|f| f.guarded).collect(),
                    },
                )
            })
            .collect();
        SyncSnapshot { targets }
    }

    /// The target's current path, checked to end in `segment`.
    fn checked_path(&self, segment: &str, target: &str) -> Result<PhasePath, SyncError> {
        let state = self
            .targets
            .get(target)
            .ok_or_else(|| SyncError::UnknownTarget {
                target: target.to_string(),
            })?;
        let path = state.path();
        if path.last() != Some(segment) {
            return Err(SyncError::PhaseMismatch {
                target: target.to_string(),
                current: path,
                requested: segment.to_string(),
            });
        }
        Ok(path)
    }

    /// Pop one level from every cohort member. Callers have checked that
    /// every member is blocked at `phase`.
    fn release(&mut self, phase: PhasePath, cohort: Vec<String>) -> ReleaseBatch {
        let mut members = Vec::with_capacity(cohort.len());
        let mut releases = Vec::with_capacity(cohort.len());

        for id in cohort {
            let Some(state) = self.targets.get_mut(&id) else {
                continue;
            };
            let aborted = std::mem::take(&mut state.aborted);
            let handle = state.blocked.take();
            let frame = state.frames.pop();
            if state.frames.is_empty() {
                self.targets.remove(&id);
            }

            members.push(MemberOutcome {
                target: id.clone(),
                aborted,
            });
            if let (Some(handle), Some(frame)) = (handle, frame) {
                releases.push(Release {
                    target: id,
                    options: frame.options,
                    guarded: frame.guarded,
                    handle,
                });
            }
        }

        ReleaseBatch {
            outcome: CohortOutcome { phase, members },
            releases,
        }
    }
}

/// Read-only view of the barrier state, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub targets: BTreeMap<String, TargetSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSnapshot {
    pub phase: PhasePath,
    pub blocked: bool,
    pub aborted: bool,
    /// Guard outcome per stack level, outermost first
    pub guarded: Vec<bool>,
}
