//! Barrier options and release values.

use muster_common::PhasePath;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub type GuardFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type LeaveValueFn = Arc<dyn Fn(&CohortOutcome) -> LeaveValue + Send + Sync>;
pub type CompleteFn = Arc<dyn Fn() + Send + Sync>;

/// Whether a released cohort carries on or abandons the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveState {
    Continue,
    Abort,
}

/// Value delivered on a target's release handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveValue {
    pub state: LeaveState,
}

impl LeaveValue {
    pub const CONTINUE: LeaveValue = LeaveValue {
        state: LeaveState::Continue,
    };
    pub const ABORT: LeaveValue = LeaveValue {
        state: LeaveState::Abort,
    };

    pub fn is_continue(&self) -> bool {
        self.state == LeaveState::Continue
    }

    pub fn is_abort(&self) -> bool {
        self.state == LeaveState::Abort
    }
}

/// One cohort member's contribution to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberOutcome {
    pub target: String,
    pub aborted: bool,
}

/// Outcome of a whole cohort at the moment its barrier released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortOutcome {
    /// Phase the cohort is leaving
    pub phase: PhasePath,
    pub members: Vec<MemberOutcome>,
}

impl CohortOutcome {
    pub fn any_aborted(&self) -> bool {
        self.members.iter().any(|m| m.aborted)
    }

    pub fn aborted_targets(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.aborted)
            .map(|m| m.target.as_str())
            .collect()
    }
}

/// Callbacks attached to a phase level when a cohort enters it.
///
/// Every field is optional:
/// - `guard`: evaluated once per `enter_phase`; absent means guarded. An
///   unguarded target skips its work but still takes part in the barrier.
/// - `leave_value`: computes each member's release value from the cohort
///   outcome. Absent means `Abort` if any member aborted, else `Continue`.
/// - `on_complete`: invoked for a guarded member released with `Continue`.
#[derive(Clone, Default)]
pub struct PhaseOptions {
    pub guard: Option<GuardFn>,
    pub leave_value: Option<LeaveValueFn>,
    pub on_complete: Option<CompleteFn>,
}

impl PhaseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn with_leave_value<F>(mut self, leave_value: F) -> Self
    where
        F: Fn(&CohortOutcome) -> LeaveValue + Send + Sync + 'static,
    {
        self.leave_value = Some(Arc::new(leave_value));
        self
    }

    pub fn with_on_complete<F>(mut self, on_complete: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(on_complete));
        self
    }

    pub fn evaluate_guard(&self) -> bool {
        self.guard.as_ref().is_none_or(|guard| guard())
    }

    pub fn leave_value(&self, outcome: &CohortOutcome) -> LeaveValue {
        match &self.leave_value {
            Some(f) => f(outcome),
            None if outcome.any_aborted() => LeaveValue::ABORT,
            None => LeaveValue::CONTINUE,
        }
    }

    pub fn complete(&self) {
        if let Some(f) = &self.on_complete {
            f();
        }
    }
}

impl fmt::Debug for PhaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseOptions")
            .field("guard", &self.guard.is_some())
            .field("leave_value", &self.leave_value.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn outcome(aborted: &[bool]) -> CohortOutcome {
        CohortOutcome {
            phase: PhasePath::new(["configure"]),
            members: aborted
                .iter()
                .enumerate()
                .map(|(i, a)| MemberOutcome {
                    target: format!("n{}", i),
                    aborted: *a,
                })
                .collect(),
        }
    }

    #[test]
    fn test_default_leave_value_is_all_or_nothing() {
        let options = PhaseOptions::new();
        assert_eq!(options.leave_value(&outcome(&[false, false])), LeaveValue::CONTINUE);
        assert_eq!(options.leave_value(&outcome(&[false, true])), LeaveValue::ABORT);
    }

    #[test]
    fn test_custom_leave_value() {
        let options = PhaseOptions::new().with_leave_value(|_| LeaveValue::CONTINUE);
        assert_eq!(options.leave_value(&outcome(&[true])), LeaveValue::CONTINUE);
    }

    #[test]
    fn test_guard_defaults_to_true() {
        assert!(PhaseOptions::new().evaluate_guard());
        assert!(!PhaseOptions::new().with_guard(|| false).evaluate_guard());
    }

    #[test]
    fn test_complete_invokes_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let options = PhaseOptions::new().with_on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        options.complete();
        PhaseOptions::new().complete();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_aborted_targets() {
        let cohort = outcome(&[true, false, true]);
        assert_eq!(cohort.aborted_targets(), vec!["n0", "n2"]);
    }

    #[test]
    fn test_leave_value_serialization() {
        let json = serde_json::to_string(&LeaveValue::ABORT).unwrap();
        assert_eq!(json, r#"{"state":"abort"}"#);
    }
}
