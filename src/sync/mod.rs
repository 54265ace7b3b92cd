//! Phase barrier synchronization.
//!
//! A fan-out of per-target tasks enters a phase together, and on exit each
//! task blocks until every sibling in the same phase subtree has arrived. The
//! whole cohort is then released at once with a value computed over the
//! cohort's outcome.
//!
//! ## Example
//!
//! ```no_run
//! use muster::sync::{LeaveOutcome, PhaseOptions, PhaseSyncService};
//! use tokio::sync::oneshot;
//!
//! # fn example() -> Result<(), muster::errors::SyncError> {
//! let sync = PhaseSyncService::new();
//! let cohort = vec!["n1".to_string(), "n2".to_string()];
//! sync.enter_phase("configure", &cohort, PhaseOptions::new())?;
//!
//! let (tx1, _rx1) = oneshot::channel();
//! assert_eq!(sync.leave_phase("configure", "n1", tx1)?, LeaveOutcome::Waiting);
//!
//! let (tx2, _rx2) = oneshot::channel();
//! assert_eq!(
//!     sync.leave_phase("configure", "n2", tx2)?,
//!     LeaveOutcome::Released { count: 2 }
//! );
//! # Ok(())
//! # }
//! ```

mod options;
mod service;
mod state;

pub use options::{
    CohortOutcome, CompleteFn, GuardFn, LeaveState, LeaveValue, LeaveValueFn, MemberOutcome,
    PhaseOptions,
};
pub use service::{EnterOutcome, LeaveOutcome, PhaseSyncService};
pub use state::{SyncSnapshot, TargetSnapshot};
