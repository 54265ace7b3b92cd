//! Typed error hierarchy for muster.
//!
//! One enum per subsystem:
//! - `SyncError` - phase barrier precondition violations
//! - `ReconcileError` - declared topology unusable for reconciliation
//! - `ProviderError` - node provider failures
//! - `LifecycleError` - aggregated per-group create/destroy failures
//! - `PipelineError` - phase execution failures (task and action level)
//! - `ConvergeError` - faults that stop a converge or lift before it runs

use muster_common::PhasePath;
use std::path::PathBuf;
use thiserror::Error;

/// Barrier precondition violations. These are programming or configuration
/// faults and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Targets entering phase {phase} are at different phases: {}", join_paths(.phases))]
    HeterogeneousPhase {
        phase: String,
        phases: Vec<PhasePath>,
    },

    #[error("Target {target} is already blocked leaving phase {phase}")]
    AlreadyBlocked { target: String, phase: PhasePath },

    #[error("Target {target} cannot abort phase {phase} while blocked")]
    AbortWhileBlocked { target: String, phase: PhasePath },

    #[error("Target {target} is listed more than once entering phase {phase}")]
    DuplicateTarget { target: String, phase: String },

    #[error("Target {target} is not in any phase")]
    UnknownTarget { target: String },

    #[error("Target {target} is in phase {current}, not {requested}")]
    PhaseMismatch {
        target: String,
        current: PhasePath,
        requested: String,
    },
}

fn join_paths(paths: &[PhasePath]) -> String {
    paths
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from computing group deltas.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Group {group} has no count; a count is required to converge")]
    MissingCount { group: String },
}

/// Errors from a node provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to list nodes: {0}")]
    ListFailed(String),

    #[error("Failed to create nodes for group {group}: {message}")]
    CreateFailed { group: String, message: String },

    #[error("Failed to destroy nodes [{}]: {message}", .nodes.join(", "))]
    DestroyFailed { nodes: Vec<String>, message: String },

    #[error("Group operation '{operation}' failed for {group}: {message}")]
    GroupOperationFailed {
        operation: String,
        group: String,
        message: String,
    },

    #[error("Failed to access inventory at {path}: {source}")]
    Inventory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Inventory is not valid JSON: {0}")]
    InventoryFormat(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A provider failure captured for one group.
#[derive(Debug, Error)]
#[error("group {group}: {error}")]
pub struct GroupFailure {
    pub group: String,
    #[source]
    pub error: ProviderError,
}

/// Aggregated per-group lifecycle failures.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{} group operation(s) failed: {}", .failures.len(), join_failures(.failures))]
    Aggregate { failures: Vec<GroupFailure> },
}

fn join_failures(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl LifecycleError {
    pub fn failures(&self) -> &[GroupFailure] {
        match self {
            LifecycleError::Aggregate { failures } => failures,
        }
    }
}

/// Errors that stop the phase pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// The phase could not run on the target at all.
    #[error("Phase {phase} failed to run on {target}: {message}")]
    Task {
        target: String,
        phase: String,
        message: String,
    },

    /// The phase ran but one of its actions failed.
    #[error("Action '{action}' of phase {phase} failed on {target}: {message}")]
    Action {
        target: String,
        phase: String,
        action: String,
        message: String,
    },

    /// The phase ran but reported a phase-level error.
    #[error("Phase {phase} failed on {target}: {message}")]
    Phase {
        target: String,
        phase: String,
        message: String,
    },

    #[error("Phase {phase} barrier fault: {source}")]
    Sync {
        phase: String,
        #[source]
        source: SyncError,
    },
}

impl PipelineError {
    pub fn phase(&self) -> &str {
        match self {
            PipelineError::Task { phase, .. }
            | PipelineError::Action { phase, .. }
            | PipelineError::Phase { phase, .. }
            | PipelineError::Sync { phase, .. } => phase,
        }
    }

    pub fn is_task_level(&self) -> bool {
        matches!(self, PipelineError::Task { .. } | PipelineError::Sync { .. })
    }
}

/// Error carried by a failed converge stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Faults that prevent a converge or lift from running.
#[derive(Debug, Error)]
pub enum ConvergeError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation did not complete: {0}")]
    Interrupted(String),
}
