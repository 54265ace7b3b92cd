//! Converge and lift reports.

use chrono::{DateTime, Utc};
use muster_common::{Node, PhaseResult};
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Instant;

use crate::errors::StageError;
use crate::reconcile::GroupDelta;

/// The steps of a converge, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    DestroyServer,
    RemoveGroupNodes,
    DestroyGroup,
    CreateGroup,
    CreateGroupNodes,
    Bootstrap,
    Phases,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DestroyServer => "destroy-server",
            Stage::RemoveGroupNodes => "remove-group-nodes",
            Stage::DestroyGroup => "destroy-group",
            Stage::CreateGroup => "create-group",
            Stage::CreateGroupNodes => "create-group-nodes",
            Stage::Bootstrap => "bootstrap",
            Stage::Phases => "phases",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Converge,
    Lift,
}

/// The stage that stopped a run and why.
#[derive(Debug, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    #[serde(serialize_with = "serialize_display")]
    pub error: StageError,
}

fn serialize_display<S: Serializer>(error: &StageError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeltaSummary {
    pub group: String,
    pub actual: usize,
    pub target: usize,
    pub delta: i64,
}

impl From<&GroupDelta> for DeltaSummary {
    fn from(d: &GroupDelta) -> Self {
        Self {
            group: d.group.name.clone(),
            actual: d.actual,
            target: d.target,
            delta: d.delta,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConvergeReport {
    pub run_id: String,
    pub operation: Operation,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub deltas: Vec<DeltaSummary>,
    pub removed_nodes: Vec<Node>,
    pub created_nodes: Vec<Node>,
    /// Phases requested after bootstrap, in run order
    pub phases: Vec<String>,
    pub phase_results: Vec<PhaseResult>,
    pub failure: Option<StageFailure>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl ConvergeReport {
    pub(crate) fn start(operation: Operation) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            operation,
            started_at: Utc::now(),
            duration_ms: 0,
            deltas: Vec::new(),
            removed_nodes: Vec::new(),
            created_nodes: Vec::new(),
            phases: Vec::new(),
            phase_results: Vec::new(),
            failure: None,
            started: Some(Instant::now()),
        }
    }

    pub(crate) fn fail(mut self, stage: Stage, error: impl Into<StageError>) -> Self {
        self.failure = Some(StageFailure {
            stage,
            error: error.into(),
        });
        self.finish()
    }

    pub(crate) fn finish(mut self) -> Self {
        if let Some(started) = self.started {
            self.duration_ms = started.elapsed().as_millis() as u64;
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failure.as_ref().map(|f| f.stage)
    }

    /// Results for one phase, in target order.
    pub fn results_for<'a>(&'a self, phase: &'a str) -> impl Iterator<Item = &'a PhaseResult> {
        self.phase_results.iter().filter(move |r| r.phase == phase)
    }

    /// (succeeded, failed, skipped) across every recorded result.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.phase_results
            .iter()
            .fold((0, 0, 0), |(ok, failed, skipped), r| {
                if r.has_error() {
                    (ok, failed + 1, skipped)
                } else if r.skipped {
                    (ok, failed, skipped + 1)
                } else {
                    (ok + 1, failed, skipped)
                }
            })
    }
}

impl fmt::Display for ConvergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.operation {
            Operation::Converge => "Converge",
            Operation::Lift => "Lift",
        };
        match &self.failure {
            None => writeln!(f, "{} {} succeeded in {}ms", verb, self.run_id, self.duration_ms)?,
            Some(failure) => writeln!(
                f,
                "{} {} failed at {}: {}",
                verb, self.run_id, failure.stage, failure.error
            )?,
        }

        for d in self.deltas.iter().filter(|d| d.delta != 0) {
            writeln!(f, "  {}: {} -> {} ({:+})", d.group, d.actual, d.target, d.delta)?;
        }
        for node in &self.removed_nodes {
            writeln!(f, "  removed {} ({})", node.hostname, node.group)?;
        }
        for node in &self.created_nodes {
            writeln!(f, "  created {} ({})", node.hostname, node.group)?;
        }

        if !self.phase_results.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<16} {:<12} {:<16} STATUS", "TARGET", "GROUP", "PHASE")?;
            for r in &self.phase_results {
                let status = if let Some(action) = r.action_error() {
                    format!(
                        "failed: {} ({})",
                        action.action,
                        action.error.as_deref().unwrap_or("")
                    )
                } else if let Some(error) = &r.error {
                    format!("failed: {}", error)
                } else if r.skipped {
                    "skipped".to_string()
                } else {
                    "ok".to_string()
                };
                writeln!(f, "{:<16} {:<12} {:<16} {}", r.target, r.group, r.phase, status)?;
            }
            let (ok, failed, skipped) = self.counts();
            writeln!(f, "{} ok, {} failed, {} skipped", ok, failed, skipped)?;
        }
        Ok(())
    }
}
