//! Phase execution pipeline.
//!
//! Runs a phase across a target set with one `tokio` task per target and
//! awaits every task before returning. Synchronized phases route their tasks
//! through the run's `PhaseSyncService`: the cohort enters once, and each
//! task aborts on failure, leaves, and waits for the barrier to open.
//!
//! Targets tagged with a registered middleware run as a separate path wrapped
//! by that middleware. All paths of a phase run concurrently, so a barrier
//! whose cohort spans several paths still opens.

mod events;
mod middleware;

pub use events::PipelineEvent;
pub use middleware::PhaseMiddleware;

use futures::future::join_all;
use muster_common::{PhaseResult, Target};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::{PipelineError, SyncError};
use crate::executor::PhaseExecutor;
use crate::sync::{LeaveValue, PhaseOptions, PhaseSyncService};

/// Results of one or more phases, in target order, plus the error that
/// stopped the run.
#[derive(Debug, Default)]
pub struct PhaseRun {
    pub results: Vec<PhaseResult>,
    pub error: Option<PipelineError>,
}

impl PhaseRun {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    fn failed(error: PipelineError) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error),
        }
    }
}

/// The action-level or phase-level error embedded in a result, if any.
pub fn result_error(result: &PhaseResult) -> Option<PipelineError> {
    if let Some(action) = result.action_error() {
        return Some(PipelineError::Action {
            target: result.target.clone(),
            phase: result.phase.clone(),
            action: action.action.clone(),
            message: action.error.clone().unwrap_or_default(),
        });
    }
    result.error.as_ref().map(|message| PipelineError::Phase {
        target: result.target.clone(),
        phase: result.phase.clone(),
        message: message.clone(),
    })
}

struct Dispatch {
    index: usize,
    target: Target,
    synchronized: bool,
}

/// Owned state handed to every spawned task of one phase.
#[derive(Clone)]
struct TaskContext {
    executor: Arc<dyn PhaseExecutor>,
    sync: Arc<PhaseSyncService>,
    events: Option<mpsc::Sender<PipelineEvent>>,
    phase: String,
    guarded: bool,
}

struct TaskOutcome {
    index: usize,
    result: PhaseResult,
    error: Option<PipelineError>,
}

pub struct PhaseExecutionPipeline {
    executor: Arc<dyn PhaseExecutor>,
    sync: Arc<PhaseSyncService>,
    middleware: HashMap<String, Arc<dyn PhaseMiddleware>>,
    phase_options: HashMap<String, PhaseOptions>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl PhaseExecutionPipeline {
    pub fn new(executor: Arc<dyn PhaseExecutor>, sync: Arc<PhaseSyncService>) -> Self {
        Self {
            executor,
            sync,
            middleware: HashMap::new(),
            phase_options: HashMap::new(),
            event_tx: None,
        }
    }

    /// Register the middleware for targets whose phase carries `tag`.
    pub fn with_middleware(mut self, tag: &str, middleware: Arc<dyn PhaseMiddleware>) -> Self {
        self.middleware.insert(tag.to_string(), middleware);
        self
    }

    /// Barrier options used whenever `phase` runs synchronized.
    pub fn with_phase_options(mut self, phase: &str, options: PhaseOptions) -> Self {
        self.phase_options.insert(phase.to_string(), options);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn sync(&self) -> &Arc<PhaseSyncService> {
        &self.sync
    }

    /// Run `phase` on every target that defines it.
    ///
    /// `error` is the first task-level failure in target order. Action
    /// failures stay inside the results; `run_phases` turns them into a stop.
    pub async fn execute_phase(&self, phase: &str, targets: &[Target]) -> PhaseRun {
        let dispatches: Vec<Dispatch> = targets
            .iter()
            .enumerate()
            .filter_map(|(index, target)| {
                let def = target.phase(phase)?;
                Some(Dispatch {
                    index,
                    target: target.clone(),
                    synchronized: def.synchronized,
                })
            })
            .collect();

        if dispatches.is_empty() {
            debug!(phase, "No target defines phase");
            return PhaseRun::default();
        }

        let cohort: Vec<String> = dispatches
            .iter()
            .filter(|d| d.synchronized)
            .map(|d| d.target.id().to_string())
            .collect();

        let guarded = if cohort.is_empty() {
            true
        } else {
            let options = self.phase_options.get(phase).cloned().unwrap_or_default();
            match self.sync.enter_phase(phase, &cohort, options) {
                Ok(entered) => entered.guarded,
                Err(source) => {
                    return PhaseRun::failed(PipelineError::Sync {
                        phase: phase.to_string(),
                        source,
                    });
                }
            }
        };

        info!(
            phase,
            targets = dispatches.len(),
            synchronized = cohort.len(),
            "Phase started"
        );
        self.emit(PipelineEvent::PhaseStarted {
            phase: phase.to_string(),
            targets: dispatches.len(),
            synchronized: cohort.len(),
        })
        .await;

        let ctx = TaskContext {
            executor: self.executor.clone(),
            sync: self.sync.clone(),
            events: self.event_tx.clone(),
            phase: phase.to_string(),
            guarded,
        };

        let paths = self.split_paths(phase, dispatches);
        let mut outcomes: Vec<TaskOutcome> = join_all(
            paths
                .into_iter()
                .map(|(tag, group)| self.run_path(&ctx, tag, group)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();
        outcomes.sort_by_key(|o| o.index);

        let mut run = PhaseRun::default();
        for outcome in outcomes {
            if run.error.is_none() {
                run.error = outcome.error;
            }
            run.results.push(outcome.result);
        }

        let failed = run.results.iter().filter(|r| r.has_error()).count();
        info!(
            phase,
            succeeded = run.results.len() - failed,
            failed,
            "Phase completed"
        );
        self.emit(PipelineEvent::PhaseCompleted {
            phase: phase.to_string(),
            succeeded: run.results.len() - failed,
            failed,
        })
        .await;

        run
    }

    /// Run `phases` in order, stopping after the first phase that produced a
    /// task-level, action-level or phase-level error.
    pub async fn run_phases(&self, phases: &[String], targets: &[Target]) -> PhaseRun {
        let mut run = PhaseRun::default();
        for phase in phases {
            let PhaseRun { results, error } = self.execute_phase(phase, targets).await;
            let gate = error.or_else(|| results.iter().find_map(result_error));
            run.results.extend(results);

            if let Some(error) = gate {
                warn!(phase = %phase, %error, "Phase failed, skipping remaining phases");
                run.error = Some(error);
                break;
            }
        }
        run
    }

    /// Group dispatches by registered middleware tag; `None` is the default
    /// path.
    fn split_paths(
        &self,
        phase: &str,
        dispatches: Vec<Dispatch>,
    ) -> BTreeMap<Option<String>, Vec<Dispatch>> {
        let mut paths: BTreeMap<Option<String>, Vec<Dispatch>> = BTreeMap::new();
        for dispatch in dispatches {
            let tag = dispatch
                .target
                .phase(phase)
                .and_then(|def| def.middleware.clone());
            let key = match tag {
                Some(tag) if self.middleware.contains_key(&tag) => Some(tag),
                Some(tag) => {
                    warn!(
                        phase,
                        middleware = %tag,
                        node = %dispatch.target.id(),
                        "No middleware registered for tag, using default path"
                    );
                    None
                }
                None => None,
            };
            paths.entry(key).or_default().push(dispatch);
        }
        paths
    }

    async fn run_path(
        &self,
        ctx: &TaskContext,
        tag: Option<String>,
        dispatches: Vec<Dispatch>,
    ) -> Vec<TaskOutcome> {
        let middleware = tag
            .as_ref()
            .and_then(|t| self.middleware.get(t))
            .map(|m| (tag.clone().unwrap_or_default(), m.clone()));

        let mut rejection = None;
        if let Some((tag, middleware)) = &middleware {
            let targets: Vec<Target> = dispatches.iter().map(|d| d.target.clone()).collect();
            if let Err(e) = middleware.before(&ctx.phase, &targets).await {
                warn!(phase = %ctx.phase, middleware = %tag, error = %e, "Middleware rejected phase");
                rejection = Some(format!("middleware '{}' failed before phase: {:#}", tag, e));
            }
        }

        let handles: Vec<_> = dispatches
            .into_iter()
            .map(|dispatch| {
                let fallback = (
                    dispatch.index,
                    dispatch.target.id().to_string(),
                    dispatch.target.group_name.clone(),
                );
                let handle = tokio::spawn(run_target(ctx.clone(), dispatch, rejection.clone()));
                (fallback, handle)
            })
            .collect();

        let mut indices = Vec::with_capacity(handles.len());
        let mut results = Vec::with_capacity(handles.len());
        let mut errors = Vec::with_capacity(handles.len());
        for ((index, target, group), handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let message = format!("task failed: {}", e);
                    TaskOutcome {
                        index,
                        result: PhaseResult::new(&target, &group, &ctx.phase).with_error(&message),
                        error: Some(PipelineError::Task {
                            target,
                            phase: ctx.phase.clone(),
                            message,
                        }),
                    }
                }
            };
            indices.push(outcome.index);
            results.push(outcome.result);
            errors.push(outcome.error);
        }

        if let Some((tag, middleware)) = &middleware
            && let Err(e) = middleware.after(&ctx.phase, &mut results).await
        {
            warn!(phase = %ctx.phase, middleware = %tag, error = %e, "Middleware failed after phase");
            let message = format!("middleware '{}' failed after phase: {:#}", tag, e);
            for (result, error) in results.iter_mut().zip(errors.iter_mut()) {
                result.error.get_or_insert_with(|| message.clone());
                error.get_or_insert_with(|| PipelineError::Task {
                    target: result.target.clone(),
                    phase: ctx.phase.clone(),
                    message: message.clone(),
                });
            }
        }

        indices
            .into_iter()
            .zip(results)
            .zip(errors)
            .map(|((index, result), error)| TaskOutcome {
                index,
                result,
                error,
            })
            .collect()
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.event_tx {
            tx.send(event).await.ok();
        }
    }
}

fn task_failure(target: &Target, phase: &str, message: String) -> (PhaseResult, Option<PipelineError>) {
    let result = PhaseResult::new(target.id(), &target.group_name, phase).with_error(&message);
    let error = PipelineError::Task {
        target: target.id().to_string(),
        phase: phase.to_string(),
        message,
    };
    (result, Some(error))
}

/// One target's share of a phase. Never returns before the target has left
/// the barrier of a synchronized phase.
async fn run_target(ctx: TaskContext, dispatch: Dispatch, rejection: Option<String>) -> TaskOutcome {
    let Dispatch {
        index,
        target,
        synchronized,
    } = dispatch;
    let phase = ctx.phase.as_str();

    let (mut result, mut error) = if let Some(message) = rejection {
        task_failure(&target, phase, message)
    } else if synchronized && !ctx.guarded {
        (
            PhaseResult::skipped(target.id(), &target.group_name, phase),
            None,
        )
    } else {
        // The executor runs in its own task so a panic still reaches the
        // barrier below.
        let executor = ctx.executor.clone();
        let task_target = target.clone();
        let task_phase = ctx.phase.clone();
        let execution =
            tokio::spawn(async move { executor.execute(&task_target, &task_phase).await });
        match execution.await {
            Ok(Ok(result)) => (result, None),
            Ok(Err(e)) => task_failure(&target, phase, format!("{:#}", e)),
            Err(e) => task_failure(&target, phase, format!("executor task failed: {}", e)),
        }
    };

    if synchronized {
        match leave_barrier(&ctx.sync, phase, target.id(), result.has_error()).await {
            Ok(value) if value.is_abort() && !result.has_error() => {
                result.error = Some(format!("phase {} aborted by cohort", phase));
            }
            Ok(_) => {}
            Err(source) => {
                result.error.get_or_insert_with(|| source.to_string());
                error.get_or_insert(PipelineError::Sync {
                    phase: phase.to_string(),
                    source,
                });
            }
        }
    }

    debug!(
        node = %target.id(),
        phase,
        success = !result.has_error(),
        skipped = result.skipped,
        "Target finished phase"
    );
    if let Some(ref tx) = ctx.events {
        tx.send(PipelineEvent::TargetCompleted {
            phase: phase.to_string(),
            target: target.id().to_string(),
            success: !result.has_error(),
            skipped: result.skipped,
        })
        .await
        .ok();
    }

    TaskOutcome {
        index,
        result,
        error,
    }
}

async fn leave_barrier(
    sync: &PhaseSyncService,
    phase: &str,
    target: &str,
    failed: bool,
) -> Result<LeaveValue, SyncError> {
    if failed {
        sync.abort_phase(phase, target)?;
    }
    let (tx, rx) = oneshot::channel();
    sync.leave_phase(phase, target, tx)?;
    // A dropped handle means the barrier can never open normally.
    Ok(rx.await.unwrap_or(LeaveValue::ABORT))
}
