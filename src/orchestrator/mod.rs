//! Converge orchestration.
//!
//! A converge walks a fixed sequence of stages:
//!
//! 1. list nodes, bind them to groups, compute the plan
//! 2. `destroy-server` phase on targets about to be removed
//! 3. remove surplus nodes
//! 4. destroy groups that end up empty
//! 5. create groups that start from empty
//! 6. create missing nodes
//! 7. `bootstrap` phase on the new targets
//! 8. the requested phases on new and surviving targets
//!
//! Every stage runs only if the previous one finished without error. A stage
//! failure ends the run with a report naming the stage; faults that stop the
//! run from starting at all are returned as `ConvergeError`.

mod handle;
pub mod report;

pub use handle::OperationHandle;
pub use report::{ConvergeReport, DeltaSummary, Operation, Stage, StageFailure};

use muster_common::{AdminUser, GroupSpec, Target};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::errors::{ConvergeError, PipelineError, StageError};
use crate::executor::PhaseExecutor;
use crate::lifecycle::NodeLifecycleDriver;
use crate::pipeline::{PhaseExecutionPipeline, PhaseMiddleware, PhaseRun, PipelineEvent, result_error};
use crate::provider::{CreateOptions, NodeProvider};
use crate::reconcile::{ConvergePlan, targets_for};
use crate::sync::{PhaseOptions, PhaseSyncService};

/// Phase run on targets before their nodes are destroyed.
pub const DESTROY_SERVER_PHASE: &str = "destroy-server";
/// Phase run once on freshly created targets.
pub const BOOTSTRAP_PHASE: &str = "bootstrap";

#[derive(Debug, Clone, Default)]
pub struct ConvergeRequest {
    pub groups: Vec<GroupSpec>,
    /// Phases to run after bootstrap; empty means every target's defaults
    pub phases: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LiftRequest {
    pub groups: Vec<GroupSpec>,
    pub phases: Vec<String>,
}

pub struct ConvergeOrchestrator {
    provider: Arc<dyn NodeProvider>,
    executor: Arc<dyn PhaseExecutor>,
    admin_user: AdminUser,
    create_options: CreateOptions,
    middleware: HashMap<String, Arc<dyn PhaseMiddleware>>,
    phase_options: HashMap<String, PhaseOptions>,
    event_tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl ConvergeOrchestrator {
    pub fn new(
        provider: Arc<dyn NodeProvider>,
        executor: Arc<dyn PhaseExecutor>,
        admin_user: AdminUser,
    ) -> Self {
        Self {
            provider,
            executor,
            admin_user,
            create_options: CreateOptions::default(),
            middleware: HashMap::new(),
            phase_options: HashMap::new(),
            event_tx: None,
        }
    }

    pub fn with_create_options(mut self, options: CreateOptions) -> Self {
        self.create_options = options;
        self
    }

    pub fn with_middleware(mut self, tag: &str, middleware: Arc<dyn PhaseMiddleware>) -> Self {
        self.middleware.insert(tag.to_string(), middleware);
        self
    }

    pub fn with_phase_options(mut self, phase: &str, options: PhaseOptions) -> Self {
        self.phase_options.insert(phase.to_string(), options);
        self
    }

    pub fn with_event_channel(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Compute the plan for `groups` without changing anything.
    pub async fn plan(&self, groups: &[GroupSpec]) -> Result<ConvergePlan, ConvergeError> {
        let nodes = self.provider.list_nodes().await?;
        let targets = targets_for(nodes, groups);
        Ok(ConvergePlan::compute(&targets, groups)?)
    }

    pub async fn converge(&self, request: ConvergeRequest) -> Result<ConvergeReport, ConvergeError> {
        ensure_unique_groups(&request.groups)?;

        let nodes = self.provider.list_nodes().await?;
        let existing = targets_for(nodes, &request.groups);
        let plan = ConvergePlan::compute(&existing, &request.groups)?;

        let mut report = ConvergeReport::start(Operation::Converge);
        report.deltas = plan.deltas.iter().map(DeltaSummary::from).collect();
        info!(
            run_id = %report.run_id,
            groups = request.groups.len(),
            targets = existing.len(),
            "Converge started"
        );

        let pipeline = self.pipeline();
        let driver = self.driver();

        let doomed: Vec<Target> = plan
            .removals
            .iter()
            .flat_map(|r| r.targets.iter().cloned())
            .collect();
        if !doomed.is_empty() {
            info!(stage = %Stage::DestroyServer, targets = doomed.len(), "Stage started");
            let run = pipeline.execute_phase(DESTROY_SERVER_PHASE, &doomed).await;
            if let Some(error) = absorb(&mut report, run) {
                return Ok(stop(report, Stage::DestroyServer, error));
            }

            info!(stage = %Stage::RemoveGroupNodes, "Stage started");
            let (removed, error) = driver.remove_group_nodes(&plan.removals).await.into_parts();
            report
                .removed_nodes
                .extend(removed.into_iter().flat_map(|r| r.nodes));
            if let Some(error) = error {
                return Ok(stop(report, Stage::RemoveGroupNodes, error));
            }
        }

        if !plan.groups_to_remove.is_empty() {
            info!(stage = %Stage::DestroyGroup, groups = plan.groups_to_remove.len(), "Stage started");
            if let Some(error) = driver.destroy_groups(&plan.groups_to_remove).await.into_error() {
                return Ok(stop(report, Stage::DestroyGroup, error));
            }
        }

        if !plan.groups_to_create.is_empty() {
            info!(stage = %Stage::CreateGroup, groups = plan.groups_to_create.len(), "Stage started");
            if let Some(error) = driver.create_groups(&plan.groups_to_create).await.into_error() {
                return Ok(stop(report, Stage::CreateGroup, error));
            }
        }

        let mut created = Vec::new();
        if !plan.additions.is_empty() {
            info!(stage = %Stage::CreateGroupNodes, groups = plan.additions.len(), "Stage started");
            let (targets, error) = driver.create_group_nodes(&plan.additions).await.into_parts();
            report
                .created_nodes
                .extend(targets.iter().map(|t| t.node.clone()));
            if let Some(error) = error {
                return Ok(stop(report, Stage::CreateGroupNodes, error));
            }
            created = targets;
        }

        if !created.is_empty() {
            info!(stage = %Stage::Bootstrap, targets = created.len(), "Stage started");
            let run = pipeline.execute_phase(BOOTSTRAP_PHASE, &created).await;
            if let Some(error) = absorb(&mut report, run) {
                return Ok(stop(report, Stage::Bootstrap, error));
            }
        }

        let removed: HashSet<&str> = plan.removed_target_ids().into_iter().collect();
        let live: Vec<Target> = existing
            .iter()
            .filter(|t| !removed.contains(t.id()))
            .cloned()
            .chain(created)
            .collect();

        report.phases = resolve_phases(&request.phases, &live);
        if !report.phases.is_empty() {
            info!(stage = %Stage::Phases, phases = ?report.phases, targets = live.len(), "Stage started");
            let run = pipeline.run_phases(&report.phases, &live).await;
            if let Some(error) = absorb(&mut report, run) {
                return Ok(stop(report, Stage::Phases, error));
            }
        }

        let report = report.finish();
        info!(run_id = %report.run_id, duration_ms = report.duration_ms, "Converge finished");
        Ok(report)
    }

    /// Run phases on the existing targets of `request.groups` without
    /// changing any node counts.
    pub async fn lift(&self, request: LiftRequest) -> Result<ConvergeReport, ConvergeError> {
        ensure_unique_groups(&request.groups)?;

        let nodes = self.provider.list_nodes().await?;
        let targets = targets_for(nodes, &request.groups);

        let mut report = ConvergeReport::start(Operation::Lift);
        report.phases = resolve_phases(&request.phases, &targets);
        info!(
            run_id = %report.run_id,
            phases = ?report.phases,
            targets = targets.len(),
            "Lift started"
        );

        let run = self.pipeline().run_phases(&report.phases, &targets).await;
        if let Some(error) = absorb(&mut report, run) {
            return Ok(stop(report, Stage::Phases, error));
        }
        Ok(report.finish())
    }

    pub fn spawn_converge(self: &Arc<Self>, request: ConvergeRequest) -> OperationHandle {
        let this = Arc::clone(self);
        OperationHandle::new(tokio::spawn(async move { this.converge(request).await }))
    }

    pub fn spawn_lift(self: &Arc<Self>, request: LiftRequest) -> OperationHandle {
        let this = Arc::clone(self);
        OperationHandle::new(tokio::spawn(async move { this.lift(request).await }))
    }

    /// A pipeline over a fresh barrier; barrier state never outlives a run.
    fn pipeline(&self) -> PhaseExecutionPipeline {
        let mut pipeline =
            PhaseExecutionPipeline::new(self.executor.clone(), Arc::new(PhaseSyncService::new()));
        for (tag, middleware) in &self.middleware {
            pipeline = pipeline.with_middleware(tag, middleware.clone());
        }
        for (phase, options) in &self.phase_options {
            pipeline = pipeline.with_phase_options(phase, options.clone());
        }
        if let Some(tx) = &self.event_tx {
            pipeline = pipeline.with_event_channel(tx.clone());
        }
        pipeline
    }

    fn driver(&self) -> NodeLifecycleDriver {
        NodeLifecycleDriver::new(self.provider.clone(), self.admin_user.clone())
            .with_create_options(self.create_options.clone())
    }
}

fn ensure_unique_groups(groups: &[GroupSpec]) -> Result<(), ConvergeError> {
    let mut seen = HashSet::new();
    for group in groups {
        if !seen.insert(group.name.as_str()) {
            return Err(ConvergeError::Config(format!(
                "group {} is declared more than once",
                group.name
            )));
        }
    }
    Ok(())
}

/// The requested phases, or the union of the targets' default phases in
/// first-seen order.
fn resolve_phases(requested: &[String], targets: &[Target]) -> Vec<String> {
    if !requested.is_empty() {
        return requested.to_vec();
    }
    let mut seen = HashSet::new();
    targets
        .iter()
        .flat_map(|t| t.default_phases.iter())
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

/// Record a run's results and return the error that should stop the run.
fn absorb(report: &mut ConvergeReport, run: PhaseRun) -> Option<PipelineError> {
    let PhaseRun { results, error } = run;
    let error = error.or_else(|| results.iter().find_map(result_error));
    report.phase_results.extend(results);
    error
}

fn stop(report: ConvergeReport, stage: Stage, error: impl Into<StageError>) -> ConvergeReport {
    let report = report.fail(stage, error);
    if let Some(failure) = &report.failure {
        warn!(run_id = %report.run_id, stage = %failure.stage, error = %failure.error, "Run stopped");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProviderError;
    use crate::provider::InventoryProvider;
    use async_trait::async_trait;
    use muster_common::{ActionResult, Node, PhaseDef, PhaseResult};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, String)>>,
        failing_phase: Option<String>,
    }

    impl RecordingExecutor {
        fn failing(phase: &str) -> Self {
            Self {
                failing_phase: Some(phase.to_string()),
                ..Default::default()
            }
        }

        fn calls_for(&self, phase: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, p)| p == phase)
                .map(|(t, _)| t.clone())
                .collect()
        }

        fn phase_order(&self) -> Vec<String> {
            let mut order: Vec<String> = Vec::new();
            for (_, phase) in self.calls.lock().unwrap().iter() {
                if order.last() != Some(phase) {
                    order.push(phase.clone());
                }
            }
            order
        }
    }

    #[async_trait]
    impl PhaseExecutor for RecordingExecutor {
        async fn execute(&self, target: &Target, phase: &str) -> anyhow::Result<PhaseResult> {
            self.calls
                .lock()
                .unwrap()
                .push((target.node.hostname.clone(), phase.to_string()));
            let result = PhaseResult::new(target.id(), &target.group_name, phase);
            if self.failing_phase.as_deref() == Some(phase) {
                return Ok(result.with_actions(vec![ActionResult::failure(
                    "step",
                    Some(1),
                    "exit 1",
                )]));
            }
            Ok(result)
        }
    }

    fn web(count: usize) -> GroupSpec {
        GroupSpec::new("web")
            .with_count(count)
            .with_phase(PhaseDef::new("bootstrap"))
            .with_phase(PhaseDef::new("configure").synchronized())
            .with_phase(PhaseDef::new("destroy-server"))
            .with_default_phases(vec!["configure".into()])
    }

    fn db(count: usize) -> GroupSpec {
        GroupSpec::new("db")
            .with_count(count)
            .with_phase(PhaseDef::new("configure"))
            .with_phase(PhaseDef::new("migrate"))
            .with_default_phases(vec!["migrate".into(), "configure".into()])
    }

    fn orchestrator(
        provider: Arc<dyn NodeProvider>,
        executor: Arc<RecordingExecutor>,
    ) -> ConvergeOrchestrator {
        ConvergeOrchestrator::new(provider, executor, AdminUser::new("admin"))
    }

    #[tokio::test]
    async fn test_converge_from_empty_creates_and_bootstraps() {
        let provider = Arc::new(InventoryProvider::in_memory());
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(2), db(1)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert!(report.is_success(), "{}", report);
        assert_eq!(report.created_nodes.len(), 3);
        assert_eq!(provider.list_nodes().await.unwrap().len(), 3);

        // db defines no bootstrap phase
        let mut bootstrapped = executor.calls_for("bootstrap");
        bootstrapped.sort();
        assert_eq!(bootstrapped, vec!["web-1", "web-2"]);

        // defaults in first-seen order: web's configure, then db's migrate
        assert_eq!(report.phases, vec!["configure", "migrate"]);
        assert_eq!(executor.phase_order(), vec!["bootstrap", "configure", "migrate"]);
        assert_eq!(executor.calls_for("configure").len(), 3);
    }

    #[tokio::test]
    async fn test_converge_scales_down_and_destroys_servers_first() {
        let provider = Arc::new(InventoryProvider::with_nodes(vec![
            Node::new("w1", "web-1", "web"),
            Node::new("w2", "web-2", "web"),
            Node::new("w3", "web-3", "web"),
            Node::new("d1", "db-1", "db"),
        ]));
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(1), db(0)],
                phases: vec!["configure".into()],
            })
            .await
            .unwrap();

        assert!(report.is_success(), "{}", report);
        let mut destroyed = executor.calls_for("destroy-server");
        destroyed.sort();
        assert_eq!(destroyed, vec!["web-1", "web-2"]);
        let removed: Vec<&str> = report.removed_nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(removed.len(), 3);

        let remaining = provider.list_nodes().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "w3");

        // no new targets, so nothing is bootstrapped; configure runs on the survivor
        assert!(executor.calls_for("bootstrap").is_empty());
        assert_eq!(executor.calls_for("configure"), vec!["web-3"]);
    }

    #[tokio::test]
    async fn test_converge_stops_at_bootstrap_failure() {
        let provider = Arc::new(InventoryProvider::in_memory());
        let executor = Arc::new(RecordingExecutor::failing("bootstrap"));
        let report = orchestrator(provider, executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(2)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), Some(Stage::Bootstrap));
        assert!(matches!(
            report.failure.as_ref().map(|f| &f.error),
            Some(StageError::Pipeline(PipelineError::Action { .. }))
        ));
        assert_eq!(report.created_nodes.len(), 2);
        assert!(executor.calls_for("configure").is_empty());
    }

    #[tokio::test]
    async fn test_missing_count_is_a_converge_error() {
        let provider = Arc::new(InventoryProvider::in_memory());
        let executor = Arc::new(RecordingExecutor::default());
        let err = orchestrator(provider, executor)
            .converge(ConvergeRequest {
                groups: vec![GroupSpec::new("web")],
                phases: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Reconcile(_)));
    }

    #[tokio::test]
    async fn test_duplicate_groups_are_rejected() {
        let provider = Arc::new(InventoryProvider::in_memory());
        let executor = Arc::new(RecordingExecutor::default());
        let err = orchestrator(provider, executor)
            .converge(ConvergeRequest {
                groups: vec![web(1), web(2)],
                phases: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Config(_)));
    }

    struct BrokenProvider;

    #[async_trait]
    impl NodeProvider for BrokenProvider {
        async fn list_nodes(&self) -> Result<Vec<Node>, ProviderError> {
            Err(ProviderError::ListFailed("api unreachable".into()))
        }

        async fn create_nodes(
            &self,
            _group: &GroupSpec,
            _admin_user: &AdminUser,
            _count: usize,
            _options: &CreateOptions,
        ) -> Result<Vec<Node>, ProviderError> {
            unreachable!()
        }

        async fn destroy_nodes(&self, _nodes: &[Node]) -> Result<(), ProviderError> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_listing_failure_is_a_converge_error() {
        let executor = Arc::new(RecordingExecutor::default());
        let err = orchestrator(Arc::new(BrokenProvider), executor)
            .converge(ConvergeRequest {
                groups: vec![web(1)],
                phases: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Provider(ProviderError::ListFailed(_))));
    }

    #[tokio::test]
    async fn test_lift_runs_phases_without_changing_counts() {
        let provider = Arc::new(InventoryProvider::with_nodes(vec![
            Node::new("w1", "web-1", "web"),
            Node::new("d1", "db-1", "db"),
        ]));
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .lift(LiftRequest {
                // no count needed for a lift
                groups: vec![GroupSpec::new("web").with_phase(PhaseDef::new("configure"))],
                phases: vec!["configure".into()],
            })
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.operation, Operation::Lift);
        assert_eq!(executor.calls_for("configure"), vec!["web-1"]);
        assert_eq!(provider.list_nodes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_spawned_converge_reports_through_handle() {
        let provider = Arc::new(InventoryProvider::in_memory());
        let executor = Arc::new(RecordingExecutor::default());
        let orchestrator = Arc::new(orchestrator(provider, executor));

        let handle = orchestrator.spawn_converge(ConvergeRequest {
            groups: vec![web(1)],
            phases: vec![],
        });
        let report = handle.wait().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.created_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let provider = Arc::new(InventoryProvider::with_nodes(vec![Node::new(
            "w1", "web-1", "web",
        )]));
        let executor = Arc::new(RecordingExecutor::default());
        let plan = orchestrator(provider.clone(), executor.clone())
            .plan(&[web(3)])
            .await
            .unwrap();

        assert_eq!(plan.additions[0].count, 2);
        assert_eq!(provider.list_nodes().await.unwrap().len(), 1);
        assert!(executor.phase_order().is_empty());
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fault {
        DestroyNodes,
        DestroyGroup,
        CreateGroup,
        CreateNodes,
    }

    /// Inventory that fails one kind of call for one group and records the
    /// group-level hooks it sees.
    struct FaultyProvider {
        inner: InventoryProvider,
        fault: Fault,
        group: String,
        hooks: Mutex<Vec<String>>,
    }

    impl FaultyProvider {
        fn new(nodes: Vec<Node>, fault: Fault, group: &str) -> Self {
            Self {
                inner: InventoryProvider::with_nodes(nodes),
                fault,
                group: group.to_string(),
                hooks: Mutex::new(Vec::new()),
            }
        }

        fn fails(&self, fault: Fault, group: &str) -> bool {
            self.fault == fault && self.group == group
        }

        fn hooks(&self) -> Vec<String> {
            self.hooks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeProvider for FaultyProvider {
        async fn list_nodes(&self) -> Result<Vec<Node>, ProviderError> {
            self.inner.list_nodes().await
        }

        async fn create_nodes(
            &self,
            group: &GroupSpec,
            admin_user: &AdminUser,
            count: usize,
            options: &CreateOptions,
        ) -> Result<Vec<Node>, ProviderError> {
            if self.fails(Fault::CreateNodes, &group.name) {
                return Err(ProviderError::CreateFailed {
                    group: group.name.clone(),
                    message: "no capacity".into(),
                });
            }
            self.inner
                .create_nodes(group, admin_user, count, options)
                .await
        }

        async fn destroy_nodes(&self, nodes: &[Node]) -> Result<(), ProviderError> {
            if nodes.iter().any(|n| self.fails(Fault::DestroyNodes, &n.group)) {
                return Err(ProviderError::DestroyFailed {
                    nodes: nodes.iter().map(|n| n.id.clone()).collect(),
                    message: "api error".into(),
                });
            }
            self.inner.destroy_nodes(nodes).await
        }

        async fn create_group(&self, group: &GroupSpec) -> Result<(), ProviderError> {
            self.hooks
                .lock()
                .unwrap()
                .push(format!("create-group:{}", group.name));
            if self.fails(Fault::CreateGroup, &group.name) {
                return Err(ProviderError::ListFailed("quota exceeded".into()));
            }
            Ok(())
        }

        async fn destroy_group(&self, group: &GroupSpec) -> Result<(), ProviderError> {
            self.hooks
                .lock()
                .unwrap()
                .push(format!("destroy-group:{}", group.name));
            if self.fails(Fault::DestroyGroup, &group.name) {
                return Err(ProviderError::ListFailed("still in use".into()));
            }
            Ok(())
        }
    }

    fn web_nodes(count: usize) -> Vec<Node> {
        (1..=count)
            .map(|i| Node::new(&format!("w{}", i), &format!("web-{}", i), "web"))
            .collect()
    }

    fn failed_groups(report: &ConvergeReport) -> Vec<String> {
        match report.failure.as_ref().map(|f| &f.error) {
            Some(StageError::Lifecycle(error)) => {
                error.failures().iter().map(|f| f.group.clone()).collect()
            }
            other => panic!("Expected a lifecycle failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_server_failure_keeps_every_node() {
        let provider = Arc::new(InventoryProvider::with_nodes(web_nodes(3)));
        let executor = Arc::new(RecordingExecutor::failing("destroy-server"));
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(1)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), Some(Stage::DestroyServer));
        assert!(matches!(
            report.failure.as_ref().map(|f| &f.error),
            Some(StageError::Pipeline(PipelineError::Action { .. }))
        ));
        assert!(report.removed_nodes.is_empty());
        assert_eq!(provider.list_nodes().await.unwrap().len(), 3);
        assert_eq!(executor.phase_order(), vec!["destroy-server"]);
    }

    #[tokio::test]
    async fn test_remove_failure_stops_before_group_changes() {
        let provider = Arc::new(FaultyProvider::new(
            web_nodes(3),
            Fault::DestroyNodes,
            "web",
        ));
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(1), db(1)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), Some(Stage::RemoveGroupNodes));
        assert_eq!(failed_groups(&report), vec!["web"]);
        assert_eq!(provider.list_nodes().await.unwrap().len(), 3);
        assert!(provider.hooks().is_empty());
        assert!(report.created_nodes.is_empty());
        assert_eq!(executor.phase_order(), vec!["destroy-server"]);
    }

    #[tokio::test]
    async fn test_destroy_group_failure_stops_before_creation() {
        let provider = Arc::new(FaultyProvider::new(
            vec![Node::new("d1", "db-1", "db")],
            Fault::DestroyGroup,
            "db",
        ));
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![db(0), web(1)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), Some(Stage::DestroyGroup));
        assert_eq!(failed_groups(&report), vec!["db"]);
        // the nodes went before the group teardown failed
        assert_eq!(report.removed_nodes.len(), 1);
        assert_eq!(provider.hooks(), vec!["destroy-group:db"]);
        assert!(report.created_nodes.is_empty());
        assert!(provider.list_nodes().await.unwrap().is_empty());
        assert!(executor.calls_for("bootstrap").is_empty());
    }

    #[tokio::test]
    async fn test_create_group_failure_stops_before_node_creation() {
        let provider = Arc::new(FaultyProvider::new(vec![], Fault::CreateGroup, "web"));
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(2)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), Some(Stage::CreateGroup));
        assert_eq!(failed_groups(&report), vec!["web"]);
        assert_eq!(provider.hooks(), vec!["create-group:web"]);
        assert!(report.created_nodes.is_empty());
        assert!(provider.list_nodes().await.unwrap().is_empty());
        assert!(executor.phase_order().is_empty());
    }

    #[tokio::test]
    async fn test_create_nodes_failure_keeps_other_groups_but_skips_bootstrap() {
        let provider = Arc::new(FaultyProvider::new(vec![], Fault::CreateNodes, "db"));
        let executor = Arc::new(RecordingExecutor::default());
        let report = orchestrator(provider.clone(), executor.clone())
            .converge(ConvergeRequest {
                groups: vec![web(1), db(1)],
                phases: vec![],
            })
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), Some(Stage::CreateGroupNodes));
        assert_eq!(failed_groups(&report), vec!["db"]);
        let created: Vec<&str> = report
            .created_nodes
            .iter()
            .map(|n| n.hostname.as_str())
            .collect();
        assert_eq!(created, vec!["web-1"]);
        assert_eq!(provider.list_nodes().await.unwrap().len(), 1);
        assert!(executor.phase_order().is_empty());
    }

    #[test]
    fn test_resolve_phases_prefers_request() {
        let target = web(1).bind(Node::new("w1", "web-1", "web"));
        assert_eq!(
            resolve_phases(&["deploy".to_string()], std::slice::from_ref(&target)),
            vec!["deploy"]
        );
        assert_eq!(resolve_phases(&[], &[target]), vec!["configure"]);
    }
}
