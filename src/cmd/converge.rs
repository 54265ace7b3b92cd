//! Plan, converge and lift commands.

use anyhow::{Context, Result, bail};
use muster::config::MusterConfig;
use muster::executor::ShellExecutor;
use muster::orchestrator::{ConvergeOrchestrator, ConvergeReport, ConvergeRequest, LiftRequest};
use muster::pipeline::PipelineEvent;
use muster::provider::InventoryProvider;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

fn build_orchestrator(config: &MusterConfig, progress: bool) -> Result<ConvergeOrchestrator> {
    let provider = InventoryProvider::open(&config.inventory_path()).with_context(|| {
        format!(
            "Failed to open inventory at {}",
            config.inventory_path().display()
        )
    })?;
    let executor = ShellExecutor::new(&config.project_dir)
        .with_shell(&config.shell())
        .with_action_timeout(config.action_timeout());

    let mut orchestrator =
        ConvergeOrchestrator::new(Arc::new(provider), Arc::new(executor), config.admin_user())
            .with_create_options(config.create_options());

    if progress {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(print_progress(rx));
        orchestrator = orchestrator.with_event_channel(tx);
    }
    Ok(orchestrator)
}

async fn print_progress(mut rx: mpsc::Receiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::PhaseStarted { phase, targets, .. } => {
                eprintln!("==> {} ({} target(s))", phase, targets);
            }
            PipelineEvent::TargetCompleted {
                phase,
                target,
                success,
                skipped,
            } => {
                let status = match (success, skipped) {
                    (_, true) => "skipped",
                    (true, false) => "ok",
                    (false, false) => "FAILED",
                };
                eprintln!("    [{}] {} {}", phase, target, status);
            }
            PipelineEvent::PhaseCompleted { .. } => {}
        }
    }
}

fn print_report(report: &ConvergeReport, json: bool) -> Result<ExitCode> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("Failed to serialize report")?
        );
    } else {
        print!("{}", report);
    }
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn cmd_plan(config: &MusterConfig) -> Result<ExitCode> {
    let groups = config.group_specs();
    if groups.is_empty() {
        bail!("No groups configured in {}", config.config_path.display());
    }

    let plan = build_orchestrator(config, false)?
        .plan(&groups)
        .await
        .context("Failed to compute plan")?;

    print!("{}", plan);
    if plan.is_noop() {
        println!("Nothing to do: every group is at its declared count.");
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn cmd_converge(
    config: &MusterConfig,
    phases: &[String],
    timeout: Option<u64>,
    json: bool,
) -> Result<ExitCode> {
    let groups = config.group_specs();
    if groups.is_empty() {
        bail!("No groups configured in {}", config.config_path.display());
    }
    for warning in config.validate() {
        tracing::warn!(%warning, "Configuration warning");
    }

    let orchestrator = Arc::new(build_orchestrator(config, !json)?);
    let mut handle = orchestrator.spawn_converge(ConvergeRequest {
        groups,
        phases: config.converge_phases(phases),
    });

    let result = match config.converge_timeout(timeout) {
        Some(limit) => match handle.wait_timeout(limit).await {
            Some(result) => result,
            None => {
                println!(
                    "Timed out after {}s waiting for converge to finish.",
                    limit.as_secs()
                );
                return Ok(ExitCode::from(2));
            }
        },
        None => handle.wait().await,
    };

    let report = result.context("Converge failed")?;
    print_report(&report, json)
}

pub async fn cmd_lift(
    config: &MusterConfig,
    patterns: &[String],
    phases: &[String],
    json: bool,
) -> Result<ExitCode> {
    let groups = config.select_groups(patterns);
    if groups.is_empty() {
        bail!("No configured group matches {:?}", patterns);
    }

    let report = build_orchestrator(config, !json)?
        .lift(LiftRequest {
            groups,
            phases: config.converge_phases(phases),
        })
        .await
        .context("Lift failed")?;
    print_report(&report, json)
}
