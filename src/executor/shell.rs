//! Shell phase executor.
//!
//! Each command a group declares for a phase is one action, run as
//! `<shell> -c <command>` with the target exported through the environment:
//! - `MUSTER_NODE_ID`, `MUSTER_NODE_HOSTNAME`, `MUSTER_NODE_IP`
//! - `MUSTER_GROUP`, `MUSTER_PHASE`
//! - `MUSTER_META_<KEY>` for every group metadata entry
//!
//! Actions run in order and stop at the first failure. If the last action
//! prints JSON on stdout it becomes the phase's return value.

use anyhow::{Context, Result};
use async_trait::async_trait;
use muster_common::{ActionResult, PhaseResult, Target};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::PhaseExecutor;

pub struct ShellExecutor {
    shell: String,
    working_dir: PathBuf,
    action_timeout: Duration,
}

impl ShellExecutor {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: working_dir.as_ref().to_path_buf(),
            action_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    pub fn with_action_timeout(mut self, action_timeout: Duration) -> Self {
        self.action_timeout = action_timeout;
        self
    }

    async fn run_action(&self, target: &Target, phase: &str, command: &str) -> Result<ActionResult> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("MUSTER_NODE_ID", &target.node.id)
            .env("MUSTER_NODE_HOSTNAME", &target.node.hostname)
            .env(
                "MUSTER_NODE_IP",
                target.node.primary_ip.as_deref().unwrap_or(""),
            )
            .env("MUSTER_GROUP", &target.group_name)
            .env("MUSTER_PHASE", phase);
        for (key, value) in &target.metadata {
            cmd.env(format!("MUSTER_META_{}", env_key(key)), value);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for action: {}", self.shell, command))?;

        let output = match timeout(self.action_timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for action")?,
            Err(_) => {
                return Ok(ActionResult::failure(
                    command,
                    None,
                    &format!(
                        "Action timed out after {} seconds",
                        self.action_timeout.as_secs()
                    ),
                ));
            }
        };

        let exit_code = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        debug!(
            node = %target.node.id,
            phase,
            action = command,
            exit_code = exit_code.unwrap_or(-1),
            "Action finished"
        );

        if output.status.success() {
            Ok(ActionResult::success(command, exit_code, stdout.trim()))
        } else {
            let reason = if !stderr.trim().is_empty() {
                stderr.trim().to_string()
            } else {
                format!("exit code {}", exit_code.unwrap_or(-1))
            };
            Ok(ActionResult::failure(command, exit_code, &reason))
        }
    }
}

/// `db.port` -> `DB_PORT`
fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl PhaseExecutor for ShellExecutor {
    async fn execute(&self, target: &Target, phase: &str) -> Result<PhaseResult> {
        let Some(def) = target.phase(phase) else {
            return Ok(PhaseResult::skipped(target.id(), &target.group_name, phase));
        };

        let started = Instant::now();
        let mut actions = Vec::with_capacity(def.commands.len());
        for command in &def.commands {
            let action = self.run_action(target, phase, command).await?;
            let failed = action.is_error();
            actions.push(action);
            if failed {
                break;
            }
        }

        let return_value = actions
            .last()
            .filter(|a| !a.is_error())
            .and_then(|a| serde_json::from_str::<serde_json::Value>(&a.output).ok());

        let mut result = PhaseResult::new(target.id(), &target.group_name, phase)
            .with_actions(actions)
            .with_duration(started.elapsed());
        if let Some(value) = return_value {
            result = result.with_return_value(value);
        }
        Ok(result)
    }
}
