// SPDX-License-Identifier: MIT
//! Agent action engine.
//!
//! The generation service returns an ordered batch of file and command
//! operations. The batch runs strictly sequentially (create-before-modify
//! ordering matters) and is best-effort: every failure is recorded in the
//! per-action result, none aborts the remainder.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::project::Project;
use crate::security::safe_path;

/// One atomic operation requested by the generation service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    CreateFile {
        path: String,
        #[serde(default)]
        content: String,
    },
    ModifyFile {
        path: String,
        #[serde(default)]
        content: String,
    },
    DeleteFile {
        path: String,
    },
    ExecuteCommand {
        command: String,
    },
    ReadFile {
        path: String,
    },
}

impl AgentAction {
    /// Short human-readable label used in progress payloads and logs.
    pub fn describe(&self) -> String {
        match self {
            AgentAction::CreateFile { path, .. } => format!("create {path}"),
            AgentAction::ModifyFile { path, .. } => format!("modify {path}"),
            AgentAction::DeleteFile { path } => format!("delete {path}"),
            AgentAction::ExecuteCommand { command } => format!("run `{command}`"),
            AgentAction::ReadFile { path } => format!("read {path}"),
        }
    }

    /// True for a `create_file` of the given path — used to detect a fresh
    /// `package.json` manifest, which gates install-and-start.
    pub fn creates(&self, target: &str) -> bool {
        matches!(self, AgentAction::CreateFile { path, .. } if path == target)
    }
}

/// Result of one action, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub success: bool,
    /// Command output, read file content, or the failure reason.
    pub detail: String,
}

/// Aggregate result of a batch. `all_succeeded` is the AND of every item.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub all_succeeded: bool,
    pub results: Vec<ActionOutcome>,
}

impl ActionReport {
    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

/// Captured result of one shell command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

pub struct ActionEngine {
    command_timeout: Duration,
}

impl ActionEngine {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    /// Apply the ordered batch against the project root.
    pub async fn apply(&self, project: &Project, actions: &[AgentAction]) -> ActionReport {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let outcome = match self.apply_one(project, action).await {
                Ok(detail) => ActionOutcome {
                    action: action.describe(),
                    success: true,
                    detail,
                },
                Err(e) => {
                    warn!(project = %project.id, action = %action.describe(), "action failed: {e:#}");
                    ActionOutcome {
                        action: action.describe(),
                        success: false,
                        detail: format!("{e:#}"),
                    }
                }
            };
            results.push(outcome);
        }
        ActionReport {
            all_succeeded: results.iter().all(|r| r.success),
            results,
        }
    }

    async fn apply_one(&self, project: &Project, action: &AgentAction) -> Result<String> {
        match action {
            AgentAction::CreateFile { path, content }
            | AgentAction::ModifyFile { path, content } => {
                let target = safe_path(&project.path, Path::new(path))?;
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                // Whole-file replace, no diffing.
                tokio::fs::write(&target, content).await?;
                debug!(project = %project.id, path, bytes = content.len(), "wrote file");
                Ok(format!("wrote {} bytes", content.len()))
            }
            AgentAction::DeleteFile { path } => {
                let target = safe_path(&project.path, Path::new(path))?;
                match tokio::fs::remove_file(&target).await {
                    Ok(()) => Ok("deleted".to_string()),
                    // Deleting something already gone is not a failure.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Ok("already absent".to_string())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            AgentAction::ExecuteCommand { command } => {
                let result = run_command(&project.path, command, self.command_timeout).await;
                if result.success {
                    Ok(result.output)
                } else {
                    anyhow::bail!(
                        "command failed: {}",
                        result.error.unwrap_or_else(|| result.output.clone())
                    )
                }
            }
            AgentAction::ReadFile { path } => {
                let target = safe_path(&project.path, Path::new(path))?;
                match tokio::fs::read_to_string(&target).await {
                    Ok(content) => Ok(content),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        anyhow::bail!("file not found: {path}")
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

/// Run one shell command in `cwd` under a bounded timeout, capturing
/// combined stdout+stderr. Non-zero exit and timeout are reported in the
/// returned value, never as an error.
pub async fn run_command(cwd: &Path, command: &str, timeout: Duration) -> CommandOutput {
    let fut = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .env("CI", "true")
        .output();

    let output = match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            return CommandOutput {
                success: false,
                output: String::new(),
                error: Some(format!("could not spawn `{command}`: {e}")),
            }
        }
        Err(_) => {
            return CommandOutput {
                success: false,
                output: String::new(),
                error: Some(format!(
                    "`{command}` timed out after {}s",
                    timeout.as_secs()
                )),
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = if stderr.is_empty() {
        stdout.to_string()
    } else {
        format!("{stdout}\n{stderr}")
    };

    if output.status.success() {
        CommandOutput {
            success: true,
            output: combined,
            error: None,
        }
    } else {
        CommandOutput {
            success: false,
            output: combined,
            error: Some(format!(
                "exit code {}",
                output.status.code().unwrap_or(-1)
            )),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
