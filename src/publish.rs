// SPDX-License-Identifier: MIT
//! Dependency install and static publishing.
//!
//! On hosts that cannot expose per-project localhost ports, a project is
//! built once (`npm run build`) and served from its `dist/` directory by
//! the preview proxy; `preview_port == 0` marks that mode in the record.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::actions::{run_command, CommandOutput};
use crate::project::{Project, ProjectStatus, ProjectStore};
use crate::supervisor::{StartOutcome, Supervisor};
use crate::AppContext;

/// Subdirectory holding the built static artifact.
pub const BUILD_DIR: &str = "dist";

/// Install project dependencies. Requires a `package.json` manifest; a
/// missing manifest or failed install is reported, not raised.
pub async fn install_dependencies(
    store: &ProjectStore,
    commands_install: &str,
    command_timeout: Duration,
    project: &mut Project,
) -> Result<CommandOutput> {
    store.set_status(project, ProjectStatus::Installing).await?;

    if !project.path.join("package.json").exists() {
        return Ok(CommandOutput {
            success: false,
            output: String::new(),
            error: Some("no package.json manifest in project".to_string()),
        });
    }

    Ok(run_command(&project.path, commands_install, command_timeout).await)
}

/// Build the project and switch it to static-serving mode.
pub async fn build_static(
    store: &ProjectStore,
    commands_build: &str,
    command_timeout: Duration,
    project: &mut Project,
) -> Result<StartOutcome> {
    store.set_status(project, ProjectStatus::Building).await?;

    let result = run_command(&project.path, commands_build, command_timeout).await;
    if !result.success {
        warn!(project = %project.id, "static build failed");
        project.error = result.error.clone();
        store.set_status(project, ProjectStatus::Error).await?;
        return Ok(StartOutcome {
            success: false,
            preview_url: None,
            output: result.output,
            error: result.error,
        });
    }

    let preview_url = format!("/preview/{}", project.id);
    project.preview_url = Some(preview_url.clone());
    // Port 0 is the static-mode marker: running, but no live process.
    project.preview_port = Some(0);
    project.error = None;
    store.set_status(project, ProjectStatus::Running).await?;
    info!(project = %project.id, "published static build");

    Ok(StartOutcome {
        success: true,
        preview_url: Some(preview_url),
        output: result.output,
        error: None,
    })
}

/// Start the preview using the strategy the host environment allows: a
/// live dev server normally, a static build on constrained hosts.
pub async fn start_preview(ctx: &Arc<AppContext>, project: &mut Project) -> Result<StartOutcome> {
    if ctx.config.static_mode {
        build_static(
            &ctx.store,
            &ctx.config.commands.build,
            Duration::from_secs(ctx.config.timeouts.command_secs),
            project,
        )
        .await
    } else {
        ctx.supervisor.start(project).await
    }
}

/// Stop whatever preview is active. In static mode there is no process;
/// the record just returns to Idle.
pub async fn stop_preview(ctx: &Arc<AppContext>, project: &mut Project) -> Result<()> {
    ctx.supervisor.stop(project).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn install_without_manifest_is_a_reported_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let mut project = store.create(None).await.unwrap();

        let result = install_dependencies(
            &store,
            "echo should-not-run",
            Duration::from_secs(5),
            &mut project,
        )
        .await
        .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("package.json"));
        assert_eq!(project.status, ProjectStatus::Installing);
    }

    #[tokio::test]
    async fn successful_build_switches_to_static_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let mut project = store.create(None).await.unwrap();

        let outcome = build_static(
            &store,
            "mkdir -p dist && echo '<html></html>' > dist/index.html",
            Duration::from_secs(10),
            &mut project,
        )
        .await
        .unwrap();
        assert!(outcome.success);
        assert_eq!(project.preview_port, Some(0));
        assert!(project.is_static());
        assert_eq!(project.status, ProjectStatus::Running);
        assert_eq!(
            outcome.preview_url.unwrap(),
            format!("/preview/{}", project.id)
        );
    }

    #[tokio::test]
    async fn failed_build_records_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        let mut project = store.create(None).await.unwrap();

        let outcome = build_static(&store, "exit 2", Duration::from_secs(10), &mut project)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(project.status, ProjectStatus::Error);
        assert!(project.preview_port.is_none());
    }
}
