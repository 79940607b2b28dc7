// SPDX-License-Identifier: MIT
//! Generation orchestrator.
//!
//! Sequences one generation run: cheap local "understanding" events, one
//! call to the external generator, applying the returned action batch,
//! then install + preview start when the result warrants it. Progress is
//! streamed through a [`ProgressEmitter`]; the run itself never returns an
//! error — failures become the stream's terminal error event and the
//! outcome's `error` field.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::actions::{ActionEngine, AgentAction};
use crate::error::HostError;
use crate::events::{EventKind, ProgressEmitter};
use crate::generator::{Turn, TurnRole};
use crate::project::{Project, ProjectStatus};
use crate::publish;
use crate::AppContext;

/// Body of `POST /agent`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateRequest {
    pub message: String,
    pub image_data: Option<String>,
    pub project_id: Option<String>,
    pub conversation_history: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub image_data: Option<String>,
}

/// Final state of one run; mirrored into the terminal stream event and the
/// non-streaming JSON response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub actions: Vec<AgentAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<Project>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerateOutcome {
    fn failed(error: impl Into<String>, project: Option<Project>) -> Self {
        Self {
            success: false,
            message: String::new(),
            thinking: None,
            actions: Vec::new(),
            project,
            completed: false,
            error: Some(error.into()),
        }
    }
}

/// Run one generation turn end to end, streaming progress as it goes.
pub async fn run(
    ctx: &Arc<AppContext>,
    req: GenerateRequest,
    emitter: &mut ProgressEmitter,
) -> GenerateOutcome {
    let run_id = uuid::Uuid::new_v4();
    info!(run = %run_id, project = ?req.project_id, "generation run started");

    if req.message.trim().is_empty() && req.image_data.is_none() {
        let err = HostError::Validation("message must not be empty".to_string());
        emitter.fail(err.to_string(), None).await;
        return GenerateOutcome::failed(err.to_string(), None);
    }

    // ── Phase 1: local understanding, no model call ──────────────────────────
    emitter.emit(EventKind::Progress, "Starting up...", 2).await;
    emitter
        .emit(EventKind::Progress, "Reading your request...", 5)
        .await;

    let summary = request_summary(&req);
    emitter
        .emit_with(
            EventKind::Understanding,
            "Analyzing the request...",
            10,
            Some(json!({ "requirement": summary })),
        )
        .await;

    let keywords = classify_request(&req);
    emitter
        .emit_with(
            EventKind::Understanding,
            "Identifying what to build...",
            15,
            Some(json!({ "keywords": keywords })),
        )
        .await;
    emitter
        .emit_with(
            EventKind::Understanding,
            "Request understood",
            20,
            Some(json!({ "confirmed": true })),
        )
        .await;

    // ── Phase 2: project + context ───────────────────────────────────────────
    let mut project = match load_or_create(ctx, req.project_id.as_deref()).await {
        Ok((project, existing)) => {
            let msg = if existing {
                "Loading existing project..."
            } else {
                "Setting up a fresh project..."
            };
            emitter.emit(EventKind::Progress, msg, 25).await;
            project
        }
        Err(e) => {
            emitter.fail(format!("could not prepare project: {e:#}"), None).await;
            return GenerateOutcome::failed(format!("could not prepare project: {e:#}"), None);
        }
    };

    if let Err(e) = ctx.store.set_status(&mut project, ProjectStatus::Generating).await {
        warn!(run = %run_id, "could not persist generating status: {e:#}");
    }

    emitter
        .emit(EventKind::Progress, "Collecting project context...", 28)
        .await;
    let snapshot = ctx.store.snapshot_files(&project).await;

    let turns = build_turns(&req);

    // ── Phase 3: the one generator call ──────────────────────────────────────
    emitter
        .emit(EventKind::Thinking, "Designing a solution...", 30)
        .await;
    emitter
        .emit(EventKind::Progress, "Waiting for the generator...", 35)
        .await;

    let reply = match ctx.generator.generate(&turns, &snapshot).await {
        Ok(reply) => reply,
        Err(e) => {
            // One error event, end of stream — the caller resubmits.
            warn!(run = %run_id, project = %project.id, "generation failed: {e}");
            project.error = Some(e.to_string());
            let _ = ctx.store.set_status(&mut project, ProjectStatus::Error).await;
            emitter
                .fail(e.to_string(), Some(json!({ "project": &project })))
                .await;
            return GenerateOutcome::failed(e.to_string(), Some(project));
        }
    };

    emitter
        .emit(EventKind::Progress, "Generation complete", 50)
        .await;

    // ── Phase 4: apply the action batch ──────────────────────────────────────
    if !reply.actions.is_empty() {
        emitter
            .emit_with(
                EventKind::Progress,
                "Applying changes...",
                55,
                Some(json!({ "actions": reply.actions.len() })),
            )
            .await;

        let engine = ActionEngine::new(Duration::from_secs(ctx.config.timeouts.command_secs));
        let report = engine.apply(&project, &reply.actions).await;

        // One event for the whole batch — the stream stays compact even for
        // large projects.
        let message = if report.all_succeeded {
            format!("Applied {} changes", report.results.len())
        } else {
            format!(
                "Applied {} changes ({} failed)",
                report.results.len(),
                report.failure_count()
            )
        };
        emitter
            .emit_with(
                EventKind::Action,
                message,
                80,
                Some(json!({ "results": &report.results })),
            )
            .await;
    }

    // ── Phase 5: install + preview ───────────────────────────────────────────
    let is_new_app = reply.completed
        && reply.actions.iter().any(|a| a.creates("package.json"));
    let was_previewing = project.was_previewing();

    if is_new_app || was_previewing {
        if is_new_app {
            emitter
                .emit(EventKind::Progress, "Installing dependencies...", 85)
                .await;
            match publish::install_dependencies(
                &ctx.store,
                &ctx.config.commands.install,
                Duration::from_secs(ctx.config.timeouts.command_secs),
                &mut project,
            )
            .await
            {
                Ok(result) if !result.success => {
                    // Non-fatal: still try to start — some dev servers cope.
                    warn!(run = %run_id, project = %project.id, "dependency install failed: {:?}", result.error);
                    emitter
                        .emit(EventKind::Progress, "Install had problems, continuing...", 90)
                        .await;
                }
                Ok(_) => {}
                Err(e) => warn!(run = %run_id, "install bookkeeping failed: {e:#}"),
            }
        }

        emitter
            .emit(EventKind::Progress, "Starting the preview...", 92)
            .await;
        match publish::start_preview(ctx, &mut project).await {
            Ok(outcome) if outcome.success => {
                emitter
                    .emit_with(
                        EventKind::Progress,
                        "Preview is ready",
                        98,
                        Some(json!({ "previewUrl": outcome.preview_url })),
                    )
                    .await;
            }
            Ok(outcome) => {
                warn!(run = %run_id, project = %project.id, "preview start failed: {:?}", outcome.error);
                emitter
                    .emit(EventKind::Progress, "Preview could not start yet", 95)
                    .await;
            }
            Err(e) => warn!(run = %run_id, "preview bookkeeping failed: {e:#}"),
        }
    } else if reply.completed {
        let _ = ctx.store.set_status(&mut project, ProjectStatus::Completed).await;
    }

    // Reload so the terminal event carries whatever state the start/install
    // path persisted.
    let final_project = ctx.store.load(&project.id).await.unwrap_or(project);

    emitter
        .finish(
            reply.message.clone(),
            json!({
                "thinking": &reply.thinking,
                "actions": &reply.actions,
                "project": &final_project,
                "completed": reply.completed,
            }),
        )
        .await;

    info!(run = %run_id, project = %final_project.id, "generation run finished");
    GenerateOutcome {
        success: true,
        message: reply.message,
        thinking: Some(reply.thinking),
        actions: reply.actions,
        project: Some(final_project),
        completed: reply.completed,
        error: None,
    }
}

async fn load_or_create(
    ctx: &Arc<AppContext>,
    project_id: Option<&str>,
) -> anyhow::Result<(Project, bool)> {
    if let Some(id) = project_id {
        if let Some(existing) = ctx.store.load(id).await {
            return Ok((existing, true));
        }
        // Stale id from a deleted project — fall through to a fresh one.
    }
    Ok((ctx.store.create(None).await?, false))
}

fn build_turns(req: &GenerateRequest) -> Vec<Turn> {
    let mut turns: Vec<Turn> = req
        .conversation_history
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| Turn {
            role: if m.role == "assistant" {
                TurnRole::Assistant
            } else {
                TurnRole::User
            },
            content: m.content.clone(),
            image_data: m.image_data.clone(),
        })
        .collect();
    turns.push(Turn {
        role: TurnRole::User,
        content: req.message.clone(),
        image_data: req.image_data.clone(),
    });
    turns
}

fn request_summary(req: &GenerateRequest) -> String {
    if req.image_data.is_some() {
        return "screenshot attached — reproducing the pictured UI".to_string();
    }
    let trimmed = req.message.trim();
    if trimmed.chars().count() > 50 {
        let head: String = trimmed.chars().take(40).collect();
        format!("\"{head}...\"")
    } else {
        format!("\"{trimmed}\"")
    }
}

/// Keyword buckets for the local understanding phase. Deliberately crude —
/// this runs before (and instead of) any model call.
fn classify_request(req: &GenerateRequest) -> Vec<&'static str> {
    const BUCKETS: &[(&[&str], &str)] = &[
        (&["website", "site", "landing", "homepage"], "website / landing page"),
        (&["app", "tool", "dashboard"], "application"),
        (&["form", "login", "signup", "register"], "forms"),
        (&["animation", "interactive", "effect"], "animation & effects"),
        (&["responsive", "mobile", "phone"], "responsive design"),
    ];

    let message = req.message.to_lowercase();
    let mut keywords: Vec<&'static str> = BUCKETS
        .iter()
        .filter(|(needles, _)| needles.iter().any(|n| message.contains(n)))
        .map(|(_, label)| *label)
        .collect();
    if req.image_data.is_some() {
        keywords.push("visual reproduction");
    }
    if keywords.is_empty() {
        keywords.push("creative project");
    }
    keywords.truncate(3);
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_buckets_match_keywords() {
        let req = GenerateRequest {
            message: "Build a responsive landing page with a signup form".into(),
            ..Default::default()
        };
        let kw = classify_request(&req);
        assert!(kw.contains(&"website / landing page"));
        assert!(kw.contains(&"forms"));
        assert!(kw.contains(&"responsive design"));
        assert_eq!(kw.len(), 3);
    }

    #[test]
    fn unmatched_request_falls_back_to_creative() {
        let req = GenerateRequest {
            message: "surprise me".into(),
            ..Default::default()
        };
        assert_eq!(classify_request(&req), vec!["creative project"]);
    }

    #[test]
    fn summary_truncates_long_requests() {
        let req = GenerateRequest {
            message: "x".repeat(120),
            ..Default::default()
        };
        let s = request_summary(&req);
        assert!(s.ends_with("...\""));
        assert!(s.chars().count() < 50);
    }

    #[test]
    fn history_maps_roles_and_skips_system() {
        let req = GenerateRequest {
            message: "continue".into(),
            conversation_history: vec![
                HistoryMessage {
                    role: "system".into(),
                    content: "ignored".into(),
                    image_data: None,
                },
                HistoryMessage {
                    role: "user".into(),
                    content: "make a blog".into(),
                    image_data: None,
                },
                HistoryMessage {
                    role: "assistant".into(),
                    content: "done".into(),
                    image_data: None,
                },
            ],
            ..Default::default()
        };
        let turns = build_turns(&req);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, TurnRole::User);
        assert_eq!(turns[1].role, TurnRole::Assistant);
        assert_eq!(turns[2].content, "continue");
    }
}
