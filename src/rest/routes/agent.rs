// SPDX-License-Identifier: MIT
// rest/routes/agent.rs — generation runs and project lifecycle.
//
// POST /agent is dual-mode: clients that ask for `text/event-stream` get
// the live progress stream; everyone else blocks until the run finishes
// and gets the outcome as one JSON document.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::HostError;
use crate::events::ProgressEmitter;
use crate::orchestrator::{self, GenerateRequest};
use crate::publish;
use crate::rest::sse;
use crate::AppContext;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptimeSecs": ctx.started_at.elapsed().as_secs(),
        "staticMode": ctx.config.static_mode,
    }))
}

pub async fn generate(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let wants_stream = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("text/event-stream"));

    if wants_stream {
        let (tx, rx) = mpsc::channel(64);
        let mut emitter = ProgressEmitter::new(tx);
        tokio::spawn(async move {
            orchestrator::run(&ctx, req, &mut emitter).await;
        });
        return sse::event_stream(rx).into_response();
    }

    // Non-streaming caller: progress events go nowhere, only the final
    // outcome matters.
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let mut emitter = ProgressEmitter::new(tx);
    let outcome = orchestrator::run(&ctx, req, &mut emitter).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome)).into_response()
}

pub async fn list_projects(State(ctx): State<Arc<AppContext>>) -> Json<serde_json::Value> {
    let projects = ctx.store.list().await;
    Json(json!({ "success": true, "projects": projects }))
}

pub async fn get_project(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Response {
    match ctx.store.load(&id).await {
        Some(project) => {
            let files = ctx.store.snapshot_files(&project).await;
            Json(json!({ "success": true, "project": project, "files": files })).into_response()
        }
        None => not_found(&id),
    }
}

#[derive(Debug, Deserialize)]
pub struct LifecycleRequest {
    pub action: String,
}

pub async fn project_action(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
    Json(req): Json<LifecycleRequest>,
) -> Response {
    let Some(mut project) = ctx.store.load(&id).await else {
        return not_found(&id);
    };

    match req.action.as_str() {
        "start" | "restart" => {
            // Refresh dependencies first; an install problem is logged and
            // reported in the project record, not fatal to the start.
            if project.path.join("package.json").exists() {
                let timeout =
                    std::time::Duration::from_secs(ctx.config.timeouts.command_secs);
                match publish::install_dependencies(
                    &ctx.store,
                    &ctx.config.commands.install,
                    timeout,
                    &mut project,
                )
                .await
                {
                    Ok(result) if !result.success => {
                        warn!(project = %id, "install before start failed: {:?}", result.error);
                    }
                    Ok(_) => {}
                    Err(e) => return internal_error(e),
                }
            }
            // start is already an idempotent restart in the supervisor.
            match publish::start_preview(&ctx, &mut project).await {
                Ok(outcome) => Json(json!({
                    "success": outcome.success,
                    "project": project,
                    "previewUrl": outcome.preview_url,
                    "error": outcome.error,
                }))
                .into_response(),
                Err(e) => internal_error(e),
            }
        }
        "stop" => match publish::stop_preview(&ctx, &mut project).await {
            Ok(()) => Json(json!({ "success": true, "project": project })).into_response(),
            Err(e) => internal_error(e),
        },
        other => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": format!("unknown action '{other}' (expected start, stop, or restart)"),
            })),
        )
            .into_response(),
    }
}

pub async fn delete_project(
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> Response {
    let Some(mut project) = ctx.store.load(&id).await else {
        return not_found(&id);
    };

    // Reap the dev server first so the project directory is not busy.
    if let Err(e) = publish::stop_preview(&ctx, &mut project).await {
        warn!(project = %id, "stop before delete failed: {e:#}");
    }
    match ctx.store.delete(&id).await {
        Ok(()) => {
            info!(project = %id, "project deleted");
            Json(json!({ "success": true })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

fn not_found(id: &str) -> Response {
    let err = HostError::NotFound(format!("project '{id}'"));
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    warn!("request failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}
