// SPDX-License-Identifier: MIT
// rest/mod.rs — public HTTP surface.
//
// Axum server bridging REST calls to the orchestrator, project store, and
// preview machinery.
//
// Endpoints:
//   GET  /healthz
//   POST /agent                     (generation run: SSE or JSON)
//   GET  /agent                     (list projects)
//   GET  /agent/{projectId}
//   POST /agent/{projectId}         (lifecycle: start / stop / restart)
//   DELETE /agent/{projectId}
//   GET|POST /preview/{projectId}
//   GET|POST /preview/{projectId}/{*path}

pub mod routes;
pub mod sse;

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::AppContext;

pub async fn serve(ctx: Arc<AppContext>) -> Result<()> {
    let bind = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let addr: SocketAddr = bind.parse()?;

    let router = build_router(ctx);

    info!("app host listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/healthz", get(routes::agent::health))
        .route(
            "/agent",
            get(routes::agent::list_projects).post(routes::agent::generate),
        )
        .route(
            "/agent/{id}",
            get(routes::agent::get_project)
                .post(routes::agent::project_action)
                .delete(routes::agent::delete_project),
        )
        .route(
            "/preview/{id}",
            get(routes::preview::preview_root).post(routes::preview::preview_root),
        )
        .route(
            "/preview/{id}/{*path}",
            get(routes::preview::preview_path).post(routes::preview::preview_path),
        )
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}
