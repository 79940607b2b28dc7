// SPDX-License-Identifier: MIT
// rest/routes/preview.rs — preview reverse proxy and static file server.
//
// GET|POST /preview/{projectId}/{*path}
//
// Live mode forwards to the project's dev server on localhost and rewrites
// root-relative URLs in HTML bodies so the app works under the /preview/
// prefix. Static mode serves the built dist/ directory with SPA fallback.
// While nothing answers yet, a self-refreshing holding page keeps the
// browser polling.

use axum::{
    body::Bytes,
    extract::{Path as AxumPath, RawQuery, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{Html, IntoResponse, Response},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::HostError;
use crate::project::Project;
use crate::publish::BUILD_DIR;
use crate::security;
use crate::AppContext;

// The empty alternative covers a bare `="/"`; protocol-relative `//` URLs
// stay untouched because their second character fails both alternatives.
static ROOT_URL_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(src|href)="/([^/"][^"]*|)""#).expect("valid regex"));
static HEAD_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<head[^>]*>").expect("valid regex"));

pub async fn preview_root(
    state: State<Arc<AppContext>>,
    AxumPath(id): AxumPath<String>,
    query: RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve(state, id, String::new(), query, method, headers, body).await
}

pub async fn preview_path(
    state: State<Arc<AppContext>>,
    AxumPath((id, path)): AxumPath<(String, String)>,
    query: RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve(state, id, path, query, method, headers, body).await
}

async fn serve(
    State(ctx): State<Arc<AppContext>>,
    id: String,
    path: String,
    RawQuery(query): RawQuery,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(project) = ctx.store.load(&id).await else {
        let err = HostError::NotFound(format!("project '{id}'"));
        return (
            StatusCode::NOT_FOUND,
            axum::Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response();
    };

    if project.is_static() {
        return serve_static(&project, &path, &method).await;
    }

    match project.preview_port {
        Some(port) if port > 0 => {
            proxy(
                &ctx.http_client,
                &project,
                port,
                &path,
                query.as_deref(),
                method,
                headers,
                body,
            )
            .await
        }
        // Known project, no server yet: hold the browser until a run or a
        // lifecycle action brings one up.
        _ => holding_page("Starting your app...", "The preview server is not running yet."),
    }
}

// ─── Live proxy ──────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn proxy(
    client: &reqwest::Client,
    project: &Project,
    port: u16,
    path: &str,
    query: Option<&str>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut url = format!("http://localhost:{port}/{path}");
    if let Some(q) = query {
        url.push('?');
        url.push_str(q);
    }

    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut request = client.request(reqwest_method, &url);
    for name in [
        header::CONTENT_TYPE,
        header::ACCEPT,
        header::ACCEPT_ENCODING,
        header::USER_AGENT,
    ] {
        if let Some(value) = headers.get(&name).and_then(|v| v.to_str().ok()) {
            request = request.header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = match request.send().await {
        Ok(resp) => resp,
        Err(e) => {
            // Server registered but not accepting yet (or just died).
            debug!(project = %project.id, port, "preview upstream unreachable: {e}");
            return holding_page(
                "Your app is waking up...",
                "The dev server is still starting. This page refreshes automatically.",
            );
        }
    };

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let cache_control = upstream
        .headers()
        .get(header::CACHE_CONTROL)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("public, max-age=3600")
        .to_string();

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(project = %project.id, "preview upstream body failed: {e}");
            return holding_page("Your app hiccuped...", "The dev server dropped the response.");
        }
    };

    if content_type.contains("text/html") {
        let html = String::from_utf8_lossy(&bytes);
        let rewritten = rewrite_html(&html, &project.id);
        return (
            status,
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            ],
            rewritten,
        )
            .into_response();
    }

    (
        status,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
        bytes,
    )
        .into_response()
}

/// Rewrite root-relative URLs so the proxied app resolves its assets under
/// the /preview/{id}/ prefix, and anchor everything else with a single
/// `<base>` tag.
fn rewrite_html(html: &str, project_id: &str) -> String {
    let prefix = format!("/preview/{project_id}/");

    let rewritten = ROOT_URL_ATTR
        .replace_all(html, |caps: &regex::Captures<'_>| {
            format!(r#"{}="{}{}""#, &caps[1], prefix, &caps[2])
        })
        .into_owned();

    if rewritten.to_lowercase().contains("<base") {
        return rewritten;
    }
    match HEAD_OPEN.find(&rewritten) {
        Some(m) => {
            let mut out = String::with_capacity(rewritten.len() + 64);
            out.push_str(&rewritten[..m.end()]);
            out.push_str(&format!(r#"<base href="{prefix}">"#));
            out.push_str(&rewritten[m.end()..]);
            out
        }
        None => rewritten,
    }
}

// ─── Static serving ──────────────────────────────────────────────────────────

async fn serve_static(project: &Project, path: &str, method: &Method) -> Response {
    if *method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "Static previews are read-only")
            .into_response();
    }

    let dist = project.path.join(BUILD_DIR);
    if !dist.is_dir() {
        return holding_page(
            "Building your app...",
            "The static build has not finished yet.",
        );
    }

    let requested = if path.is_empty() { "index.html" } else { path };
    let file = match security::safe_path(&dist, Path::new(requested)) {
        Ok(p) => p,
        Err(_) => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    let has_extension = Path::new(requested)
        .extension()
        .and_then(|e| e.to_str())
        .is_some();

    // SPA fallback: extension-less routes resolve to the app shell; a
    // missing asset with an extension is a genuine 404.
    let (file, name) = if tokio::fs::metadata(&file).await.map_or(false, |m| m.is_file()) {
        (file, requested.to_string())
    } else if has_extension {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    } else {
        (dist.join("index.html"), "index.html".to_string())
    };

    let bytes = match tokio::fs::read(&file).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };

    let content_type = content_type_for(&name);
    let cache = if content_type.starts_with("text/html") {
        "no-cache, no-store, must-revalidate"
    } else {
        "public, max-age=31536000"
    };

    if content_type.starts_with("text/html") {
        let rewritten = rewrite_html(&String::from_utf8_lossy(&bytes), &project.id);
        return (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CACHE_CONTROL, cache),
            ],
            rewritten,
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache),
        ],
        bytes,
    )
        .into_response()
}

fn content_type_for(name: &str) -> &'static str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

// ─── Holding page ────────────────────────────────────────────────────────────

/// 503 with a small page that reloads itself; never cached, so the first
/// successful response replaces it.
fn holding_page(title: &str, detail: &str) -> Response {
    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
  body {{ font-family: system-ui, sans-serif; display: flex; align-items: center;
         justify-content: center; height: 100vh; margin: 0; background: #0f172a;
         color: #e2e8f0; }}
  .card {{ text-align: center; }}
  .spinner {{ width: 40px; height: 40px; margin: 0 auto 16px;
             border: 3px solid #334155; border-top-color: #38bdf8;
             border-radius: 50%; animation: spin 1s linear infinite; }}
  @keyframes spin {{ to {{ transform: rotate(360deg); }} }}
  p {{ color: #94a3b8; }}
</style>
</head>
<body>
  <div class="card">
    <div class="spinner"></div>
    <h2>{title}</h2>
    <p>{detail}</p>
  </div>
  <script>setTimeout(() => location.reload(), 3000);</script>
</body>
</html>"#
    );

    (
        StatusCode::SERVICE_UNAVAILABLE,
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::RETRY_AFTER, "3"),
        ],
        Html(html),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_relative_urls_gain_preview_prefix() {
        let html = r#"<html><head><link href="/assets/app.css"></head><body><script src="/main.js"></script></body></html>"#;
        let out = rewrite_html(html, "proj_x");
        assert!(out.contains(r#"href="/preview/proj_x/assets/app.css""#));
        assert!(out.contains(r#"src="/preview/proj_x/main.js""#));
    }

    #[test]
    fn bare_root_url_is_rewritten() {
        let html = r#"<a href="/">home</a>"#;
        let out = rewrite_html(html, "proj_x");
        assert!(out.contains(r#"href="/preview/proj_x/""#));
    }

    #[test]
    fn absolute_and_protocol_relative_urls_are_untouched() {
        let html = r#"<a href="https://example.com/x">x</a><img src="//cdn.example.com/i.png">"#;
        let out = rewrite_html(html, "proj_x");
        assert!(out.contains(r#"href="https://example.com/x""#));
        assert!(out.contains(r#"src="//cdn.example.com/i.png""#));
    }

    #[test]
    fn base_tag_is_injected_once_into_head() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let out = rewrite_html(html, "proj_x");
        assert_eq!(out.matches("<base").count(), 1);
        assert!(out.contains(r#"<head><base href="/preview/proj_x/">"#));
    }

    #[test]
    fn existing_base_tag_is_preserved() {
        let html = r#"<html><head><base href="/other/"></head></html>"#;
        let out = rewrite_html(html, "proj_x");
        assert_eq!(out.matches("<base").count(), 1);
        assert!(out.contains(r#"href="/other/""#));
    }

    #[test]
    fn headless_document_gets_no_base_tag() {
        let out = rewrite_html("<p>hi</p>", "proj_x");
        assert!(!out.contains("<base"));
    }

    #[test]
    fn content_types_cover_common_assets() {
        assert_eq!(content_type_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for("app.js"), "application/javascript");
        assert_eq!(content_type_for("style.css"), "text/css");
        assert_eq!(content_type_for("unknown.bin"), "application/octet-stream");
    }
}
