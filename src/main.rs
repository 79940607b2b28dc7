// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::{Parser, Subcommand};
use loomd::config::HostConfig;
use loomd::{rest, AppContext};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "loomd",
    about = "Loom Host — AI app-generation daemon with live previews",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config.toml
    #[arg(long, env = "LOOMD_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// HTTP port for the agent API and preview proxy
    #[arg(long, env = "LOOMD_PORT")]
    port: Option<u16>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "LOOMD_BIND")]
    bind_address: Option<String>,

    /// Directory holding generated projects
    #[arg(long, env = "LOOMD_PROJECTS_DIR")]
    projects_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOOMD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "LOOMD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,

    /// Log format: pretty (default) or json
    #[arg(long, env = "LOOMD_LOG_FORMAT")]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the host server (default when no subcommand given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = args.log.as_deref().unwrap_or("info");
    let log_format = args.log_format.as_deref().unwrap_or("pretty");
    let _guard = setup_logging(log_level, args.log_file.as_deref(), log_format);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(args.config, args.port, args.bind_address, args.projects_dir).await,
    }
}

async fn serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    bind_address: Option<String>,
    projects_dir: Option<std::path::PathBuf>,
) -> Result<()> {
    let mut config = HostConfig::load(config_path.as_deref());
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(bind) = bind_address {
        config.bind_address = bind;
    }
    if let Some(dir) = projects_dir {
        config.projects_dir = dir;
    }

    std::fs::create_dir_all(&config.projects_dir)?;
    info!(
        projects_dir = %config.projects_dir.display(),
        static_mode = config.static_mode,
        "starting loomd"
    );
    if config.generator.api_key.is_empty() {
        tracing::warn!("GEMINI_API_KEY is not set — generation requests will fail");
    }

    let ctx = Arc::new(AppContext::from_config(config));
    rest::serve(ctx).await
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("loomd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only rather than refusing to start.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
