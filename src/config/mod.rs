// SPDX-License-Identifier: MIT
//! Daemon configuration.
//!
//! Loaded from an optional `config.toml` next to the projects directory,
//! then overridden by environment variables and CLI flags. Every section
//! has serde defaults so a missing or partial file is never an error.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_PORT: u16 = 4800;
const DEFAULT_PROJECTS_DIR: &str = ".projects";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── PortsConfig ─────────────────────────────────────────────────────────────

/// Dev-server port pool (`[ports]` in config.toml).
///
/// Each project hashes deterministically onto `base_port + offset` with
/// `offset < pool_size`, so restarts of the same project tend to reuse the
/// same port.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortsConfig {
    /// First port of the managed pool (default: 5173, the Vite default).
    pub base_port: u16,
    /// Number of ports in the pool (default: 100).
    pub pool_size: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            base_port: 5173,
            pool_size: 100,
        }
    }
}

// ─── TimeoutsConfig ──────────────────────────────────────────────────────────

/// Operation timeouts (`[timeouts]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// How long to wait for a dev server's readiness marker before returning
    /// the preview URL optimistically (seconds, default: 15).
    pub server_ready_secs: u64,
    /// Upper bound for one agent-requested shell command (seconds, default: 120).
    pub command_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            server_ready_secs: 15,
            command_secs: 120,
        }
    }
}

// ─── CommandsConfig ──────────────────────────────────────────────────────────

/// Project toolchain commands (`[commands]` in config.toml).
///
/// `{port}` in the dev-server command is replaced with the allocated port.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub dev_server: String,
    pub install: String,
    pub build: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            dev_server: "npm run dev -- --port {port} --host".to_string(),
            install: "npm install --legacy-peer-deps".to_string(),
            build: "npm run build".to_string(),
        }
    }
}

// ─── GeneratorConfig ─────────────────────────────────────────────────────────

/// Generation service endpoint (`[generator]` in config.toml).
///
/// The API key is normally supplied via `GEMINI_API_KEY` rather than the
/// file; a value in the file is kept as a fallback.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gemini-2.5-pro-preview-05-06".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }
}

// ─── HostConfig ──────────────────────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// HTTP bind address (default: 127.0.0.1).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// HTTP port for the agent API and preview proxy.
    pub port: u16,
    /// Base directory under which every project gets its own subdirectory.
    pub projects_dir: PathBuf,
    /// Serve built static artifacts instead of live dev servers. Flipped on
    /// automatically on hosts that cannot expose extra localhost ports.
    pub static_mode: bool,
    pub ports: PortsConfig,
    pub timeouts: TimeoutsConfig,
    pub commands: CommandsConfig,
    pub generator: GeneratorConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: DEFAULT_PORT,
            projects_dir: PathBuf::from(DEFAULT_PROJECTS_DIR),
            static_mode: false,
            ports: PortsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            commands: CommandsConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from `path` if it exists, then apply environment overrides.
    /// A malformed file logs a warning and falls back to defaults rather
    /// than refusing to start.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = match path {
            Some(p) if p.exists() => match std::fs::read_to_string(p) {
                Ok(raw) => match toml::from_str::<HostConfig>(&raw) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("config file {} is invalid: {e} — using defaults", p.display());
                        HostConfig::default()
                    }
                },
                Err(e) => {
                    warn!("could not read {}: {e} — using defaults", p.display());
                    HostConfig::default()
                }
            },
            _ => HostConfig::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.generator.api_key = key.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var("LOOMD_PROJECTS_DIR") {
            if !dir.is_empty() {
                self.projects_dir = PathBuf::from(dir);
            }
        }
        // Hosted platforms cannot expose per-project localhost ports, so the
        // preview falls back to built static artifacts there.
        if std::env::var("LOOMD_STATIC").map(|v| v == "1" || v == "true").unwrap_or(false)
            || std::env::var("RAILWAY_PUBLIC_DOMAIN").is_ok()
            || std::env::var("VERCEL_URL").is_ok()
        {
            self.static_mode = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = HostConfig::default();
        assert_eq!(c.port, DEFAULT_PORT);
        assert_eq!(c.ports.base_port, 5173);
        assert_eq!(c.ports.pool_size, 100);
        assert_eq!(c.timeouts.server_ready_secs, 15);
        assert_eq!(c.timeouts.command_secs, 120);
        assert!(!c.static_mode);
        assert!(c.commands.dev_server.contains("{port}"));
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: HostConfig = toml::from_str(
            r#"
            port = 9100

            [ports]
            base_port = 6000
            "#,
        )
        .unwrap();
        assert_eq!(parsed.port, 9100);
        assert_eq!(parsed.ports.base_port, 6000);
        assert_eq!(parsed.ports.pool_size, 100);
        assert_eq!(parsed.commands.install, "npm install --legacy-peer-deps");
    }
}
