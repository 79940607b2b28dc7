// SPDX-License-Identifier: MIT
//! Project record types.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle state of one generated project.
///
/// Transitions move forward only, with two exceptions: `stop` takes
/// Running/Error back to Idle, and `delete` removes the project from any
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Idle,
    Creating,
    Generating,
    Installing,
    Building,
    Running,
    Error,
    Completed,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProjectStatus::Idle => "idle",
            ProjectStatus::Creating => "creating",
            ProjectStatus::Generating => "generating",
            ProjectStatus::Installing => "installing",
            ProjectStatus::Building => "building",
            ProjectStatus::Running => "running",
            ProjectStatus::Error => "error",
            ProjectStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// One sandboxed, generated application and its filesystem root.
///
/// Invariant: `preview_port` is `Some(p)` with `p > 0` only while a live dev
/// server is running; `Some(0)` marks static-serving mode (a built artifact
/// on disk instead of a process).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Absolute root directory; 1:1 with `id`.
    pub path: PathBuf,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Project {
    /// True when the project is in static-serving mode (built artifact on
    /// disk, no live process).
    pub fn is_static(&self) -> bool {
        self.preview_port == Some(0)
    }

    /// True when a preview was ever established for this project — used to
    /// decide whether a follow-up generation turn should restart the server.
    pub fn was_previewing(&self) -> bool {
        self.preview_url.is_some() || self.preview_port.is_some()
    }
}

/// One file of a project, captured for generator context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
    pub language: String,
}

/// Opaque project id: `proj_<millis base36>_<6 random base36 chars>`.
pub fn new_project_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| {
            let n = rng.gen_range(0..36u32);
            std::char::from_digit(n, 36).unwrap_or('0')
        })
        .collect();
    format!("proj_{}_{}", to_base36(millis), suffix)
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(std::char::from_digit((n % 36) as u32, 36).unwrap_or('0'));
        n /= 36;
    }
    digits.iter().rev().collect()
}

/// Map a file extension to the language tag sent with generator context.
pub fn language_for_extension(ext: &str) -> &'static str {
    match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "css" => "css",
        "html" => "html",
        "json" => "json",
        "md" => "markdown",
        "py" => "python",
        "sh" => "shell",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_ids_are_unique_and_prefixed() {
        let a = new_project_id();
        let b = new_project_id();
        assert!(a.starts_with("proj_"));
        assert_ne!(a, b);
    }

    #[test]
    fn base36_round_trips_known_values() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn static_mode_is_port_zero() {
        let mut p = Project {
            id: "proj_x".into(),
            name: "x".into(),
            path: PathBuf::from("/tmp/x"),
            status: ProjectStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            preview_url: Some("/preview/proj_x".into()),
            preview_port: Some(0),
            error: None,
        };
        assert!(p.is_static());
        p.preview_port = Some(5173);
        assert!(!p.is_static());
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&ProjectStatus::Running).unwrap();
        assert_eq!(s, "\"running\"");
    }
}
