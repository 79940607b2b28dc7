// SPDX-License-Identifier: MIT
//! Filesystem-backed project registry.
//!
//! One directory per project under a configurable base dir, with a
//! `.project-meta.json` record inside. Writes are last-writer-wins; callers
//! serialize operations per project id. A missing or corrupt record reads
//! as "not found", never as an error.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::model::{language_for_extension, new_project_id, FileSnapshot, Project, ProjectStatus};

const META_FILE: &str = ".project-meta.json";

/// Directories never included in a file snapshot (build output and vendored
/// dependencies would blow past the generator's context window).
const SNAPSHOT_SKIP_DIRS: &[&str] = &["node_modules", "dist", "build"];

pub struct ProjectStore {
    base_dir: PathBuf,
}

impl ProjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Root directory for a project id (whether or not it exists).
    pub fn project_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(id)
    }

    // ─── CRUD ─────────────────────────────────────────────────────────────────

    /// Create a fresh project directory and persist its initial record.
    pub async fn create(&self, name: Option<String>) -> Result<Project> {
        let id = new_project_id();
        let path = self.project_dir(&id);
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("creating project directory {}", path.display()))?;

        let now = Utc::now();
        let project = Project {
            name: name.unwrap_or_else(|| format!("app_{id}")),
            id,
            path,
            status: ProjectStatus::Creating,
            created_at: now,
            updated_at: now,
            preview_url: None,
            preview_port: None,
            error: None,
        };
        self.save(&project).await?;
        Ok(project)
    }

    /// Persist the full record. Last writer wins.
    pub async fn save(&self, project: &Project) -> Result<()> {
        let meta = project.path.join(META_FILE);
        let json = serde_json::to_string_pretty(project)?;
        tokio::fs::write(&meta, json)
            .await
            .with_context(|| format!("writing {}", meta.display()))
    }

    /// Load a project by id. Missing directory, missing metadata, or a
    /// record that no longer parses all read as `None`.
    pub async fn load(&self, id: &str) -> Option<Project> {
        let meta = self.project_dir(id).join(META_FILE);
        let raw = tokio::fs::read_to_string(&meta).await.ok()?;
        match serde_json::from_str::<Project>(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(project = id, "unreadable project metadata: {e}");
                None
            }
        }
    }

    /// Update status (+ timestamps) and persist. Callers set preview fields
    /// and error text on `project` before calling.
    pub async fn set_status(&self, project: &mut Project, status: ProjectStatus) -> Result<()> {
        project.status = status;
        project.updated_at = Utc::now();
        self.save(project).await
    }

    /// All known projects, newest first. Directories without a readable
    /// record are skipped.
    pub async fn list(&self) -> Vec<Project> {
        let mut projects = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.base_dir).await else {
            return projects;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(p) = self.load(&entry.file_name().to_string_lossy()).await {
                projects.push(p);
            }
        }
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        projects
    }

    /// Remove the project directory recursively. Best-effort; a project that
    /// is already gone is not an error.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let dir = self.project_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(project = id, "could not remove {}: {e}", dir.display());
                Ok(())
            }
        }
    }

    // ─── Snapshot ─────────────────────────────────────────────────────────────

    /// Capture every text file of the project for generator context,
    /// skipping dotfiles, dependency and build directories, and anything
    /// that is not valid UTF-8.
    pub async fn snapshot_files(&self, project: &Project) -> Vec<FileSnapshot> {
        let mut files = Vec::new();
        let mut stack: Vec<(PathBuf, String)> = vec![(project.path.clone(), String::new())];

        while let Some((dir, prefix)) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') || SNAPSHOT_SKIP_DIRS.contains(&name.as_str()) {
                    continue;
                }
                let rel = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let file_type = match entry.file_type().await {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                if file_type.is_dir() {
                    stack.push((entry.path(), rel));
                } else if file_type.is_file() {
                    // Binary files fail the UTF-8 read and are skipped.
                    if let Ok(content) = tokio::fs::read_to_string(entry.path()).await {
                        let ext = Path::new(&name)
                            .extension()
                            .and_then(|e| e.to_str())
                            .unwrap_or("");
                        files.push(FileSnapshot {
                            language: language_for_extension(ext).to_string(),
                            path: rel,
                            content,
                        });
                    }
                }
            }
        }

        debug!(project = %project.id, files = files.len(), "captured file snapshot");
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ProjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let (_dir, s) = store();
        let created = s.create(Some("demo".into())).await.unwrap();
        assert_eq!(created.status, ProjectStatus::Creating);

        let loaded = s.load(&created.id).await.expect("should exist");
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.created_at, created.created_at);
    }

    #[tokio::test]
    async fn default_name_derives_from_id() {
        let (_dir, s) = store();
        let p = s.create(None).await.unwrap();
        assert_eq!(p.name, format!("app_{}", p.id));
    }

    #[tokio::test]
    async fn missing_and_corrupt_records_read_as_none() {
        let (_dir, s) = store();
        assert!(s.load("proj_nope").await.is_none());

        let p = s.create(None).await.unwrap();
        tokio::fs::write(p.path.join(META_FILE), "{not json")
            .await
            .unwrap();
        assert!(s.load(&p.id).await.is_none());
    }

    #[tokio::test]
    async fn list_sorts_newest_first_and_skips_strays() {
        let (_dir, s) = store();
        let a = s.create(Some("a".into())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b = s.create(Some("b".into())).await.unwrap();
        // A directory without metadata must not appear.
        tokio::fs::create_dir(s.base_dir().join("stray"))
            .await
            .unwrap();

        let listed = s.list().await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, s) = store();
        let p = s.create(None).await.unwrap();
        s.delete(&p.id).await.unwrap();
        assert!(s.load(&p.id).await.is_none());
        // Second delete is a no-op.
        s.delete(&p.id).await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_skips_dependencies_and_dotfiles() {
        let (_dir, s) = store();
        let p = s.create(None).await.unwrap();
        tokio::fs::create_dir_all(p.path.join("src")).await.unwrap();
        tokio::fs::create_dir_all(p.path.join("node_modules/x"))
            .await
            .unwrap();
        tokio::fs::write(p.path.join("src/App.tsx"), "export {}")
            .await
            .unwrap();
        tokio::fs::write(p.path.join("node_modules/x/index.js"), "x")
            .await
            .unwrap();
        tokio::fs::write(p.path.join(".env"), "SECRET=1").await.unwrap();

        let snap = s.snapshot_files(&p).await;
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].path, "src/App.tsx");
        assert_eq!(snap[0].language, "typescript");
    }
}
