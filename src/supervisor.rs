// SPDX-License-Identifier: MIT
//! Dev-server process supervisor.
//!
//! Owns the table of live dev-server child processes, one per project id.
//! `start` is an idempotent restart; readiness is an explicit three-way
//! race between the server's output marker, a timeout (optimistic success —
//! slow dev servers are common, indefinite blocking is worse than an
//! occasionally premature URL), and process exit (failure).
//!
//! Concurrent operations on the same project id are not serialized here;
//! callers own that contract, one in-flight operation per id.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::config::CommandsConfig;
use crate::error::HostError;
use crate::ports::PortAllocator;
use crate::project::{Project, ProjectStatus, ProjectStore};

/// Output substrings that mean "the dev server accepts connections".
/// Vite prints `Local:`/`Network:` URLs; plain node servers tend to print a
/// localhost URL.
const READY_MARKERS: &[&str] = &["Local:", "localhost", "Network:"];

/// Result of a start attempt. A failure here is result data for the caller,
/// not an error: the project record already carries the state.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub success: bool,
    pub preview_url: Option<String>,
    pub output: String,
    pub error: Option<String>,
}

/// Bookkeeping entry for one live child. Dropping the kill sender is how
/// the owner task learns it should reap the process. The generation stamp
/// ties the entry to exactly one spawned child, so a reaper waking up late
/// can tell whether a restart already replaced it.
struct TrackedProcess {
    pid: Option<u32>,
    port: u16,
    generation: u64,
    kill: oneshot::Sender<()>,
}

enum Readiness {
    Marker,
    Timeout,
    Exited(Option<i32>),
}

pub struct Supervisor {
    store: Arc<ProjectStore>,
    allocator: PortAllocator,
    commands: CommandsConfig,
    ready_timeout: Duration,
    /// Explicit ownership table: project id → live process. Never shared
    /// outside this struct.
    table: Mutex<HashMap<String, TrackedProcess>>,
    next_generation: AtomicU64,
}

impl Supervisor {
    pub fn new(
        store: Arc<ProjectStore>,
        allocator: PortAllocator,
        commands: CommandsConfig,
        ready_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            allocator,
            commands,
            ready_timeout,
            table: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Number of tracked live processes (diagnostics and tests).
    pub async fn tracked_count(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Start (or restart) the project's dev server and wait for readiness.
    pub async fn start(self: &Arc<Self>, project: &mut Project) -> Result<StartOutcome> {
        // Idempotent restart: at most one process per project.
        self.kill_tracked(&project.id).await;

        let port = self.allocator.assign(&project.id).await;

        // Pre-register Running with the port so the preview proxy can show
        // its holding page against a known target while the server boots.
        project.preview_port = Some(port);
        project.error = None;
        self.store.set_status(project, ProjectStatus::Running).await?;

        let command = self.commands.dev_server.replace("{port}", &port.to_string());
        info!(project = %project.id, port, %command, "starting dev server");

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&project.path)
            .env("CI", "true")
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                project.preview_port = None;
                project.error =
                    Some(HostError::ProcessFailure(format!("could not spawn dev server: {e}"))
                        .to_string());
                self.store.set_status(project, ProjectStatus::Error).await?;
                return Ok(StartOutcome {
                    success: false,
                    preview_url: None,
                    output: String::new(),
                    error: project.error.clone(),
                });
            }
        };

        let pid = child.id();
        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        spawn_line_pump(child.stdout.take(), line_tx.clone(), &project.id);
        spawn_line_pump(child.stderr.take(), line_tx, &project.id);

        // Race: readiness marker vs timeout vs early exit.
        let deadline = tokio::time::sleep(self.ready_timeout);
        tokio::pin!(deadline);
        let mut output = String::new();
        let mut pipes_open = true;
        let readiness = loop {
            tokio::select! {
                maybe = line_rx.recv(), if pipes_open => match maybe {
                    Some(line) => {
                        output.push_str(&line);
                        output.push('\n');
                        if READY_MARKERS.iter().any(|m| line.contains(m)) {
                            break Readiness::Marker;
                        }
                    }
                    // Both pipes closed; keep waiting on exit/timeout.
                    None => pipes_open = false,
                },
                status = child.wait() => {
                    break Readiness::Exited(status.ok().and_then(|s| s.code()));
                }
                _ = &mut deadline => break Readiness::Timeout,
            }
        };

        match readiness {
            Readiness::Exited(code) => {
                warn!(project = %project.id, ?code, "dev server exited before readiness");
                project.preview_url = None;
                project.preview_port = None;
                project.error = Some(
                    HostError::ProcessFailure(format!(
                        "dev server exited with code {} before becoming ready",
                        code.map_or_else(|| "?".to_string(), |c| c.to_string())
                    ))
                    .to_string(),
                );
                self.store.set_status(project, ProjectStatus::Error).await?;
                Ok(StartOutcome {
                    success: false,
                    preview_url: None,
                    output,
                    error: project.error.clone(),
                })
            }
            ready @ (Readiness::Marker | Readiness::Timeout) => {
                if matches!(ready, Readiness::Timeout) {
                    debug!(project = %project.id, "no readiness marker within timeout — returning URL optimistically");
                }
                let url = format!("http://localhost:{port}");
                project.preview_url = Some(url.clone());
                self.store.set_status(project, ProjectStatus::Running).await?;
                self.track(project.id.clone(), child, pid, port).await;
                Ok(StartOutcome {
                    success: true,
                    preview_url: Some(url),
                    output,
                    error: None,
                })
            }
        }
    }

    /// Stop the project's dev server, free its port, and return the record
    /// to Idle. A no-op when nothing is running.
    pub async fn stop(&self, project: &mut Project) -> Result<()> {
        self.kill_tracked(&project.id).await;

        // The recorded port may still be held by an orphan from a previous
        // daemon run that the table never saw.
        if let Some(port) = project.preview_port {
            if port > 0 {
                self.allocator.release(port).await;
            }
        }

        project.preview_url = None;
        project.preview_port = None;
        self.store.set_status(project, ProjectStatus::Idle).await
    }

    /// Insert the child into the ownership table and hand it to an owner
    /// task that reaps it on exit or kills it on request.
    async fn track(self: &Arc<Self>, id: String, mut child: Child, pid: Option<u32>, port: u16) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel();
        self.table.lock().await.insert(
            id.clone(),
            TrackedProcess {
                pid,
                port,
                generation,
                kill: kill_tx,
            },
        );

        let sup = Arc::clone(self);
        tokio::spawn(async move {
            let killed = tokio::select! {
                status = child.wait() => {
                    debug!(project = %id, ?status, "dev server exited");
                    false
                }
                _ = kill_rx => true,
            };
            if killed {
                let _ = child.kill().await;
            } else {
                // Unexpected exit after readiness: clear bookkeeping only,
                // no automatic restart. A concurrent `start` may already
                // have replaced the entry with a fresh child by the time
                // this task acquires the lock.
                sup.untrack_if_current(&id, generation).await;
            }
        });
    }

    /// Remove the entry for `id` only while it still describes the child
    /// that `generation` was stamped for.
    async fn untrack_if_current(&self, id: &str, generation: u64) {
        let mut table = self.table.lock().await;
        if table.get(id).is_some_and(|t| t.generation == generation) {
            table.remove(id);
        }
    }

    /// Remove and kill the tracked process for `id`, if any.
    async fn kill_tracked(&self, id: &str) {
        let tracked = self.table.lock().await.remove(id);
        if let Some(tracked) = tracked {
            info!(project = id, pid = ?tracked.pid, port = tracked.port, "stopping tracked dev server");
            // The owner task kills and reaps; if it already exited this is
            // a closed channel, which is fine.
            let _ = tracked.kill.send(());
        }
    }
}

/// Forward one output pipe line-by-line into the shared channel, and keep
/// draining after the readiness phase stops listening so the child never
/// blocks on a full pipe.
fn spawn_line_pump(
    pipe: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>,
    tx: mpsc::Sender<String>,
    project_id: &str,
) {
    let Some(pipe) = pipe else { return };
    let project_id = project_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "dev_server", project = %project_id, "{line}");
            // Closed channel (readiness phase over) fails fast; keep reading.
            let _ = tx.send(line).await;
        }
    });
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_supervisor(dir: &std::path::Path) -> Arc<Supervisor> {
        Supervisor::new(
            Arc::new(ProjectStore::new(dir)),
            PortAllocator::new(45000, 10),
            CommandsConfig::default(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn stale_reaper_leaves_a_replacement_entry_alone() {
        let dir = tempfile::tempdir().unwrap();
        let sup = bare_supervisor(dir.path());

        // Entry as inserted by a restart (generation 7); its kill channel
        // stays open for the duration of the test.
        let (kill_tx, _kill_rx) = oneshot::channel();
        sup.table.lock().await.insert(
            "proj_x".to_string(),
            TrackedProcess {
                pid: None,
                port: 45001,
                generation: 7,
                kill: kill_tx,
            },
        );

        // A reaper waking up for an older child must not touch it.
        sup.untrack_if_current("proj_x", 6).await;
        assert_eq!(sup.tracked_count().await, 1);

        // The matching reaper clears it.
        sup.untrack_if_current("proj_x", 7).await;
        assert_eq!(sup.tracked_count().await, 0);
    }
}
