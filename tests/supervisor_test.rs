// SPDX-License-Identifier: MIT
// Integration tests for the dev-server supervisor, using plain shell
// commands in place of npm so no toolchain is needed.

use std::sync::Arc;
use std::time::Duration;

use loomd::config::CommandsConfig;
use loomd::ports::PortAllocator;
use loomd::project::{ProjectStatus, ProjectStore};
use loomd::supervisor::Supervisor;

fn commands(dev_server: &str) -> CommandsConfig {
    CommandsConfig {
        dev_server: dev_server.to_string(),
        ..CommandsConfig::default()
    }
}

fn make_supervisor(
    store: Arc<ProjectStore>,
    dev_server: &str,
    ready_timeout: Duration,
) -> Arc<Supervisor> {
    Supervisor::new(
        store,
        PortAllocator::new(43650, 50),
        commands(dev_server),
        ready_timeout,
    )
}

#[tokio::test]
async fn marker_in_output_means_ready() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProjectStore::new(dir.path()));
    let mut project = store.create(None).await.unwrap();

    let sup = make_supervisor(
        Arc::clone(&store),
        "echo 'Local: http://localhost:{port}/' && sleep 30",
        Duration::from_secs(10),
    );

    let outcome = sup.start(&mut project).await.unwrap();
    assert!(outcome.success);
    let url = outcome.preview_url.unwrap();
    assert!(url.starts_with("http://localhost:"));
    assert_eq!(project.preview_url.as_deref(), Some(url.as_str()));
    assert_eq!(project.status, ProjectStatus::Running);
    assert!(outcome.output.contains("Local:"));
    assert_eq!(sup.tracked_count().await, 1);

    sup.stop(&mut project).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Idle);
    assert!(project.preview_url.is_none());
    assert!(project.preview_port.is_none());
    assert_eq!(sup.tracked_count().await, 0);
}

#[tokio::test]
async fn silent_server_succeeds_optimistically_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProjectStore::new(dir.path()));
    let mut project = store.create(None).await.unwrap();

    // No output at all: the readiness race must fall through to the
    // timeout and still hand back a URL.
    let sup = make_supervisor(Arc::clone(&store), "sleep 30", Duration::from_millis(300));

    let outcome = sup.start(&mut project).await.unwrap();
    assert!(outcome.success);
    assert!(outcome.preview_url.is_some());
    assert_eq!(project.status, ProjectStatus::Running);
    assert_eq!(sup.tracked_count().await, 1);

    sup.stop(&mut project).await.unwrap();
}

#[tokio::test]
async fn early_exit_is_a_failure_not_a_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProjectStore::new(dir.path()));
    let mut project = store.create(None).await.unwrap();

    let sup = make_supervisor(
        Arc::clone(&store),
        "echo starting && exit 7",
        Duration::from_secs(10),
    );

    let outcome = sup.start(&mut project).await.unwrap();
    assert!(!outcome.success);
    assert!(outcome.preview_url.is_none());
    let error = outcome.error.unwrap();
    assert!(error.contains("process failure"));
    assert!(error.contains("exited"));
    assert_eq!(project.status, ProjectStatus::Error);
    assert!(project.preview_port.is_none());
    assert_eq!(sup.tracked_count().await, 0);
}

#[tokio::test]
async fn restart_replaces_the_tracked_process() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProjectStore::new(dir.path()));
    let mut project = store.create(None).await.unwrap();

    let sup = make_supervisor(Arc::clone(&store), "sleep 30", Duration::from_millis(200));

    let first = sup.start(&mut project).await.unwrap();
    let second = sup.start(&mut project).await.unwrap();
    assert!(first.success && second.success);
    // Deterministic allocation: the same project lands on the same port.
    assert_eq!(first.preview_url, second.preview_url);
    assert_eq!(sup.tracked_count().await, 1);

    sup.stop(&mut project).await.unwrap();
    assert_eq!(sup.tracked_count().await, 0);
}

#[tokio::test]
async fn crash_after_readiness_is_reaped_and_restart_stays_tracked() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProjectStore::new(dir.path()));
    let mut project = store.create(None).await.unwrap();

    // First launch dies shortly after readiness; every later launch is a
    // long-lived server.
    let sup = make_supervisor(
        Arc::clone(&store),
        "if [ -f relaunched ]; then echo 'Local: ready'; sleep 30; \
         else touch relaunched; echo 'Local: ready'; sleep 0.2; fi",
        Duration::from_secs(10),
    );

    let outcome = sup.start(&mut project).await.unwrap();
    assert!(outcome.success);
    assert_eq!(sup.tracked_count().await, 1);

    // Let the first child die and its reaper clear the entry.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(sup.tracked_count().await, 0);

    // The replacement must survive any stale reaper still winding down.
    let outcome = sup.start(&mut project).await.unwrap();
    assert!(outcome.success);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(sup.tracked_count().await, 1);

    sup.stop(&mut project).await.unwrap();
    assert_eq!(sup.tracked_count().await, 0);
}

#[tokio::test]
async fn stop_without_start_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ProjectStore::new(dir.path()));
    let mut project = store.create(None).await.unwrap();

    let sup = make_supervisor(Arc::clone(&store), "sleep 30", Duration::from_secs(1));
    sup.stop(&mut project).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Idle);
    assert_eq!(sup.tracked_count().await, 0);
}
