//! Tests for watched-file triggered restarts:
//! - a burst of writes collapses into one rolling restart
//! - stopping a service before the debounce window ends launches nothing
//! - a watch list naming a missing file leaves the service running unwatched

use smoothserve_daemon::state::InstanceStatus;
use smoothserve_daemon::supervisor::Supervisor;
use smoothserve_tests::helpers::config_builder::TestServiceBuilder;
use smoothserve_tests::helpers::marker_files::MarkerFileHelper;
use smoothserve_tests::helpers::wait_utils::{wait_for_instances, wait_for_restarts};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(15);

fn append(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    writeln!(file, "{}", line).unwrap();
}

fn watched_service(dir: &Path, marker: &MarkerFileHelper) -> TestServiceBuilder {
    let script = marker.write_backend_script("web").unwrap();
    std::fs::write(dir.join("app.conf"), "version=1\n").unwrap();

    TestServiceBuilder::new("web", script)
        .with_instances(19600, 2)
        .with_delay_running(Duration::from_millis(100))
        .with_delay_update(Duration::from_millis(400))
        .with_watch_files(&["app.conf"])
}

#[tokio::test]
async fn test_burst_of_changes_triggers_one_restart() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let supervisor = Supervisor::new(watched_service(temp_dir.path(), &marker).build());

    supervisor.start().await;
    assert!(supervisor.is_watching());
    assert!(marker.wait_for_marker_lines("web", 2, TIMEOUT).await);

    let conf = temp_dir.path().join("app.conf");
    for version in 2..5 {
        append(&conf, &format!("version={}", version));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    wait_for_restarts(&supervisor, 1, TIMEOUT).await.unwrap();

    // Give a stray second timer the chance to fire
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(supervisor.restart_requests(), 1);
    assert_eq!(supervisor.restarts_completed(), 1);
    assert_eq!(marker.count_marker_lines("web"), 4);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_before_debounce_window_launches_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let supervisor = Supervisor::new(watched_service(temp_dir.path(), &marker).build());

    supervisor.start().await;
    assert!(marker.wait_for_marker_lines("web", 2, TIMEOUT).await);

    append(&temp_dir.path().join("app.conf"), "version=2");
    supervisor.stop().await.unwrap();

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(marker.count_marker_lines("web"), 2);
    assert_eq!(supervisor.restarts_completed(), 0);
    for instance in supervisor.instances() {
        assert_eq!(instance.status, InstanceStatus::Stopped);
    }
}

#[tokio::test]
async fn test_missing_watch_file_disables_watching_only() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let script = marker.write_backend_script("web").unwrap();

    let supervisor = Supervisor::new(
        TestServiceBuilder::new("web", script)
            .with_instances(19700, 1)
            .with_watch_files(&["missing.conf"])
            .build(),
    );
    supervisor.start().await;

    assert!(!supervisor.is_watching());
    wait_for_instances(&supervisor, TIMEOUT, |instances| {
        instances[0].status == InstanceStatus::Running
    })
    .await
    .unwrap();

    supervisor.stop().await.unwrap();
}
