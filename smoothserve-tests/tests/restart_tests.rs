//! Rolling restart and lifecycle tests against real processes
//!
//! Backends are shell scripts that record `<port arg> <pid>` in a marker
//! file and then exec `sleep`, so every launch is observable on disk and
//! the recorded pid is the one the supervisor signals.

use smoothserve_daemon::errors::DaemonError;
use smoothserve_daemon::state::InstanceStatus;
use smoothserve_daemon::supervisor::Supervisor;
use smoothserve_tests::helpers::config_builder::TestServiceBuilder;
use smoothserve_tests::helpers::marker_files::MarkerFileHelper;
use smoothserve_tests::helpers::wait_utils::{wait_for_instances, wait_for_restarts};
use std::time::Duration;
use tempfile::TempDir;

const TIMEOUT: Duration = Duration::from_secs(15);

fn all_running(instances: &[smoothserve_daemon::state::Instance]) -> bool {
    instances
        .iter()
        .all(|i| i.status == InstanceStatus::Running && i.pid.is_some())
}

#[tokio::test]
async fn test_rolling_restart_replaces_every_instance_in_slot_order() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let script = marker.write_backend_script("web").unwrap();

    let supervisor = Supervisor::new(
        TestServiceBuilder::new("web", &script)
            .with_instances(19000, 3)
            .with_delay_running(Duration::from_millis(200))
            .build(),
    );
    supervisor.start().await;

    assert!(marker.wait_for_marker_lines("web", 3, TIMEOUT).await);
    let before = wait_for_instances(&supervisor, TIMEOUT, all_running).await.unwrap();

    supervisor.restart_one_by_one();

    // Never more than one slot out of rotation while the chain runs
    let started = std::time::Instant::now();
    let mut worst_offline = 0;
    while supervisor.restarts_completed() == 0 {
        assert!(started.elapsed() < TIMEOUT, "rolling restart did not complete");
        let offline = supervisor
            .instances()
            .iter()
            .filter(|i| !i.is_eligible())
            .count();
        worst_offline = worst_offline.max(offline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(worst_offline <= 1, "{} slots were offline at once", worst_offline);

    let after = supervisor.instances();
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.port, new.port, "slot port must be stable");
        assert_eq!(new.status, InstanceStatus::Running);
        assert_ne!(old.pid, new.pid, "instance on {} was not replaced", new.port);
        assert!(!new.needs_restart);
    }

    let launches = marker.launches("web");
    assert_eq!(launches.len(), 6);
    let relaunched: Vec<&str> = launches[3..].iter().map(|(arg, _)| arg.as_str()).collect();
    assert_eq!(relaunched, vec!["-port=19000", "-port=19001", "-port=19002"]);
    for (instance, (_, pid)) in after.iter().zip(&launches[3..]) {
        assert_eq!(instance.pid, Some(*pid));
    }

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_custom_port_arg_is_passed_to_instances() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let script = marker.write_backend_script("api").unwrap();

    let supervisor = Supervisor::new(
        TestServiceBuilder::new("api", &script)
            .with_instances(19100, 1)
            .with_port_arg("--listen=127.0.0.1:{port}")
            .build(),
    );
    supervisor.start().await;

    assert!(marker.wait_for_marker_lines("api", 1, TIMEOUT).await);
    assert_eq!(marker.launches("api")[0].0, "--listen=127.0.0.1:19100");

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_waits_for_every_instance_then_start_relaunches() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let script = marker.write_backend_script("web").unwrap();

    let supervisor = Supervisor::new(
        TestServiceBuilder::new("web", &script)
            .with_instances(19200, 2)
            .with_delay_running(Duration::from_millis(100))
            .build(),
    );
    supervisor.start().await;
    wait_for_instances(&supervisor, TIMEOUT, all_running).await.unwrap();

    supervisor.stop().await.unwrap();

    // Stop returns only after every exit was reported
    for instance in supervisor.instances() {
        assert_eq!(instance.status, InstanceStatus::Stopped);
        assert_eq!(instance.pid, None);
    }
    assert!(matches!(
        supervisor.select_instance(),
        Err(DaemonError::NoInstanceAvailable(_))
    ));

    // A second stop has nothing left to do
    supervisor.stop().await.unwrap();

    supervisor.start().await;
    let instances = wait_for_instances(&supervisor, TIMEOUT, all_running).await.unwrap();
    assert_eq!(instances[0].port, 19200);
    assert_eq!(instances[1].port, 19201);
    assert_eq!(marker.count_marker_lines("web"), 4);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_unexpected_exit_is_not_relaunched() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let script = marker.write_exiting_script("flaky", 3).unwrap();

    let supervisor = Supervisor::new(
        TestServiceBuilder::new("flaky", &script)
            .with_instances(19300, 1)
            .build(),
    );
    supervisor.start().await;

    wait_for_instances(&supervisor, TIMEOUT, |instances| {
        instances[0].status == InstanceStatus::Stopped
    })
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(marker.count_marker_lines("flaky"), 1);
    assert!(matches!(
        supervisor.select_instance(),
        Err(DaemonError::NoInstanceAvailable(_))
    ));
}

#[tokio::test]
async fn test_missing_executable_leaves_slot_unstarted() {
    let temp_dir = TempDir::new().unwrap();
    let supervisor = Supervisor::new(
        TestServiceBuilder::new("ghost", temp_dir.path().join("does-not-exist"))
            .with_instances(19400, 2)
            .build(),
    );

    supervisor.start().await;

    for instance in supervisor.instances() {
        assert_eq!(instance.status, InstanceStatus::None);
        assert_eq!(instance.pid, None);
    }
    assert!(supervisor.select_instance().is_err());

    // Nothing to replace, nothing to stop
    supervisor.restart_one_by_one();
    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.restarts_completed(), 0);
}

#[tokio::test]
async fn test_restart_requested_twice_completes() {
    let temp_dir = TempDir::new().unwrap();
    let marker = MarkerFileHelper::new(temp_dir.path());
    let script = marker.write_backend_script("web").unwrap();

    let supervisor = Supervisor::new(
        TestServiceBuilder::new("web", &script)
            .with_instances(19500, 2)
            .with_delay_running(Duration::from_millis(150))
            .build(),
    );
    supervisor.start().await;
    wait_for_instances(&supervisor, TIMEOUT, all_running).await.unwrap();

    supervisor.restart_one_by_one();
    supervisor.restart_one_by_one();

    wait_for_restarts(&supervisor, 1, TIMEOUT).await.unwrap();
    wait_for_instances(&supervisor, TIMEOUT, |instances| {
        all_running(instances) && instances.iter().all(|i| !i.needs_restart)
    })
    .await
    .unwrap();

    assert_eq!(supervisor.restart_requests(), 2);
    // Each slot is relaunched once or twice, never in parallel with the other
    let launches = marker.count_marker_lines("web");
    assert!((4..=6).contains(&launches), "unexpected launch count {}", launches);

    supervisor.stop().await.unwrap();
}
