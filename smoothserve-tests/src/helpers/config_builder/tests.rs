use super::*;
use smoothserve_daemon::config::SmoothServeConfig;
use tempfile::TempDir;

#[test]
fn test_written_config_loads_back() {
    let temp_dir = TempDir::new().unwrap();
    let service = TestServiceBuilder::new("web", "/usr/bin/true")
        .with_server_names(&["Web.Local", "www.web.local"])
        .with_instances(9100, 3)
        .with_delay_running(Duration::from_millis(1500))
        .with_watch_files(&["app.conf"]);

    let path = TestConfigBuilder::new(7000)
        .add_service(service.clone())
        .write_to_dir(temp_dir.path())
        .unwrap();

    let config = SmoothServeConfig::load(&path).unwrap();
    assert_eq!(config.command_port, 7000);

    let services = config.load_services().unwrap();
    assert_eq!(services, vec![service.build()]);
}

#[test]
fn test_disabled_service_is_not_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let path = TestConfigBuilder::new(7001)
        .add_service(TestServiceBuilder::new("off", "/usr/bin/true").disabled())
        .write_to_dir(temp_dir.path())
        .unwrap();

    let config = SmoothServeConfig::load(&path).unwrap();
    assert!(config.load_services().unwrap().is_empty());
}
