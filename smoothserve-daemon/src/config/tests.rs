use super::*;
use std::time::Duration;
use tempfile::TempDir;

fn raw_service(yaml: &str) -> ServiceFile {
    serde_yaml::from_str(yaml).unwrap()
}

const API_YAML: &str = r#"
name: api
server_name: "Api.Local, api.example.com ,"
port: 8080
start_instance_port: 9001
instance_count: 3
executable_path: bin/api
delay_running_time: 2
delay_update_time: "500ms"
watch_files: [api, conf/app.toml]
enabled: true
"#;

#[test]
fn test_parse_duration() {
    assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
    assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
    assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
    assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
}

#[test]
fn test_parse_duration_invalid() {
    assert!(parse_duration("").is_err());
    assert!(parse_duration("abc").is_err());
    assert!(parse_duration("5y").is_err());
}

#[test]
fn test_format_duration() {
    assert_eq!(format_duration(&Duration::ZERO), "0s");
    assert_eq!(format_duration(&Duration::from_millis(1500)), "1500ms");
    assert_eq!(format_duration(&Duration::from_secs(3)), "3s");
    assert_eq!(format_duration(&Duration::from_secs(120)), "2m");
}

#[test]
fn test_delays_accept_integers_and_strings() {
    let raw = raw_service(API_YAML);
    assert_eq!(raw.delay_running_time, Duration::from_secs(2));
    assert_eq!(raw.delay_update_time, Duration::from_millis(500));
}

#[test]
fn test_resolve_applies_defaults() {
    let definition = ServiceDefinition::resolve(raw_service(API_YAML), Path::new("/srv")).unwrap();

    assert_eq!(definition.server_ip, DEFAULT_SERVER_IP);
    assert_eq!(definition.port_arg, DEFAULT_PORT_ARG);
    assert_eq!(definition.executable_path, PathBuf::from("/srv/bin/api"));
    assert_eq!(definition.working_dir(), PathBuf::from("/srv/bin"));
    assert!(!definition.auto_restart);
}

#[test]
fn test_server_names_are_split_and_normalized() {
    let definition = ServiceDefinition::resolve(raw_service(API_YAML), Path::new("/srv")).unwrap();
    let names: Vec<&str> = definition.server_names.iter().map(String::as_str).collect();
    assert_eq!(names, vec!["api.example.com", "api.local"]);
}

#[test]
fn test_instance_ports_are_slot_offsets() {
    let definition = ServiceDefinition::resolve(raw_service(API_YAML), Path::new("/srv")).unwrap();
    assert_eq!(definition.instance_port(0), 9001);
    assert_eq!(definition.instance_port(2), 9003);
    assert_eq!(definition.port_argument(9002), "-port=9002");
    assert_eq!(definition.backend_authority(9002), "127.0.0.1:9002");
}

#[test]
fn test_watch_paths_resolve_against_executable_dir() {
    let definition = ServiceDefinition::resolve(raw_service(API_YAML), Path::new("/srv")).unwrap();
    assert_eq!(
        definition.watch_paths(),
        vec![
            PathBuf::from("/srv/bin/api"),
            PathBuf::from("/srv/bin/conf/app.toml")
        ]
    );
}

#[test]
fn test_resolve_rejects_missing_required_fields() {
    for field in ["port", "server_name", "instance_count"] {
        let yaml: String = API_YAML
            .lines()
            .filter(|line| !line.starts_with(&format!("{}:", field)))
            .collect::<Vec<_>>()
            .join("\n");
        let err = ServiceDefinition::resolve(raw_service(&yaml), Path::new("/srv")).unwrap_err();
        assert!(
            err.to_string().contains(field),
            "expected error about {}, got: {}",
            field,
            err
        );
    }
}

#[test]
fn test_resolve_rejects_port_arg_without_placeholder() {
    let yaml = format!("{}port_arg: \"--listen\"\n", API_YAML);
    assert!(ServiceDefinition::resolve(raw_service(&yaml), Path::new("/srv")).is_err());
}

#[test]
fn test_resolve_rejects_port_range_overflow() {
    let yaml = API_YAML.replace("start_instance_port: 9001", "start_instance_port: 65535");
    assert!(ServiceDefinition::resolve(raw_service(&yaml), Path::new("/srv")).is_err());
}

#[test]
fn test_unknown_field_is_rejected() {
    let yaml = format!("{}instances: 4\n", API_YAML);
    assert!(serde_yaml::from_str::<ServiceFile>(&yaml).is_err());
}

#[test]
fn test_load_main_config_resolves_sub_dir() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("smoothserve.yaml");
    std::fs::write(&path, "command_port: 9900\nsub_config_dir: conf.d\n").unwrap();

    let config = SmoothServeConfig::load(&path).unwrap();
    assert_eq!(config.command_port, 9900);
    assert_eq!(config.proxy_addr, "127.0.0.1");
    assert_eq!(config.sub_config_dir, temp_dir.path().join("conf.d"));
    assert_eq!(config.log.level, "info");
    assert_eq!(config.control_addr().unwrap().port(), 9900);
}

#[test]
fn test_load_main_config_requires_command_port() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("smoothserve.yaml");
    std::fs::write(&path, "proxy_addr: 127.0.0.1\n").unwrap();

    let err = SmoothServeConfig::load(&path).unwrap_err();
    assert!(matches!(err, DaemonError::ConfigParse { .. }));
}

#[test]
fn test_load_main_config_not_found() {
    let err = SmoothServeConfig::load(Path::new("/nonexistent/smoothserve.yaml")).unwrap_err();
    assert!(matches!(err, DaemonError::ConfigNotFound(_)));
}

#[test]
fn test_load_service_dir_skips_invalid_and_disabled() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path();

    std::fs::write(dir.join("a_api.yaml"), API_YAML).unwrap();
    std::fs::write(dir.join("b_broken.yaml"), "name: [unclosed").unwrap();
    std::fs::write(
        dir.join("c_disabled.yml"),
        API_YAML.replace("name: api", "name: off").replace("enabled: true", "enabled: false"),
    )
    .unwrap();
    std::fs::write(dir.join("d_missing_port.yaml"), API_YAML.replace("port: 8080\n", "")).unwrap();
    std::fs::write(dir.join("e_duplicate.yaml"), API_YAML).unwrap();
    std::fs::write(dir.join("notes.txt"), "not a service").unwrap();

    let services = load_service_dir(dir).unwrap();
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].name, "api");
    assert_eq!(services[0].executable_path, dir.join("bin/api"));
}

#[test]
fn test_load_service_dir_missing_dir() {
    let err = load_service_dir(Path::new("/nonexistent/services")).unwrap_err();
    assert!(matches!(err, DaemonError::ConfigNotFound(_)));
}
