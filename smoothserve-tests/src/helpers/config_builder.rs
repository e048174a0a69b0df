//! Programmatic config creation with builder pattern

use serde_yaml::{Mapping, Value};
use smoothserve_daemon::config::{format_duration, ServiceDefinition, DEFAULT_PORT_ARG, DEFAULT_SERVER_IP};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Builder for the main `smoothserve.yaml`
pub struct TestConfigBuilder {
    command_port: u16,
    proxy_addr: Option<String>,
    sub_config_dir: Option<PathBuf>,
    log_level: Option<String>,
    services: Vec<TestServiceBuilder>,
}

impl TestConfigBuilder {
    pub fn new(command_port: u16) -> Self {
        Self {
            command_port,
            proxy_addr: None,
            sub_config_dir: None,
            log_level: None,
            services: Vec::new(),
        }
    }

    pub fn with_proxy_addr(mut self, addr: &str) -> Self {
        self.proxy_addr = Some(addr.to_string());
        self
    }

    pub fn with_sub_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sub_config_dir = Some(dir.into());
        self
    }

    pub fn with_log_level(mut self, level: &str) -> Self {
        self.log_level = Some(level.to_string());
        self
    }

    pub fn add_service(mut self, service: TestServiceBuilder) -> Self {
        self.services.push(service);
        self
    }

    /// Write `smoothserve.yaml` into `dir` plus one file per service in the
    /// service directory, and return the main config path
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let mut root = Mapping::new();
        root.insert("command_port".into(), u64::from(self.command_port).into());
        if let Some(addr) = &self.proxy_addr {
            root.insert("proxy_addr".into(), addr.as_str().into());
        }
        let sub_dir = self
            .sub_config_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("services"));
        root.insert("sub_config_dir".into(), sub_dir.display().to_string().into());
        if let Some(level) = &self.log_level {
            let mut log = Mapping::new();
            log.insert("level".into(), level.as_str().into());
            root.insert("log".into(), Value::Mapping(log));
        }

        let path = dir.join("smoothserve.yaml");
        write_yaml(&path, &Value::Mapping(root))?;

        let services_dir = if sub_dir.is_relative() {
            dir.join(&sub_dir)
        } else {
            sub_dir
        };
        std::fs::create_dir_all(&services_dir)?;
        for service in &self.services {
            service.write_to_dir(&services_dir)?;
        }
        Ok(path)
    }
}

/// Builder for one service, usable both as an in-memory definition and
/// as a per-service YAML file
#[derive(Debug, Clone)]
pub struct TestServiceBuilder {
    name: String,
    server_names: Vec<String>,
    port: u16,
    start_instance_port: u16,
    instance_count: usize,
    executable_path: PathBuf,
    port_arg: Option<String>,
    delay_running_time: Duration,
    delay_update_time: Duration,
    watch_files: Vec<PathBuf>,
    enabled: bool,
}

impl TestServiceBuilder {
    /// A single-instance service named `name`, served as `<name>.local`
    pub fn new(name: &str, executable_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            server_names: vec![format!("{}.local", name)],
            port: 8080,
            start_instance_port: 9000,
            instance_count: 1,
            executable_path: executable_path.into(),
            port_arg: None,
            delay_running_time: Duration::ZERO,
            delay_update_time: Duration::ZERO,
            watch_files: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_server_names(mut self, names: &[&str]) -> Self {
        self.server_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_instances(mut self, start_port: u16, count: usize) -> Self {
        self.start_instance_port = start_port;
        self.instance_count = count;
        self
    }

    pub fn with_port_arg(mut self, template: &str) -> Self {
        self.port_arg = Some(template.to_string());
        self
    }

    pub fn with_delay_running(mut self, delay: Duration) -> Self {
        self.delay_running_time = delay;
        self
    }

    pub fn with_delay_update(mut self, delay: Duration) -> Self {
        self.delay_update_time = delay;
        self
    }

    pub fn with_watch_files(mut self, files: &[&str]) -> Self {
        self.watch_files = files.iter().map(PathBuf::from).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The definition a supervisor is created from
    pub fn build(&self) -> ServiceDefinition {
        ServiceDefinition {
            name: self.name.clone(),
            server_names: self
                .server_names
                .iter()
                .map(|n| n.to_ascii_lowercase())
                .collect::<BTreeSet<_>>(),
            server_ip: DEFAULT_SERVER_IP.to_string(),
            port: self.port,
            start_instance_port: self.start_instance_port,
            instance_count: self.instance_count,
            executable_path: self.executable_path.clone(),
            port_arg: self
                .port_arg
                .clone()
                .unwrap_or_else(|| DEFAULT_PORT_ARG.to_string()),
            auto_restart: false,
            delay_running_time: self.delay_running_time,
            delay_update_time: self.delay_update_time,
            watch_files: self.watch_files.clone(),
        }
    }

    /// Write the service as `<dir>/<name>.yaml`
    pub fn write_to_dir(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let mut doc = Mapping::new();
        doc.insert("name".into(), self.name.as_str().into());
        doc.insert("server_name".into(), self.server_names.join(",").into());
        doc.insert("port".into(), u64::from(self.port).into());
        doc.insert(
            "start_instance_port".into(),
            u64::from(self.start_instance_port).into(),
        );
        doc.insert("instance_count".into(), (self.instance_count as u64).into());
        doc.insert(
            "executable_path".into(),
            self.executable_path.display().to_string().into(),
        );
        if let Some(template) = &self.port_arg {
            doc.insert("port_arg".into(), template.as_str().into());
        }
        doc.insert(
            "delay_running_time".into(),
            format_duration(&self.delay_running_time).into(),
        );
        doc.insert(
            "delay_update_time".into(),
            format_duration(&self.delay_update_time).into(),
        );
        if !self.watch_files.is_empty() {
            let files = self
                .watch_files
                .iter()
                .map(|f| Value::from(f.display().to_string()))
                .collect();
            doc.insert("watch_files".into(), Value::Sequence(files));
        }
        doc.insert("enabled".into(), self.enabled.into());

        let path = dir.join(format!("{}.yaml", self.name));
        write_yaml(&path, &Value::Mapping(doc))?;
        Ok(path)
    }
}

fn write_yaml(path: &Path, value: &Value) -> std::io::Result<()> {
    let contents = serde_yaml::to_string(value).map_err(std::io::Error::other)?;
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests;
