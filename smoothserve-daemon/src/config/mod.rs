//! Configuration module for the smoothserve daemon
//!
//! This module provides:
//! - `SmoothServeConfig` - Main configuration file (control plane, service directory, logging)
//! - `ServiceFile` - One raw per-service YAML document
//! - `ServiceDefinition` - A validated, fully-resolved service handed to a supervisor

mod duration;

pub use duration::{deserialize_seconds, format_duration, parse_duration};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::{DaemonError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "./smoothserve.yaml";
pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_PORT_ARG: &str = "-port={port}";
const PORT_PLACEHOLDER: &str = "{port}";

/// Maximum config file size (10MB) to prevent OOM from accidentally large files
const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

fn default_proxy_addr() -> String {
    DEFAULT_SERVER_IP.to_string()
}

fn default_sub_config_dir() -> PathBuf {
    PathBuf::from("./services")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging section of the main config
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Default tracing filter, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Root configuration file (`smoothserve.yaml`)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SmoothServeConfig {
    /// Port the control plane listens on
    pub command_port: u16,
    /// Address the control plane binds and the CLI dials
    #[serde(default = "default_proxy_addr")]
    pub proxy_addr: String,
    /// Directory holding one `*.yaml` file per service
    #[serde(default = "default_sub_config_dir")]
    pub sub_config_dir: PathBuf,
    #[serde(default)]
    pub log: LogConfig,
}

impl SmoothServeConfig {
    /// Load the main config file. A relative `sub_config_dir` is resolved
    /// against the directory containing the config file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: SmoothServeConfig = read_yaml(path)?;

        if config.command_port == 0 {
            return Err(DaemonError::Config(format!(
                "'{}' must set a non-zero command_port",
                path.display()
            )));
        }

        if config.sub_config_dir.is_relative() {
            let base = path.parent().unwrap_or(Path::new("."));
            config.sub_config_dir = base.join(&config.sub_config_dir);
        }

        Ok(config)
    }

    /// Resolve the control plane address
    pub fn control_addr(&self) -> Result<SocketAddr> {
        (self.proxy_addr.as_str(), self.command_port)
            .to_socket_addrs()
            .map_err(|e| {
                DaemonError::Config(format!(
                    "Invalid proxy_addr '{}': {}",
                    self.proxy_addr, e
                ))
            })?
            .next()
            .ok_or_else(|| {
                DaemonError::Config(format!(
                    "proxy_addr '{}' did not resolve to any address",
                    self.proxy_addr
                ))
            })
    }

    /// Load every enabled service from `sub_config_dir`
    pub fn load_services(&self) -> Result<Vec<ServiceDefinition>> {
        load_service_dir(&self.sub_config_dir)
    }
}

/// One per-service YAML document, as written by the operator
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceFile {
    pub name: String,
    /// Comma-separated virtual host names
    #[serde(default)]
    pub server_name: String,
    #[serde(default)]
    pub server_ip: Option<String>,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub start_instance_port: u16,
    #[serde(default)]
    pub instance_count: usize,
    pub executable_path: PathBuf,
    /// Argument template carrying the instance port
    #[serde(default)]
    pub port_arg: Option<String>,
    /// Parsed but not consulted by the restart protocol
    #[serde(default)]
    pub auto_restart: bool,
    /// Warm-up wait after a (re)spawn before the instance takes traffic
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub delay_running_time: Duration,
    /// Debounce window for file-change triggered restarts
    #[serde(default, deserialize_with = "deserialize_seconds")]
    pub delay_update_time: Duration,
    /// Paths relative to the executable's directory
    #[serde(default)]
    pub watch_files: Vec<PathBuf>,
    #[serde(default)]
    pub enabled: bool,
}

/// Fully-resolved settings for one supervised service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub server_names: BTreeSet<String>,
    pub server_ip: String,
    pub port: u16,
    pub start_instance_port: u16,
    pub instance_count: usize,
    pub executable_path: PathBuf,
    pub port_arg: String,
    pub auto_restart: bool,
    pub delay_running_time: Duration,
    pub delay_update_time: Duration,
    pub watch_files: Vec<PathBuf>,
}

impl ServiceDefinition {
    /// Validate a raw service file and apply defaults. A relative executable
    /// path is resolved against `base_dir`.
    pub fn resolve(file: ServiceFile, base_dir: &Path) -> Result<Self> {
        let name = file.name.trim().to_string();
        if name.is_empty() {
            return Err(DaemonError::Config("service name is empty".to_string()));
        }

        let missing = |field: &str| {
            DaemonError::Config(format!("service '{}' is missing required field '{}'", name, field))
        };

        if file.port == 0 {
            return Err(missing("port"));
        }
        let server_names = split_server_names(&file.server_name);
        if server_names.is_empty() {
            return Err(missing("server_name"));
        }
        if file.instance_count == 0 {
            return Err(missing("instance_count"));
        }
        if file.start_instance_port == 0 {
            return Err(missing("start_instance_port"));
        }
        let last_port = file.start_instance_port as usize + file.instance_count - 1;
        if last_port > u16::MAX as usize {
            return Err(DaemonError::Config(format!(
                "service '{}': {} instances starting at port {} exceed the port range",
                name, file.instance_count, file.start_instance_port
            )));
        }
        if file.executable_path.as_os_str().is_empty() {
            return Err(missing("executable_path"));
        }

        let port_arg = file.port_arg.unwrap_or_else(|| DEFAULT_PORT_ARG.to_string());
        if !port_arg.contains(PORT_PLACEHOLDER) {
            return Err(DaemonError::Config(format!(
                "service '{}': port_arg '{}' must contain {}",
                name, port_arg, PORT_PLACEHOLDER
            )));
        }

        let server_ip = file
            .server_ip
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_IP.to_string());

        let executable_path = if file.executable_path.is_relative() {
            base_dir.join(&file.executable_path)
        } else {
            file.executable_path
        };

        Ok(Self {
            name,
            server_names,
            server_ip,
            port: file.port,
            start_instance_port: file.start_instance_port,
            instance_count: file.instance_count,
            executable_path,
            port_arg,
            auto_restart: file.auto_restart,
            delay_running_time: file.delay_running_time,
            delay_update_time: file.delay_update_time,
            watch_files: file.watch_files,
        })
    }

    /// Port permanently owned by `slot`
    pub fn instance_port(&self, slot: usize) -> u16 {
        self.start_instance_port + slot as u16
    }

    /// Directory the executable lives in; instances run from here
    pub fn working_dir(&self) -> PathBuf {
        self.executable_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Watched files resolved against the executable's directory
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        let root = self.working_dir();
        self.watch_files.iter().map(|p| root.join(p)).collect()
    }

    /// The argument passed to an instance to tell it which port to bind
    pub fn port_argument(&self, port: u16) -> String {
        self.port_arg.replace(PORT_PLACEHOLDER, &port.to_string())
    }

    /// `host:port` of the backend for an instance port
    pub fn backend_authority(&self, port: u16) -> String {
        format!("{}:{}", self.server_ip, port)
    }
}

/// Split a comma-separated host list into normalized, de-duplicated names
pub fn split_server_names(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Load every `*.yaml`/`*.yml` file in `dir` as one service.
///
/// Files that fail to parse or validate, disabled services and duplicate
/// names are logged and skipped; only an unreadable directory is an error.
pub fn load_service_dir(dir: &Path) -> Result<Vec<ServiceDefinition>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DaemonError::ConfigNotFound(dir.to_path_buf())
        } else {
            DaemonError::Io(e)
        }
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();

    let mut seen = HashSet::new();
    let mut services = Vec::new();

    for file in files {
        let raw: ServiceFile = match read_yaml(&file) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping service config {:?}: {}", file, e);
                continue;
            }
        };

        if !raw.enabled {
            info!("Service '{}' is disabled, skipping {:?}", raw.name, file);
            continue;
        }

        let definition = match ServiceDefinition::resolve(raw, dir) {
            Ok(definition) => definition,
            Err(e) => {
                warn!("Skipping service config {:?}: {}", file, e);
                continue;
            }
        };

        if !seen.insert(definition.name.clone()) {
            warn!(
                "Duplicate service name '{}' in {:?}, skipping",
                definition.name, file
            );
            continue;
        }

        services.push(definition);
    }

    Ok(services)
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DaemonError::ConfigNotFound(path.to_path_buf())
        } else {
            DaemonError::Io(e)
        }
    })?;
    if metadata.len() > MAX_CONFIG_FILE_SIZE {
        return Err(DaemonError::Config(format!(
            "Config file '{}' is too large ({} bytes, max {} bytes)",
            path.display(),
            metadata.len(),
            MAX_CONFIG_FILE_SIZE
        )));
    }

    let contents = std::fs::read_to_string(path)?;
    let deserializer = serde_yaml::Deserializer::from_str(&contents);
    serde_path_to_error::deserialize(deserializer).map_err(|source| DaemonError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests;
