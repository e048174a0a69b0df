use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Failed to spawn instance of {service} on port {port}: {source}")]
    ProcessSpawn {
        service: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid} of service {service}: {source}")]
    ProcessSignal {
        service: String,
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("Service {0} has no instances")]
    NoInstance(String),

    #[error("No available instance for service {0}")]
    NoInstanceAvailable(String),

    #[error("Failed to watch {path} for service {service}: {source}")]
    Watcher {
        service: String,
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Cannot bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
