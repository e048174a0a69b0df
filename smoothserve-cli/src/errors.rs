use smoothserve_daemon::errors::DaemonError;
use smoothserve_protocol::errors::ClientError;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("No smoothserve.yaml or smoothserve.yml in {} or any parent directory", searched_from.display())]
    ConfigNotFound { searched_from: PathBuf },

    #[error("Cannot read the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),

    #[error("Cannot load {}: {source}", path.display())]
    ConfigLoad {
        path: PathBuf,
        #[source]
        source: DaemonError,
    },

    #[error("No usable control address in {}: {source}", path.display())]
    ControlAddress {
        path: PathBuf,
        #[source]
        source: DaemonError,
    },

    #[error("Cannot find the {0} binary next to this executable or on PATH")]
    DaemonBinaryNotFound(&'static str),

    #[error("Failed to launch daemon {}: {source}", path.display())]
    DaemonLaunch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Daemon was launched but is not answering on {0}")]
    DaemonNotReady(SocketAddr),

    #[error("Daemon on {0} did not exit after stopping all services")]
    DaemonStillRunning(SocketAddr),

    #[error("Request to daemon failed: {0}")]
    Request(#[from] ClientError),
}

pub type Result<T> = std::result::Result<T, CliError>;
