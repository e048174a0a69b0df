use crate::errors::{CliError, Result};
use smoothserve_daemon::config::SmoothServeConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAMES: [&str; 2] = ["smoothserve.yaml", "smoothserve.yml"];

pub struct Config {}

impl Config {
    /// Find the smoothserve configuration file in the current or parent directories
    pub fn find_config_file(start_dir: &Path) -> Option<PathBuf> {
        let mut current = start_dir.to_path_buf();
        loop {
            for name in CONFIG_FILE_NAMES {
                let candidate = current.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Resolve config path from CLI option or search from the current directory
    pub fn resolve_config_path(file: &Option<String>) -> Result<PathBuf> {
        match file {
            Some(path) => Ok(PathBuf::from(path)),
            None => {
                let cwd = std::env::current_dir().map_err(CliError::CurrentDir)?;
                Config::find_config_file(&cwd)
                    .ok_or(CliError::ConfigNotFound { searched_from: cwd })
            }
        }
    }

    /// Address of the daemon's control plane, as configured in `path`
    pub fn control_addr(path: &Path) -> Result<SocketAddr> {
        let config = SmoothServeConfig::load(path).map_err(|source| CliError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;
        config.control_addr().map_err(|source| CliError::ControlAddress {
            path: path.to_path_buf(),
            source,
        })
    }
}
