use std::path::PathBuf;

pub mod config;
pub mod control;
pub mod errors;
pub mod process;
pub mod proxy;
pub mod registry;
pub mod selector;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod watcher;

const GLOBAL_STATE_DIR: &str = ".smoothserve";

/// Overrides the state directory, mainly for tests
pub const STATE_DIR_ENV: &str = "SMOOTHSERVE_STATE_DIR";

pub struct Daemon;

impl Daemon {
    /// Directory holding the PID file. `None` if no home directory is known
    /// and no override is set.
    pub fn global_state_dir() -> Option<PathBuf> {
        if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
            return Some(PathBuf::from(dir));
        }
        dirs::home_dir().map(|home| home.join(GLOBAL_STATE_DIR))
    }

    pub fn get_pid_file() -> Option<PathBuf> {
        Self::global_state_dir().map(|dir| dir.join("smoothserve.pid"))
    }
}
