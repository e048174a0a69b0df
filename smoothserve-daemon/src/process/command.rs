//! Command specification for launching one instance

use std::path::PathBuf;

use crate::config::ServiceDefinition;

/// Everything needed to launch one instance of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceCommand {
    /// Owning service, used for log context and errors
    pub service: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Port the instance was told to bind
    pub port: u16,
}

impl InstanceCommand {
    /// Build the command for the instance bound to `port`
    pub fn for_port(definition: &ServiceDefinition, port: u16) -> Self {
        Self {
            service: definition.name.clone(),
            program: definition.executable_path.clone(),
            args: vec![definition.port_argument(port)],
            working_dir: definition.working_dir(),
            port,
        }
    }
}
