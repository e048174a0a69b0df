//! Name-keyed collection of supervisors, and the "one service or all of
//! them" fan-out the control plane needs.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

use smoothserve_protocol::protocol::ServiceInfo;

use crate::config::ServiceDefinition;
use crate::errors::{DaemonError, Result};
use crate::supervisor::Supervisor;

#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<Supervisor>>,
}

impl ServiceRegistry {
    /// Build a supervisor per definition. Must be called from within a Tokio runtime.
    pub fn new(definitions: Vec<ServiceDefinition>) -> Self {
        Self::from_supervisors(definitions.into_iter().map(Supervisor::new))
    }

    pub fn from_supervisors(supervisors: impl IntoIterator<Item = Arc<Supervisor>>) -> Self {
        let services = supervisors
            .into_iter()
            .map(|supervisor| (supervisor.name().to_string(), supervisor))
            .collect();
        Self { services }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn supervisors(&self) -> impl Iterator<Item = &Arc<Supervisor>> {
        self.services.values()
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Supervisor>> {
        self.services
            .get(name)
            .ok_or_else(|| DaemonError::ServiceNotFound(name.to_string()))
    }

    /// The named service, or every service when `service` is `None`
    pub fn select(&self, service: Option<&str>) -> Result<Vec<Arc<Supervisor>>> {
        match service {
            Some(name) => Ok(vec![Arc::clone(self.get(name)?)]),
            None => Ok(self.services.values().cloned().collect()),
        }
    }

    /// Start the selected services concurrently; returns their names
    pub async fn start(&self, service: Option<&str>) -> Result<Vec<String>> {
        let targets = self.select(service)?;
        let names = targets.iter().map(|s| s.name().to_string()).collect();

        let mut tasks = JoinSet::new();
        for supervisor in targets {
            tasks.spawn(async move { supervisor.start().await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Start task failed: {}", e);
            }
        }

        Ok(names)
    }

    /// Stop the selected services concurrently.
    ///
    /// Every service is given the chance to stop; the first failure is
    /// returned once all have finished.
    pub async fn stop(&self, service: Option<&str>) -> Result<Vec<String>> {
        let targets = self.select(service)?;
        let names = targets.iter().map(|s| s.name().to_string()).collect();

        let mut tasks = JoinSet::new();
        for supervisor in targets {
            tasks.spawn(async move { supervisor.stop().await });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => error!("Stop task failed: {}", e),
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(names),
        }
    }

    /// Begin a rolling restart of the selected services. Returns without
    /// waiting for the restarts to finish.
    pub fn restart(&self, service: Option<&str>) -> Result<Vec<String>> {
        let targets = self.select(service)?;
        for supervisor in &targets {
            info!("Restart requested for {}", supervisor.name());
            supervisor.restart_one_by_one();
        }
        Ok(targets.iter().map(|s| s.name().to_string()).collect())
    }

    pub fn statuses(&self, service: Option<&str>) -> Result<Vec<ServiceInfo>> {
        Ok(self
            .select(service)?
            .iter()
            .map(|supervisor| supervisor.snapshot())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::Duration;

    fn definition(name: &str) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            server_names: BTreeSet::from([format!("{name}.local")]),
            server_ip: "127.0.0.1".to_string(),
            port: 8080,
            start_instance_port: 9000,
            instance_count: 1,
            executable_path: PathBuf::from("/nonexistent/smoothserve-test-binary"),
            port_arg: "-port={port}".to_string(),
            auto_restart: false,
            delay_running_time: Duration::from_millis(10),
            delay_update_time: Duration::from_millis(10),
            watch_files: vec![],
        }
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let registry = ServiceRegistry::new(vec![definition("web")]);

        assert!(matches!(
            registry.restart(Some("api")),
            Err(DaemonError::ServiceNotFound(name)) if name == "api"
        ));
        assert!(registry.statuses(Some("api")).is_err());
        assert!(registry.stop(Some("api")).await.is_err());
    }

    #[tokio::test]
    async fn no_name_selects_everything_in_order() {
        let registry = ServiceRegistry::new(vec![definition("web"), definition("api")]);

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(registry.select(None).unwrap().len(), 2);
        assert_eq!(registry.select(Some("web")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn statuses_cover_selected_services() {
        let registry = ServiceRegistry::new(vec![definition("web"), definition("api")]);

        let all = registry.statuses(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "api");
        assert_eq!(all[0].instances[0].status, "none");

        let one = registry.statuses(Some("web")).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].server_names, vec!["web.local".to_string()]);
    }

    #[tokio::test]
    async fn start_with_unspawnable_binary_still_answers() {
        let registry = ServiceRegistry::new(vec![definition("web")]);

        let started = registry.start(None).await.unwrap();
        assert_eq!(started, vec!["web".to_string()]);
        assert_eq!(registry.statuses(None).unwrap()[0].instances[0].status, "none");

        // Nothing live, so a stop has nothing to wait for
        assert!(registry.stop(None).await.is_ok());
    }
}
