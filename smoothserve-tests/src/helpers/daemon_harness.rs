//! Test harness that runs the daemon's servers in-process

use smoothserve_daemon::config::ServiceDefinition;
use smoothserve_daemon::errors::Result;
use smoothserve_daemon::registry::ServiceRegistry;
use smoothserve_daemon::server::{self, RunningServer};
use smoothserve_daemon::supervisor::Supervisor;
use smoothserve_protocol::client::Client;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Registry, control plane and proxies, all on 127.0.0.1
pub struct TestDaemonHarness {
    pub registry: Arc<ServiceRegistry>,
    pub control_addr: SocketAddr,
    pub proxy_addrs: Vec<SocketAddr>,
    server: RunningServer,
    stop_rx: mpsc::Receiver<()>,
}

impl TestDaemonHarness {
    /// Start every service and bind the control plane on an ephemeral port
    pub async fn launch(definitions: Vec<ServiceDefinition>) -> Result<Self> {
        let registry = Arc::new(ServiceRegistry::new(definitions));
        registry.start(None).await?;

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let server = server::launch(
            Arc::clone(&registry),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            stop_tx,
        )
        .await?;

        Ok(Self {
            registry,
            control_addr: server.control_addr,
            proxy_addrs: server.proxy_addrs.clone(),
            server,
            stop_rx,
        })
    }

    /// Client for the control plane
    pub fn client(&self) -> Client {
        Client::new(self.control_addr).with_timeout(Duration::from_secs(10))
    }

    pub fn supervisor(&self, name: &str) -> Arc<Supervisor> {
        Arc::clone(self.registry.get(name).expect("service is registered"))
    }

    /// Whether a global stop asked the daemon to exit within `timeout`
    pub async fn shutdown_requested(&mut self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.stop_rx.recv()).await, Ok(Some(())))
    }

    /// Stop every service and close all listeners
    pub async fn shutdown(self) -> Result<()> {
        let result = self.registry.stop(None).await.map(|_| ());
        self.server.shutdown().await;
        result
    }
}
