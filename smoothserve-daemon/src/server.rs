//! Listener assembly: one proxy listener per public port plus the control
//! plane, all stopped together.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::control;
use crate::errors::{DaemonError, Result};
use crate::proxy::{self, VirtualHosts};
use crate::registry::ServiceRegistry;

/// Handles of every listener the daemon serves
pub struct RunningServer {
    pub control_addr: SocketAddr,
    /// Proxy listeners that bound successfully
    pub proxy_addrs: Vec<SocketAddr>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        debug!("All listeners closed");
    }
}

pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::Bind { addr, source })
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

fn serve_proxy(listener: TcpListener, hosts: VirtualHosts, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
    let app = proxy::router(hosts).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
            .await
        {
            error!("Proxy listener failed: {}", e);
        }
    })
}

/// Bind the control plane and every proxy listener and start serving.
///
/// The control plane must bind; a proxy port that cannot be bound is
/// logged and skipped so the remaining services keep serving.
pub async fn launch(
    registry: Arc<ServiceRegistry>,
    control_addr: SocketAddr,
    proxy_ip: IpAddr,
    stop_tx: mpsc::Sender<()>,
) -> Result<RunningServer> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let control_listener = bind(control_addr).await?;
    let control_addr = control_listener.local_addr()?;
    let control_app = control::router(Arc::clone(&registry), stop_tx);
    let control_shutdown = shutdown_rx.clone();
    let mut tasks = vec![tokio::spawn(async move {
        if let Err(e) = axum::serve(control_listener, control_app)
            .with_graceful_shutdown(wait_for_shutdown(control_shutdown))
            .await
        {
            error!("Control plane failed: {}", e);
        }
    })];
    info!("Control plane listening on http://{}", control_addr);

    let listeners: BTreeMap<SocketAddr, VirtualHosts> = proxy::listeners(&registry, proxy_ip);
    let mut proxy_addrs = Vec::with_capacity(listeners.len());
    for (addr, hosts) in listeners {
        match bind(addr).await {
            Ok(listener) => {
                info!("Proxy listening on http://{} for {} hosts", addr, hosts.len());
                proxy_addrs.push(addr);
                tasks.push(serve_proxy(listener, hosts, shutdown_rx.clone()));
            }
            Err(e) => error!("{}; services on this port are unreachable", e),
        }
    }

    Ok(RunningServer {
        control_addr,
        proxy_addrs,
        shutdown_tx,
        tasks,
    })
}
