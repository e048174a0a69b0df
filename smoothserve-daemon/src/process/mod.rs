//! Process management for service instances
//!
//! This module provides:
//! - `InstanceCommand` - What to launch for one slot
//! - `spawn_instance` - Launch an instance, forward its output, report its exit
//! - `terminate` - Ask an instance to shut down gracefully
//! - `Launcher` - The seam the supervisor spawns and signals through

mod command;
mod spawn;

pub use command::InstanceCommand;
pub use spawn::{spawn_detached, DetachedChild, OutputStream};

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::{DaemonError, Result};

/// How long output may keep flowing after an instance exited
const OUTPUT_DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Message for process exit events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExitEvent {
    pub pid: u32,
    pub port: u16,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/// A freshly spawned instance whose exit is not yet reported.
///
/// The exit monitor holds its report until `start_monitoring` is called, so
/// the caller can record the pid before an early exit could be delivered.
/// Dropping the value releases the monitor too.
#[derive(Debug)]
pub struct SpawnedInstance {
    pub pid: u32,
    pub port: u16,
    release_tx: oneshot::Sender<()>,
}

impl SpawnedInstance {
    /// Pair a pid with the receiver its monitor should wait on before
    /// reporting an exit
    pub fn new(pid: u32, port: u16) -> (Self, oneshot::Receiver<()>) {
        let (release_tx, release_rx) = oneshot::channel();
        (
            Self {
                pid,
                port,
                release_tx,
            },
            release_rx,
        )
    }

    pub fn start_monitoring(self) {
        let _ = self.release_tx.send(());
    }
}

/// Spawn one instance and attach an exit monitor that reports to `exit_tx`
pub fn spawn_instance(
    spec: &InstanceCommand,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
) -> Result<SpawnedInstance> {
    info!(
        "Starting instance of {} on port {}: {:?} {:?}",
        spec.service, spec.port, spec.program, spec.args
    );

    let detached = spawn_detached(spec)?;

    let Some(pid) = detached.child.id() else {
        return Err(DaemonError::ProcessSpawn {
            service: spec.service.clone(),
            port: spec.port,
            source: std::io::Error::other("process exited before its pid could be read"),
        });
    };
    debug!("Instance of {} spawned with PID {}", spec.service, pid);

    let (spawned, release_rx) = SpawnedInstance::new(pid, spec.port);
    let service = spec.service.clone();
    let port = spec.port;

    tokio::spawn(async move {
        monitor_process(service, pid, port, detached, release_rx, exit_tx).await;
    });

    Ok(spawned)
}

/// Wait for the process to exit and report it. Lives as long as the instance.
async fn monitor_process(
    service: String,
    pid: u32,
    port: u16,
    mut detached: DetachedChild,
    release_rx: oneshot::Receiver<()>,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
) {
    let _ = release_rx.await;

    let (exit_code, signal) = match detached.child.wait().await {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            warn!("Error waiting for instance {} of {}: {}", pid, service, e);
            (None, None)
        }
    };

    if !detached.finish_output(OUTPUT_DRAIN_LIMIT).await {
        debug!(
            "Output of instance {} of {} still open after exit, no longer reading it",
            pid, service
        );
    }

    info!(
        "Instance {} of {} on port {} exited (code {:?}, signal {:?})",
        pid, service, port, exit_code, signal
    );

    let event = ProcessExitEvent {
        pid,
        port,
        exit_code,
        signal,
    };
    if exit_tx.send(event).await.is_err() {
        debug!("Exit event channel closed for {}", service);
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// Send SIGTERM to an instance. There is no escalation to SIGKILL.
pub fn terminate(service: &str, pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    debug!("Sending SIGTERM to instance {} of {}", pid, service);

    let signal_error = |source| DaemonError::ProcessSignal {
        service: service.to_string(),
        pid,
        source,
    };

    let raw = i32::try_from(pid).map_err(|_| signal_error(nix::Error::EINVAL))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(signal_error)
}

/// How a supervisor starts and stops instance processes
pub trait Launcher: Send + Sync + 'static {
    fn spawn(
        &self,
        command: &InstanceCommand,
        exit_tx: mpsc::Sender<ProcessExitEvent>,
    ) -> Result<SpawnedInstance>;

    fn terminate(&self, service: &str, pid: u32) -> Result<()>;
}

/// Launches real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn spawn(
        &self,
        command: &InstanceCommand,
        exit_tx: mpsc::Sender<ProcessExitEvent>,
    ) -> Result<SpawnedInstance> {
        spawn_instance(command, exit_tx)
    }

    fn terminate(&self, service: &str, pid: u32) -> Result<()> {
        terminate(service, pid)
    }
}
