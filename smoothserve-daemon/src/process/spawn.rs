//! Low-level spawning: build the `Command` and capture output

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::InstanceCommand;
use crate::errors::{DaemonError, Result};

/// Stream an output line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// A launched child plus the tasks draining its output
pub struct DetachedChild {
    pub child: Child,
    stdout_task: Option<JoinHandle<()>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl DetachedChild {
    /// Wait for both output streams to reach end of file, so the last lines
    /// an instance printed are logged before its exit is.
    ///
    /// A process that left a descendant holding the pipes open would never
    /// close them; each stream gets `limit` and is abandoned after that.
    /// Returns whether every stream was read to the end.
    pub async fn finish_output(&mut self, limit: Duration) -> bool {
        let mut complete = true;
        for task in [self.stdout_task.take(), self.stderr_task.take()]
            .into_iter()
            .flatten()
        {
            let abort = task.abort_handle();
            if tokio::time::timeout(limit, task).await.is_err() {
                abort.abort();
                complete = false;
            }
        }
        complete
    }
}

fn build_command(spec: &InstanceCommand) -> Command {
    debug!(
        "Spawning instance command: {:?} {:?} in {:?}",
        spec.program, spec.args, spec.working_dir
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group, so a Ctrl+C aimed at the daemon does not reach
    // instances before the daemon has stopped them itself
    #[cfg(unix)]
    cmd.process_group(0);

    cmd
}

/// Spawn a task that forwards every line of a stream to tracing.
///
/// Lines are emitted as soon as they are read; nothing is buffered
/// on behalf of a slow subscriber.
fn spawn_capture_task(
    stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    service: String,
    port: u16,
    output: OutputStream,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(
                target: "instance",
                service = %service,
                port,
                stream = output.as_str(),
                "{}",
                line
            );
        }
    })
}

/// Spawn an instance detached from the caller, with output forwarding
pub fn spawn_detached(spec: &InstanceCommand) -> Result<DetachedChild> {
    let mut child = build_command(spec)
        .spawn()
        .map_err(|source| DaemonError::ProcessSpawn {
            service: spec.service.clone(),
            port: spec.port,
            source,
        })?;

    let stdout_task = child.stdout.take().map(|stdout| {
        spawn_capture_task(stdout, spec.service.clone(), spec.port, OutputStream::Stdout)
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        spawn_capture_task(stderr, spec.service.clone(), spec.port, OutputStream::Stderr)
    });

    Ok(DetachedChild {
        child,
        stdout_task,
        stderr_task,
    })
}
