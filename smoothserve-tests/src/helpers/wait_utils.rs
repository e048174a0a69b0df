//! Async utilities to wait for supervisor state transitions

use smoothserve_daemon::state::Instance;
use smoothserve_daemon::supervisor::Supervisor;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Error type for wait operations
#[derive(Debug)]
pub enum WaitError {
    Timeout,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "Wait operation timed out"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> Result<(), WaitError>
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }
    if condition() { Ok(()) } else { Err(WaitError::Timeout) }
}

/// Wait until the instance table of `supervisor` satisfies `predicate`
pub async fn wait_for_instances<F>(
    supervisor: &Supervisor,
    timeout: Duration,
    mut predicate: F,
) -> Result<Vec<Instance>, WaitError>
where
    F: FnMut(&[Instance]) -> bool,
{
    wait_until(timeout, || predicate(&supervisor.instances())).await?;
    Ok(supervisor.instances())
}

/// Wait until `supervisor` has completed at least `count` rolling restarts
pub async fn wait_for_restarts(
    supervisor: &Supervisor,
    count: u64,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_until(timeout, || supervisor.restarts_completed() >= count).await
}
