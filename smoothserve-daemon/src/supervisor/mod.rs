//! Supervision of the instances of one service.
//!
//! A `Supervisor` owns the slot table of a service and drives it from three
//! directions:
//! - callers (`start`, `stop`, `restart_one_by_one`, `select_instance`)
//! - exit reports from the process monitors, handled on a dedicated task
//! - file change notifications, debounced into rolling restarts
//!
//! The slot table sits behind a synchronous mutex that is never held across
//! an await or a process spawn. Sleeping and signalling happen outside it.
//!
//! A rolling restart is a chain: stopping one instance leads, through its
//! exit report, to its respawn, its warm-up, and finally to stopping the
//! next queued instance. At most one slot is offline for a restart at a time.

mod barrier;
mod table;

pub use barrier::StopBarrier;
pub use table::{ExitOutcome, InstanceTable, StopTarget};

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use smoothserve_protocol::protocol::ServiceInfo;

use crate::config::ServiceDefinition;
use crate::errors::{DaemonError, Result};
use crate::process::{InstanceCommand, Launcher, ProcessExitEvent, ProcessLauncher};
use crate::selector::{RoundRobin, SelectError};
use crate::state::{Instance, InstanceStatus};
use crate::watcher::{watch_files, FileChangeEvent, FileWatcher};

const EXIT_CHANNEL_CAPACITY: usize = 64;

/// The instance a request should be forwarded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedInstance {
    pub slot: usize,
    pub port: u16,
    /// `host:port` to connect to
    pub authority: String,
}

struct SupervisorState {
    table: InstanceTable,
    selector: RoundRobin,
    stop_barrier: Option<StopBarrier>,
    restart_timer: Option<JoinHandle<()>>,
    /// Bumped on every arm or cancel so a timer that already woke up can
    /// tell it was superseded
    timer_generation: u64,
    watcher: Option<FileWatcher>,
    cohort_active: bool,
    restart_requests: u64,
    restarts_completed: u64,
}

/// Result of queueing a rolling restart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartPlan {
    NothingRunning,
    /// Another replacement is offline; the chain picks these up
    Queued { marked: usize },
    Begin { marked: usize, slot: usize, pid: u32 },
}

/// What a restart chain does after one of its steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStop {
    /// This instance was moved to `Stopping` and must be signalled
    Signal { slot: usize, pid: u32 },
    /// The last queued instance was replaced
    CohortDone,
    Idle,
}

/// Result of a warm-up ending
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Warmup {
    /// The slot moved on while the instance warmed up
    Superseded,
    Promoted { next: NextStop },
}

impl SupervisorState {
    fn new(table: InstanceTable) -> Self {
        Self {
            table,
            selector: RoundRobin::new(),
            stop_barrier: None,
            restart_timer: None,
            timer_generation: 0,
            watcher: None,
            cohort_active: false,
            restart_requests: 0,
            restarts_completed: 0,
        }
    }

    /// Queue every serving instance and, when nothing is being replaced
    /// yet, pick the first one to stop. Marking, the in-flight check and
    /// the pick happen in one step so two requests cannot both start a chain.
    fn plan_restart(&mut self) -> RestartPlan {
        self.restart_requests += 1;
        let marked = self.table.mark_restart_cohort();
        if marked == 0 {
            return RestartPlan::NothingRunning;
        }
        self.cohort_active = true;
        if self.table.restart_in_flight() {
            return RestartPlan::Queued { marked };
        }
        match self.advance_restart() {
            NextStop::Signal { slot, pid } => RestartPlan::Begin { marked, slot, pid },
            NextStop::CohortDone | NextStop::Idle => RestartPlan::Queued { marked },
        }
    }

    /// Promote a warmed-up replacement and pick the next instance to stop
    fn finish_warmup(&mut self, slot: usize, pid: u32, for_restart: bool) -> Warmup {
        if !self.table.finish_warmup(slot, pid) {
            return Warmup::Superseded;
        }
        let next = if for_restart {
            self.advance_restart()
        } else {
            NextStop::Idle
        };
        Warmup::Promoted { next }
    }

    /// Move the next queued instance to `Stopping`. Closes the cohort when
    /// nothing is queued or offline any more.
    fn advance_restart(&mut self) -> NextStop {
        if let Some((slot, pid)) = self.table.begin_stop_next() {
            return NextStop::Signal { slot, pid };
        }
        if self.cohort_active && !self.table.restart_in_flight() {
            self.cohort_active = false;
            self.restarts_completed += 1;
            return NextStop::CohortDone;
        }
        NextStop::Idle
    }

    fn arrive_at_barrier(&mut self) {
        if let Some(barrier) = self.stop_barrier.as_mut() {
            if barrier.arrive() {
                self.stop_barrier = None;
            }
        }
    }

    fn cancel_restart_timer(&mut self) -> bool {
        self.timer_generation += 1;
        match self.restart_timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }
}

pub struct Supervisor {
    definition: Arc<ServiceDefinition>,
    launcher: Arc<dyn Launcher>,
    state: Mutex<SupervisorState>,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("service", &self.definition.name)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor that launches real processes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(definition: ServiceDefinition) -> Arc<Self> {
        Self::with_launcher(definition, Arc::new(ProcessLauncher))
    }

    pub fn with_launcher(definition: ServiceDefinition, launcher: Arc<dyn Launcher>) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
        let table = InstanceTable::new(
            (0..definition.instance_count).map(|slot| definition.instance_port(slot)),
        );

        let supervisor = Arc::new(Self {
            definition: Arc::new(definition),
            launcher,
            state: Mutex::new(SupervisorState::new(table)),
            exit_tx,
        });
        supervisor.spawn_exit_handler(exit_rx);
        supervisor
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.definition
    }

    /// Copy of the slot table
    pub fn instances(&self) -> Vec<Instance> {
        self.state.lock().table.instances().to_vec()
    }

    /// Number of times a rolling restart was requested
    pub fn restart_requests(&self) -> u64 {
        self.state.lock().restart_requests
    }

    /// Number of rolling restarts that replaced every queued instance
    pub fn restarts_completed(&self) -> u64 {
        self.state.lock().restarts_completed
    }

    pub fn is_watching(&self) -> bool {
        self.state.lock().watcher.is_some()
    }

    pub fn snapshot(&self) -> ServiceInfo {
        let state = self.state.lock();
        ServiceInfo {
            name: self.definition.name.clone(),
            server_names: self.definition.server_names.iter().cloned().collect(),
            port: self.definition.port,
            instances: state
                .table
                .instances()
                .iter()
                .enumerate()
                .map(|(slot, instance)| instance.to_instance_info(slot))
                .collect(),
            restarts_completed: state.restarts_completed,
            watching: state.watcher.is_some(),
        }
    }

    /// Pick the instance for the next request
    pub fn select_instance(&self) -> Result<SelectedInstance> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.selector.select(state.table.instances()) {
            Ok(slot) => {
                let port = state.table.instances()[slot].port;
                Ok(SelectedInstance {
                    slot,
                    port,
                    authority: self.definition.backend_authority(port),
                })
            }
            Err(SelectError::NoInstance) => Err(DaemonError::NoInstance(self.definition.name.clone())),
            Err(SelectError::Unavailable) => {
                Err(DaemonError::NoInstanceAvailable(self.definition.name.clone()))
            }
        }
    }

    /// Launch every slot that is not running and start watching files.
    ///
    /// Never-started slots serve immediately; slots that were stopped go
    /// through warm-up first, one after the other. A slot that fails to
    /// spawn is logged and skipped.
    pub async fn start(self: &Arc<Self>) {
        info!("Starting service {}", self.definition.name);
        self.ensure_watcher();

        for slot in 0..self.definition.instance_count {
            let current = self
                .state
                .lock()
                .table
                .get(slot)
                .map(|i| (i.status, i.needs_restart));

            match current {
                Some((InstanceStatus::None, _)) => self.spawn_initial(slot),
                Some((InstanceStatus::Stopped, false)) => Arc::clone(self).respawn(slot, false).await,
                Some((status, _)) => {
                    debug!("Instance {} of {} is {}, not starting", slot, self.definition.name, status)
                }
                None => {}
            }
        }
    }

    /// Stop every live instance and wait until each has exited.
    ///
    /// Instances left in `Stopping` by an earlier failed signal are
    /// signalled again. If any instance cannot be signalled the call gives
    /// up immediately: instances not yet signalled go back to their previous
    /// status and the error is returned without waiting for the others.
    pub async fn stop(&self) -> Result<()> {
        let name = &self.definition.name;

        let (targets, done_rx) = {
            let mut state = self.state.lock();
            if state.cancel_restart_timer() {
                debug!("Cancelled pending restart of {}", name);
            }
            state.cohort_active = false;

            match state.stop_barrier.as_mut() {
                Some(barrier) => {
                    debug!("Stop of {} already in progress, waiting for it", name);
                    (Vec::new(), barrier.wait())
                }
                None => {
                    let targets = state.table.begin_stop_all();
                    let mut barrier = StopBarrier::new(targets.len());
                    let done_rx = barrier.wait();
                    if !targets.is_empty() {
                        state.stop_barrier = Some(barrier);
                    }
                    (targets, done_rx)
                }
            }
        };

        if !targets.is_empty() {
            info!("Stopping {} instances of {}", targets.len(), name);
        }

        for (index, target) in targets.iter().enumerate() {
            if !target.needs_signal() {
                continue;
            }
            if let Err(e) = self.launcher.terminate(name, target.pid) {
                error!("{}; aborting stop of {}", e, name);
                let mut state = self.state.lock();
                state.table.record_signal_failure(target.slot);
                for untouched in &targets[index + 1..] {
                    state.table.restore(untouched);
                }
                state.arrive_at_barrier();
                state.stop_barrier = None;
                return Err(e);
            }
        }

        let _ = done_rx.await;
        info!("Instances of {} stopped", name);
        Ok(())
    }

    /// Queue every serving instance for replacement and begin replacing
    /// them one at a time.
    ///
    /// If a replacement is already underway the newly queued instances are
    /// picked up by that chain instead of a second one being started.
    pub fn restart_one_by_one(&self) {
        let name = &self.definition.name;

        let plan = self.state.lock().plan_restart();
        match plan {
            RestartPlan::NothingRunning => info!("No running instances of {} to restart", name),
            RestartPlan::Queued { marked } => {
                info!("Restart of {} already in progress, {} instances queued", name, marked)
            }
            RestartPlan::Begin { marked, slot, pid } => {
                info!("Rolling restart of {} over {} instances", name, marked);
                self.signal_replacement(slot, pid);
            }
        }
    }

    /// Signal the first instance waiting to be replaced.
    ///
    /// Does nothing when no instance is waiting. A signal failure leaves the
    /// instance in `Stopping` and ends the current restart chain.
    pub fn stop_one(&self) {
        let next = self.state.lock().advance_restart();
        self.continue_restart(next);
    }

    fn continue_restart(&self, next: NextStop) {
        match next {
            NextStop::Signal { slot, pid } => self.signal_replacement(slot, pid),
            NextStop::CohortDone => info!("Rolling restart of {} complete", self.definition.name),
            NextStop::Idle => {}
        }
    }

    /// Send SIGTERM to an instance `advance_restart` moved to `Stopping`
    fn signal_replacement(&self, slot: usize, pid: u32) {
        let name = &self.definition.name;

        info!("Stopping instance {} of {} (pid {})", slot, name, pid);
        if let Err(e) = self.launcher.terminate(name, pid) {
            error!("{}; instance {} of {} left stopping", e, slot, name);
            let mut state = self.state.lock();
            state.table.record_signal_failure(slot);
            state.arrive_at_barrier();
        }
    }

    /// Note that a watched file changed. The rolling restart fires once no
    /// further change has arrived for `delay_update_time`.
    pub fn notify_file_changed(self: &Arc<Self>) {
        let delay = self.definition.delay_update_time;

        let mut state = self.state.lock();
        if state.cancel_restart_timer() {
            debug!("Pending restart of {} superseded", self.definition.name);
        }
        let generation = state.timer_generation;

        let weak = Arc::downgrade(self);
        state.restart_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(supervisor) = weak.upgrade() {
                supervisor.restart_timer_fired(generation);
            }
        }));
    }

    fn restart_timer_fired(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.timer_generation != generation {
                return;
            }
            state.restart_timer = None;
        }

        info!("Watched files of {} changed", self.definition.name);
        self.restart_one_by_one();
    }

    fn spawn_initial(&self, slot: usize) {
        let command = InstanceCommand::for_port(&self.definition, self.definition.instance_port(slot));

        let spawned = match self.launcher.spawn(&command, self.exit_tx.clone()) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        let pid = spawned.pid;
        let recorded = self.state.lock().table.record_initial_spawn(slot, pid);
        spawned.start_monitoring();

        if recorded {
            info!(
                "Instance {} of {} running on port {} (pid {})",
                slot, self.definition.name, command.port, pid
            );
        } else {
            self.discard(slot, pid);
        }
    }

    /// Relaunch a stopped slot and warm it up. With `for_restart` the slot
    /// is part of a rolling restart and the chain continues afterwards.
    async fn respawn(self: Arc<Self>, slot: usize, for_restart: bool) {
        let name = &self.definition.name;
        let command = InstanceCommand::for_port(&self.definition, self.definition.instance_port(slot));

        let spawned = match self.launcher.spawn(&command, self.exit_tx.clone()) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("{}", e);
                if for_restart {
                    self.state.lock().table.abandon_restart(slot);
                    warn!("Rolling restart of {} halted at instance {}", name, slot);
                }
                return;
            }
        };

        let pid = spawned.pid;
        let recorded = self.state.lock().table.record_respawn(slot, pid, for_restart);
        spawned.start_monitoring();
        if !recorded {
            self.discard(slot, pid);
            return;
        }

        info!(
            "Instance {} of {} warming up on port {} (pid {})",
            slot, name, command.port, pid
        );
        tokio::time::sleep(self.definition.delay_running_time).await;

        let warmup = self.state.lock().finish_warmup(slot, pid, for_restart);
        let next = match warmup {
            Warmup::Superseded => {
                debug!("Instance {} of {} left warm-up before serving", slot, name);
                return;
            }
            Warmup::Promoted { next } => next,
        };
        info!("Instance {} of {} running on port {}", slot, name, command.port);
        self.continue_restart(next);
    }

    /// Get rid of a process whose slot changed while it was being spawned
    fn discard(&self, slot: usize, pid: u32) {
        debug!(
            "Slot {} of {} changed during spawn, discarding pid {}",
            slot, self.definition.name, pid
        );
        if let Err(e) = self.launcher.terminate(&self.definition.name, pid) {
            warn!("{}", e);
        }
    }

    fn spawn_exit_handler(self: &Arc<Self>, mut exit_rx: mpsc::Receiver<ProcessExitEvent>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = exit_rx.recv().await {
                let Some(supervisor) = weak.upgrade() else {
                    break;
                };
                supervisor.handle_exit(event);
            }
        });
    }

    fn handle_exit(self: &Arc<Self>, event: ProcessExitEvent) {
        let name = &self.definition.name;

        let outcome = {
            let mut state = self.state.lock();
            let outcome = state.table.record_exit(event.pid);
            if matches!(
                outcome,
                ExitOutcome::Stopped { .. } | ExitOutcome::Unexpected { .. }
            ) {
                state.arrive_at_barrier();
            }
            outcome
        };

        match outcome {
            ExitOutcome::Unknown => {
                debug!("Ignoring exit of untracked pid {} for {}", event.pid, name)
            }
            ExitOutcome::Stopped { slot } => {
                info!("Instance {} of {} on port {} stopped", slot, name, event.port)
            }
            ExitOutcome::Unexpected { slot, previous } => warn!(
                "Instance {} of {} on port {} exited unexpectedly while {} (code {:?}, signal {:?}); not restarting (auto_restart={})",
                slot,
                name,
                event.port,
                previous,
                event.exit_code,
                event.signal,
                self.definition.auto_restart
            ),
            ExitOutcome::Respawn { slot } => {
                debug!("Instance {} of {} stopped for restart", slot, name);
                tokio::spawn(Arc::clone(self).respawn(slot, true));
            }
        }
    }

    fn ensure_watcher(self: &Arc<Self>) {
        let paths = self.definition.watch_paths();
        if paths.is_empty() {
            return;
        }

        let change_rx = {
            let mut state = self.state.lock();
            if state.watcher.is_some() {
                return;
            }
            let (change_tx, change_rx) = mpsc::unbounded_channel();
            match watch_files(&self.definition.name, paths, change_tx) {
                Ok(watcher) => state.watcher = Some(watcher),
                Err(e) => {
                    error!("{}; automatic restarts disabled for {}", e, self.definition.name);
                    return;
                }
            }
            change_rx
        };

        self.spawn_change_handler(change_rx);
    }

    fn spawn_change_handler(
        self: &Arc<Self>,
        mut change_rx: mpsc::UnboundedReceiver<FileChangeEvent>,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = change_rx.recv().await {
                let Some(supervisor) = weak.upgrade() else {
                    break;
                };
                debug!("Change in {:?} for {}", event.paths, event.service_name);
                supervisor.notify_file_changed();
            }
        });
    }
}
