//! Slot bookkeeping for one service.
//!
//! Every transition of an instance record happens here, under the
//! supervisor's lock, so the rules can be tested without processes.

use crate::state::{Instance, InstanceStatus};

/// What an exit report meant for the slot that owned the pid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// No slot owns the pid
    Unknown,
    /// Stopped on purpose as part of a rolling restart
    Respawn { slot: usize },
    /// Stopped on purpose, nothing further to do
    Stopped { slot: usize },
    /// Died without being asked to
    Unexpected { slot: usize, previous: InstanceStatus },
}

/// A slot moved to `Stopping` by a full stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTarget {
    pub slot: usize,
    pub pid: u32,
    pub previous: InstanceStatus,
    /// SIGTERM already reached the process before the stop began
    pub signalled: bool,
}

impl StopTarget {
    /// Whether the process still has to be signalled. Slots already in
    /// `Stopping` were signalled by whoever put them there, unless that
    /// signal failed.
    pub fn needs_signal(&self) -> bool {
        !self.signalled
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstanceTable {
    instances: Vec<Instance>,
    /// Slots left in `Stopping` by a SIGTERM that never got through
    signal_failed: Vec<bool>,
}

impl InstanceTable {
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Self {
        let instances: Vec<Instance> = ports.into_iter().map(Instance::new).collect();
        Self {
            signal_failed: vec![false; instances.len()],
            instances,
        }
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn get(&self, slot: usize) -> Option<&Instance> {
        self.instances.get(slot)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn slot_of_pid(&self, pid: u32) -> Option<usize> {
        self.instances.iter().position(|i| i.pid == Some(pid))
    }

    /// First launch of a never-started slot goes straight to `Running`
    pub fn record_initial_spawn(&mut self, slot: usize, pid: u32) -> bool {
        match self.instances.get_mut(slot) {
            Some(instance) if instance.status == InstanceStatus::None => {
                instance.pid = Some(pid);
                instance.status = InstanceStatus::Running;
                instance.needs_restart = false;
                self.signal_failed[slot] = false;
                true
            }
            _ => false,
        }
    }

    /// Relaunch of a stopped slot, which must warm up before serving.
    ///
    /// `for_restart` says which kind of stopped slot the caller expects:
    /// one waiting to be replaced mid-restart, or one stopped for good.
    /// Anything else means the slot moved on while the process was spawning.
    pub fn record_respawn(&mut self, slot: usize, pid: u32, for_restart: bool) -> bool {
        match self.instances.get_mut(slot) {
            Some(instance)
                if instance.status == InstanceStatus::Stopped
                    && instance.needs_restart == for_restart =>
            {
                instance.pid = Some(pid);
                instance.status = InstanceStatus::WillRunning;
                self.signal_failed[slot] = false;
                true
            }
            _ => false,
        }
    }

    /// Promote a warmed-up instance, provided it is still the same process
    pub fn finish_warmup(&mut self, slot: usize, pid: u32) -> bool {
        match self.instances.get_mut(slot) {
            Some(instance)
                if instance.pid == Some(pid) && instance.status == InstanceStatus::WillRunning =>
            {
                instance.status = InstanceStatus::Running;
                instance.needs_restart = false;
                true
            }
            _ => false,
        }
    }

    /// Queue every serving instance for replacement. Returns how many were queued.
    pub fn mark_restart_cohort(&mut self) -> usize {
        let mut marked = 0;
        for instance in &mut self.instances {
            if matches!(
                instance.status,
                InstanceStatus::Running | InstanceStatus::WaitingStop
            ) {
                instance.status = InstanceStatus::WaitingStop;
                instance.needs_restart = true;
                marked += 1;
            }
        }
        marked
    }

    /// True while some slot is offline because it is being replaced
    pub fn restart_in_flight(&self) -> bool {
        self.instances.iter().any(|i| {
            i.needs_restart
                && matches!(
                    i.status,
                    InstanceStatus::Stopping | InstanceStatus::Stopped | InstanceStatus::WillRunning
                )
        })
    }

    /// Move the first queued instance to `Stopping` and return it
    pub fn begin_stop_next(&mut self) -> Option<(usize, u32)> {
        for (slot, instance) in self.instances.iter_mut().enumerate() {
            if instance.status != InstanceStatus::WaitingStop {
                continue;
            }
            match instance.pid {
                Some(pid) => {
                    instance.status = InstanceStatus::Stopping;
                    return Some((slot, pid));
                }
                None => {
                    instance.status = InstanceStatus::Stopped;
                    instance.needs_restart = false;
                }
            }
        }
        None
    }

    /// Move every slot with a live process to `Stopping` and cancel any
    /// pending replacement
    pub fn begin_stop_all(&mut self) -> Vec<StopTarget> {
        let mut targets = Vec::new();
        for (slot, instance) in self.instances.iter_mut().enumerate() {
            instance.needs_restart = false;
            if !instance.status.has_live_process() {
                continue;
            }
            if let Some(pid) = instance.pid {
                targets.push(StopTarget {
                    slot,
                    pid,
                    previous: instance.status,
                    signalled: instance.status == InstanceStatus::Stopping
                        && !self.signal_failed[slot],
                });
                instance.status = InstanceStatus::Stopping;
            }
        }
        targets
    }

    /// Undo `begin_stop_all` for a target that was never signalled.
    ///
    /// The stop already cancelled any pending replacement, so a slot that
    /// was queued for one goes back to plain `Running`.
    pub fn restore(&mut self, target: &StopTarget) {
        if let Some(instance) = self.instances.get_mut(target.slot) {
            if instance.pid == Some(target.pid) && instance.status == InstanceStatus::Stopping {
                instance.status = match target.previous {
                    InstanceStatus::WaitingStop => InstanceStatus::Running,
                    previous => previous,
                };
            }
        }
    }

    /// Give up on replacing a slot
    pub fn abandon_restart(&mut self, slot: usize) {
        if let Some(instance) = self.instances.get_mut(slot) {
            instance.needs_restart = false;
        }
    }

    /// SIGTERM to the process in `slot` failed. The slot stays `Stopping`
    /// and the next full stop signals it again.
    pub fn record_signal_failure(&mut self, slot: usize) {
        if let Some(instance) = self.instances.get_mut(slot) {
            instance.needs_restart = false;
            self.signal_failed[slot] = true;
        }
    }

    pub fn signal_failed(&self, slot: usize) -> bool {
        self.signal_failed.get(slot).copied().unwrap_or(false)
    }

    /// Apply an exit report
    pub fn record_exit(&mut self, pid: u32) -> ExitOutcome {
        let Some(slot) = self.slot_of_pid(pid) else {
            return ExitOutcome::Unknown;
        };

        self.signal_failed[slot] = false;
        let instance = &mut self.instances[slot];
        let previous = instance.status;
        instance.pid = None;
        instance.status = InstanceStatus::Stopped;

        if previous == InstanceStatus::Stopping {
            if instance.needs_restart {
                ExitOutcome::Respawn { slot }
            } else {
                ExitOutcome::Stopped { slot }
            }
        } else {
            instance.needs_restart = false;
            ExitOutcome::Unexpected { slot, previous }
        }
    }
}
