use smoothserve_protocol::protocol::InstanceInfo;

/// Lifecycle status of an instance slot.
///
/// Variants are declared in ascending order and the derived `Ord` is
/// load-bearing: anything at or above `WaitingStop` may receive traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum InstanceStatus {
    #[default]
    None,
    Stopped,
    Stopping,
    WillRunning,
    WaitingStop,
    Running,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::None => "none",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Stopping => "stopping",
            InstanceStatus::WillRunning => "will_running",
            InstanceStatus::WaitingStop => "waiting_stop",
            InstanceStatus::Running => "running",
        }
    }

    /// Whether an instance in this status may be handed a request
    pub fn is_eligible(&self) -> bool {
        *self >= InstanceStatus::WaitingStop
    }

    /// Whether the slot owns a process that has not yet been reaped
    pub fn has_live_process(&self) -> bool {
        *self > InstanceStatus::Stopped
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one instance slot. The port never changes; pid and status are
/// overwritten on every respawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub pid: Option<u32>,
    pub port: u16,
    pub status: InstanceStatus,
    pub needs_restart: bool,
}

impl Instance {
    pub fn new(port: u16) -> Self {
        Self {
            pid: None,
            port,
            status: InstanceStatus::None,
            needs_restart: false,
        }
    }

    pub fn is_eligible(&self) -> bool {
        self.status.is_eligible()
    }

    pub fn to_instance_info(&self, slot: usize) -> InstanceInfo {
        InstanceInfo {
            slot,
            port: self.port,
            pid: self.pid,
            status: self.status.as_str().to_string(),
            needs_restart: self.needs_restart,
        }
    }
}
