use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the daemon process
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Start services (requires daemon to be running)
    Start {
        /// Specific service to start (starts all if not specified)
        service: Option<String>,
    },
    /// Stop services (requires daemon to be running)
    ///
    /// Stopping every service also shuts the daemon down.
    Stop {
        /// Specific service to stop (stops all if not specified)
        service: Option<String>,
    },
    /// Replace the instances of services one at a time
    Restart {
        /// Specific service to restart (restarts all if not specified)
        service: Option<String>,
    },
    /// Show every instance and its state
    Status {
        /// Only show this service
        service: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DaemonCommands {
    /// Start the daemon
    Start {
        /// Detach and run in background
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop the daemon (stops all services first)
    Stop,

    /// Check whether the daemon answers
    Status,
}
