mod commands;
mod config;
mod errors;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::{commands::Commands, commands::DaemonCommands, config::Config, errors::{CliError, Result}};
use clap::Parser;
use smoothserve_protocol::{
    client::Client,
    protocol::{Response, ResponseData, ServiceInfo},
};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DAEMON_BINARY: &str = "smoothserve-daemon";

/// smoothserve - rolling restarts for locally spawned backends
#[derive(Parser, Debug)]
#[command(name = "smoothserve")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the main configuration file (searched upwards from the
    /// current directory if not given)
    #[arg(short = 'f', long = "file", global = true)]
    pub file: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = Config::resolve_config_path(&cli.file)?;
    let control_addr = Config::control_addr(&config_path)?;
    debug!("Using {} with control plane at {}", config_path.display(), control_addr);

    if let Commands::Daemon { command } = &cli.command {
        return handle_daemon_command(command, &config_path, control_addr).await;
    }

    if !Client::is_daemon_running(control_addr).await {
        eprintln!("Daemon is not running. Start it with: smoothserve daemon start");
        eprintln!("Or use: smoothserve daemon start -d (to run in background)");
        std::process::exit(1);
    }
    let client = Client::new(control_addr);

    match cli.command {
        Commands::Start { service } => {
            handle_response(client.start(service.as_deref()).await?);
        }

        Commands::Stop { service } => {
            handle_response(client.stop(service.as_deref()).await?);
        }

        Commands::Restart { service } => {
            handle_response(client.restart(service.as_deref()).await?);
        }

        Commands::Status { service } => {
            handle_status(&client, service.as_deref()).await?;
        }

        Commands::Daemon { .. } => {
            unreachable!("Daemon commands are handled by early return above")
        }
    }

    Ok(())
}

fn handle_response(response: Response) {
    match response {
        Response::Ok { message, .. } => {
            if let Some(msg) = message {
                println!("{}", msg);
            }
        }
        Response::Error { message } => {
            eprintln!("Error: {}", message);
            std::process::exit(1);
        }
    }
}

async fn wait_for_daemon(control_addr: SocketAddr, running: bool) -> bool {
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if Client::is_daemon_running(control_addr).await == running {
            return true;
        }
    }
    false
}

async fn handle_daemon_command(
    command: &DaemonCommands,
    config_path: &Path,
    control_addr: SocketAddr,
) -> Result<()> {
    match command {
        DaemonCommands::Start { detach } => {
            if Client::is_daemon_running(control_addr).await {
                println!("Daemon is already running");
                return Ok(());
            }

            let daemon_path = which_daemon()?;
            debug!("Daemon binary: {}", daemon_path.display());
            if *detach {
                start_daemon_detached(&daemon_path, config_path)?;
                if wait_for_daemon(control_addr, true).await {
                    println!("Daemon started successfully");
                    return Ok(());
                }
                return Err(CliError::DaemonNotReady(control_addr));
            }

            println!("Starting daemon in foreground...");
            println!("Press Ctrl+C to stop");

            let status = tokio::process::Command::new(&daemon_path)
                .arg("--config")
                .arg(config_path)
                .status()
                .await
                .map_err(|source| CliError::DaemonLaunch {
                    path: daemon_path,
                    source,
                })?;

            if !status.success() {
                std::process::exit(status.code().unwrap_or(1));
            }
        }

        DaemonCommands::Stop => {
            if !Client::is_daemon_running(control_addr).await {
                println!("Daemon is not running");
                return Ok(());
            }

            let response = Client::new(control_addr).stop(None).await?;
            handle_response(response);
            if !wait_for_daemon(control_addr, false).await {
                return Err(CliError::DaemonStillRunning(control_addr));
            }
            println!("Daemon stopped");
        }

        DaemonCommands::Status => {
            if !Client::is_daemon_running(control_addr).await {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Daemon is running on {}", control_addr);
            if let Response::Ok {
                data: Some(ResponseData::Services(services)),
                ..
            } = Client::new(control_addr).snapshot().await?
            {
                for service in services {
                    println!(
                        "  {} ({}/{} instances serving, {} restarts)",
                        service.name,
                        service.serving_count(),
                        service.instances.len(),
                        service.restarts_completed
                    );
                }
            }
        }
    }

    Ok(())
}

fn which_daemon() -> Result<PathBuf> {
    // 1. Same directory as current executable
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let daemon_path = dir.join(DAEMON_BINARY);
            if daemon_path.exists() {
                return Ok(daemon_path);
            }
        }
    }

    // 2. In PATH
    if let Ok(path) = which::which(DAEMON_BINARY) {
        return Ok(path);
    }

    // 3. Development path (cargo target)
    for profile in ["debug", "release"] {
        let dev_path = PathBuf::from("target").join(profile).join(DAEMON_BINARY);
        if dev_path.exists() {
            return Ok(dev_path);
        }
    }

    Err(CliError::DaemonBinaryNotFound(DAEMON_BINARY))
}

fn start_daemon_detached(daemon_path: &Path, config_path: &Path) -> Result<()> {
    use std::process::Command;

    let mut cmd = Command::new(daemon_path);
    cmd.arg("--config")
        .arg(config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and touches no Rust state
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd.spawn().map_err(|source| CliError::DaemonLaunch {
        path: daemon_path.to_path_buf(),
        source,
    })?;
    debug!("Daemon detached with PID {}", child.id());

    Ok(())
}

async fn handle_status(client: &Client, service: Option<&str>) -> Result<()> {
    match client.status(service).await? {
        Response::Ok {
            data: Some(ResponseData::Services(services)),
            ..
        } => {
            if services.is_empty() {
                println!("No services configured");
            } else {
                println!("{}", render_status_table(&services));
            }
        }
        Response::Error { message } => {
            eprintln!("Error: {}", message);
            std::process::exit(1);
        }
        _ => println!("No services found"),
    }
    Ok(())
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "SERVICE")]
    service: String,
    #[tabled(rename = "HOSTS")]
    hosts: String,
    #[tabled(rename = "SLOT")]
    slot: usize,
    #[tabled(rename = "PORT")]
    port: u16,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

fn format_status(status: &str, needs_restart: bool) -> String {
    if needs_restart {
        format!("{} (restart pending)", status)
    } else {
        status.to_string()
    }
}

fn instance_rows(services: &[ServiceInfo]) -> Vec<InstanceRow> {
    services
        .iter()
        .flat_map(|service| {
            let hosts = format!("{}:{}", service.server_names.join(","), service.port);
            service.instances.iter().map(move |instance| InstanceRow {
                service: service.name.clone(),
                hosts: hosts.clone(),
                slot: instance.slot,
                port: instance.port,
                pid: instance
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status: format_status(&instance.status, instance.needs_restart),
            })
        })
        .collect()
}

fn render_status_table(services: &[ServiceInfo]) -> String {
    Table::new(instance_rows(services))
        .with(Style::blank())
        .to_string()
}
