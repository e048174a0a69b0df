use anyhow::{Context, Result};
use clap::Parser;
use smoothserve_daemon::config::{SmoothServeConfig, DEFAULT_CONFIG_PATH};
use smoothserve_daemon::registry::ServiceRegistry;
use smoothserve_daemon::server;
use smoothserve_daemon::Daemon;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Proxy listeners accept on every interface
const PROXY_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// smoothserve daemon - supervises backend instances behind a reverse proxy
#[derive(Parser)]
#[command(name = "smoothserve-daemon", about = "Supervises backend instances behind a reverse proxy")]
struct Args {
    /// Path to the main config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Write the PID file with owner-only permissions
fn write_pid_file(pid_file: &Path) -> Result<()> {
    if let Some(dir) = pid_file.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(dir)?;
    }

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(pid_file)?;
        file.write_all(std::process::id().to_string().as_bytes())?;
    }
    #[cfg(not(unix))]
    fs::write(pid_file, std::process::id().to_string())?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = SmoothServeConfig::load(&args.config)
        .with_context(|| format!("Cannot load {}", args.config.display()))?;

    init_tracing(&config.log.level);
    info!("Starting smoothserve daemon with {}", args.config.display());

    let pid_file = Daemon::get_pid_file().context("Could not determine home directory")?;
    write_pid_file(&pid_file)?;

    let definitions = config.load_services()?;
    if definitions.is_empty() {
        warn!("No enabled services in {}", config.sub_config_dir.display());
    }
    for definition in &definitions {
        info!(
            "Service {}: port {}, {} instances from port {}",
            definition.name, definition.port, definition.instance_count, definition.start_instance_port
        );
    }

    let registry = Arc::new(ServiceRegistry::new(definitions));
    registry.start(None).await?;

    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    let launched = match config.control_addr() {
        Ok(control_addr) => {
            server::launch(Arc::clone(&registry), control_addr, PROXY_BIND_IP, stop_tx).await
        }
        Err(e) => Err(e),
    };
    let running = match launched {
        Ok(running) => running,
        Err(e) => {
            error!("{}; stopping services", e);
            if let Err(stop_err) = registry.stop(None).await {
                error!("Failed to stop all services: {}", stop_err);
            }
            let _ = fs::remove_file(&pid_file);
            return Err(e.into());
        }
    };

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping services");
            if let Err(e) = registry.stop(None).await {
                error!("Failed to stop all services: {}", e);
            }
        }
        _ = stop_rx.recv() => {
            info!("All services stopped on request");
        }
    }

    running.shutdown().await;

    info!("Daemon shutting down");
    let _ = fs::remove_file(&pid_file);

    Ok(())
}
