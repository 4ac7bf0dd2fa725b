//! procctld - remote process inspection daemon
//!
//! Serves process table snapshots and delivers signals to clients over TCP.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground) on 0.0.0.0:9000
//! procctld start
//!
//! # Start in the background on a custom port
//! procctld start -d --port 9100
//!
//! # Stop the daemon
//! procctld stop
//!
//! # Check daemon status
//! procctld status
//! ```
//!
//! Configuration is read from `<config_dir>/procctl/procctld.toml` when it
//! exists, then `PROCCTLD_HOST` / `PROCCTLD_PORT`, then the flags above.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use procctld::monitor::spawn_monitor_task;
use procctld::{Listener, ProcessInspector, ServerConfig};

/// procctld - remote process inspection daemon
#[derive(Parser, Debug)]
#[command(name = "procctld", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Config file (default: <config_dir>/procctl/procctld.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("procctl")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("procctld.pid")
}

fn log_file_path() -> PathBuf {
    state_dir().join("procctld.log")
}

fn read_pid() -> Option<i32> {
    fs::read_to_string(pid_file_path()).ok()?.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    fs::write(&path, process::id().to_string()).context("Failed to write PID file")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: i32) -> bool {
    // Signal 0 only checks that the process exists
    kill(Pid::from_raw(pid), None).is_ok()
}

fn is_daemon_running() -> Option<i32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn stop_daemon(pid: i32) -> Result<()> {
    kill(Pid::from_raw(pid), Signal::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to process {pid}"))
}

/// Builds the effective config: file, then environment, then flags.
fn resolve_config(
    path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<ServerConfig> {
    let mut config = ServerConfig::load_or_default(path)?;
    config.apply_env()?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        host: None,
        port: None,
        config: None,
    });

    match command {
        Command::Start {
            daemon,
            host,
            port,
            config,
        } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'procctld stop' to stop it first.");
                process::exit(1);
            }

            // Resolve before forking so config errors reach the terminal
            let config = resolve_config(config.as_deref(), host, port)?;

            if daemon {
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(config);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                println!("Log: {}", log_file_path().display());
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();

    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_daemon(config: ServerConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("procctld=info".parse()?)
                .add_directive("procctl_core=info".parse()?)
                .add_directive("procctl_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        addr = %config.bind_addr(),
        "procctld starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let inspector = ProcessInspector::new(Arc::new(config.ps_command()));
    let listener = Listener::bind(&config, inspector, cancel_token.clone()).await?;

    let _monitor_handle = spawn_monitor_task(cancel_token, listener.active_sessions());

    if let Err(e) = listener.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("procctld stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    Ok(())
}
