//! procctl - client for procctld
//!
//! # Usage
//!
//! ```text
//! procctl update                      # save a JSON snapshot under ./DD-MM-YYYY/
//! procctl update -f json -f xml       # both formats from one capture
//! procctl signal 1234 SIGTERM         # deliver a signal
//! procctl show 07-03-2024/09-05-01.xml
//! procctl --host 10.0.0.5 shell       # interactive, one connection
//! ```

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use procctl_client::{ClientConfig, Outcome, ProtocolClient};
use procctl_core::{decode, ProcessSnapshot, SnapshotFormat};
use procctl_protocol::{is_error_status, Command as WireCommand};

// ============================================================================
// CLI Arguments
// ============================================================================

/// procctl - inspect and signal processes on a remote procctld
#[derive(Parser, Debug)]
#[command(name = "procctl", version, about)]
struct Args {
    /// Server host (default: localhost, or PROCCTL_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port (default: 9000, or PROCCTL_PORT)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Directory snapshots are saved under
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Request a process snapshot and save it
    Update {
        /// Snapshot format; repeat for several formats
        #[arg(short, long = "format", default_value = "json")]
        formats: Vec<SnapshotFormat>,
    },
    /// Send a signal to a remote process
    Signal {
        /// Target process ID
        pid: String,
        /// Signal name, e.g. SIGTERM or HUP
        signal: String,
    },
    /// Print a saved snapshot
    Show {
        /// Snapshot file (.json or .xml)
        file: PathBuf,

        /// Only print this many processes
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Read commands from stdin over one connection
    Shell,
}

fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let mut config = ClientConfig::default();
    config.apply_env()?;
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    Ok(config)
}

// ============================================================================
// Commands
// ============================================================================

async fn run_update(config: &ClientConfig, formats: &[SnapshotFormat]) -> Result<()> {
    let mut client = ProtocolClient::connect(config).await?;
    let paths = client.request_updates(formats).await?;
    client.close().await;

    for path in paths {
        println!("Saved {}", path.display());
    }
    Ok(())
}

async fn run_signal(config: &ClientConfig, pid: &str, signal: &str) -> Result<()> {
    let mut client = ProtocolClient::connect(config).await?;
    let status = client.send_signal(pid, signal).await?;
    client.close().await;

    println!("{status}");
    if is_error_status(&status) {
        process::exit(1);
    }
    Ok(())
}

fn format_for(path: &Path) -> Result<SnapshotFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| format!("{} has no file extension", path.display()))?;
    Ok(ext.parse()?)
}

fn run_show(file: &Path, limit: Option<usize>) -> Result<()> {
    let format = format_for(file)?;
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let snapshot = decode(&bytes, format)
        .with_context(|| format!("Failed to decode {}", file.display()))?;
    print_snapshot(&snapshot, limit.unwrap_or(usize::MAX));
    Ok(())
}

fn print_snapshot(snapshot: &ProcessSnapshot, limit: usize) {
    println!("Snapshot taken {}", snapshot.timestamp);
    println!("{} processes", snapshot.len());
    println!();
    println!(
        "{:<12} {:>7} {:>5} {:>5} {:>10} {:>10}  COMMAND",
        "USER", "PID", "%CPU", "%MEM", "VSZ", "RSS"
    );
    for record in snapshot.processes.iter().take(limit) {
        println!(
            "{:<12} {:>7} {:>5} {:>5} {:>10} {:>10}  {}",
            record.user, record.pid, record.cpu, record.mem, record.vsz, record.rss, record.command
        );
    }
}

async fn run_shell(config: &ClientConfig) -> Result<()> {
    let mut client = ProtocolClient::connect(config).await?;
    eprintln!(
        "Connected to {}, saving snapshots under {}. Type 'quit' to exit.",
        client.addr(),
        client.output_dir().display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }

        let command = match WireCommand::parse(line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("Error: {e}");
                continue;
            }
        };

        debug!(command = %command, "Executing");
        match client.execute(&command).await {
            Ok(Outcome::Saved(paths)) => {
                for path in paths {
                    println!("Saved {}", path.display());
                }
            }
            Ok(Outcome::Status(status)) => println!("{status}"),
            Err(e) => {
                eprintln!("{e}");
                if client.is_broken() {
                    // The command is not retried; it may have reached the server
                    client
                        .reconnect()
                        .await
                        .with_context(|| format!("Lost connection to {}", client.addr()))?;
                    eprintln!("Reconnected to {}", client.addr());
                }
            }
        }
    }

    client.close().await;
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    info!(addr = %config.addr(), "procctl starting");

    match &args.command {
        Command::Update { formats } => {
            if formats.is_empty() {
                bail!("at least one --format is required");
            }
            run_update(&config, formats).await
        }
        Command::Signal { pid, signal } => run_signal(&config, pid, signal).await,
        Command::Show { file, limit } => run_show(file, *limit),
        Command::Shell => run_shell(&config).await,
    }
}
