//! Beacon Daemon - WebSocket notification server
//!
//! Accepts WebSocket clients, fans out notifications to them and drains
//! them gracefully when the process is asked to stop.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! beacond start
//!
//! # Start on another address with a config file
//! beacond --config /etc/beacon.toml --bind 0.0.0.0:9000 start
//!
//! # Stop the daemon
//! beacond stop
//!
//! # Check daemon status
//! beacond status
//!
//! # Enable debug logging
//! RUST_LOG=beacond=debug beacond start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful drain, then exit
//! - Repeated SIGTERM/SIGINT (3 by default): Immediate termination

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use beacond::config::DaemonConfig;
use beacond::notifier::NotificationScheduler;
use beacond::server::{AppState, DaemonServer};
use beacond::sweeper::LivenessSweeper;

/// Beacon daemon - real-time WebSocket notification server
#[derive(Parser, Debug)]
#[command(name = "beacond", version, about)]
struct Args {
    /// Path to a TOML config file (defaults to $BEACON_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file and $BEACON_BIND
    #[arg(long, global = true)]
    bind: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon in the foreground
    Start,
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("beacon")
        .join("beacond.pid")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Returns the PID of a running daemon, clearing a stale PID file.
fn is_daemon_running() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        bail!("Failed to send SIGTERM to process {}", pid);
    }
    Ok(())
}

/// Resolves the configuration from file, environment and flags.
fn load_config(args: &Args) -> Result<DaemonConfig> {
    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(bind) = &args.bind {
        config.set_bind_addr(bind).context("Invalid --bind address")?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.as_ref().unwrap_or(&Command::Start) {
        Command::Start => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {})", pid);
                eprintln!("Use 'beacond stop' to stop it first.");
                process::exit(1);
            }

            let config = load_config(&args)?;

            write_pid()?;
            let result = run_daemon(config);
            remove_pid_file();

            result
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };

            println!("Stopping daemon (PID {})...", pid);
            stop_daemon(pid)?;

            // The drain may take the whole budget plus a poll interval
            let config = load_config(&args).unwrap_or_default();
            let wait = config.drain_wait_budget() + config.drain_poll_interval() + Duration::from_secs(5);
            let deadline = std::time::Instant::now() + wait;

            while std::time::Instant::now() < deadline {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }

            eprintln!("Daemon did not stop within {} seconds.", wait.as_secs());
            process::exit(1);
        }
        Command::Status => match is_daemon_running() {
            Some(pid) => {
                println!("Daemon is running (PID {})", pid);
                if let Ok(config) = load_config(&args) {
                    println!("Listening on: {}", config.bind_addr);
                }
                Ok(())
            }
            None => {
                println!("Daemon is not running.");
                process::exit(1);
            }
        },
    }
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: DaemonConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("beacond=info".parse()?)
                .add_directive("beacon_core=info".parse()?)
                .add_directive("beacon_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.bind_addr,
        "Beacon daemon starting"
    );

    let cancel_token = CancellationToken::new();
    let state = AppState::new(config, cancel_token.clone());
    let config = state.config.clone();

    let signal_handle = state
        .coordinator
        .spawn_signal_listener()
        .context("Failed to install signal handlers")?;

    let sweeper_handle = LivenessSweeper::new(state.broadcaster.clone(), config.sweep_interval())
        .spawn(cancel_token.clone());
    let notifier_handle =
        NotificationScheduler::new(state.broadcaster.clone(), config.notification_interval())
            .spawn(cancel_token.clone());

    let server = DaemonServer::new(state);
    let result = server.run().await;

    // A bind or serve failure never went through the drain
    if let Err(e) = &result {
        error!(error = %e, "Server error");
        cancel_token.cancel();
    }

    for (name, handle) in [
        ("signal listener", signal_handle),
        ("liveness sweeper", sweeper_handle),
        ("notification scheduler", notifier_handle),
    ] {
        if let Err(e) = handle.await {
            warn!(task = name, error = %e, "Background task failed");
        }
    }

    result?;
    info!("Beacon daemon stopped");
    Ok(())
}
