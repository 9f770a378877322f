//! LANdrop daemon
//!
//! `landropd listen` runs the receiving side: it binds the transfer
//! port, accepts inbound connections and writes received files to the
//! download directory until interrupted. `landropd send` pushes files
//! to one or more peer devices and waits for every transfer to reach
//! its terminal state.

mod config;
mod observers;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use landrop_protocol::{
    Device, SenderOrchestrator, TransferEventDispatcher, TransferFile, TransferListener,
};
use observers::{CompletionObserver, LoggingObserver};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "landropd", version, about = "LANdrop file transfer daemon")]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for incoming files until interrupted
    Listen {
        /// Override the configured transfer port
        #[arg(long)]
        port: Option<u16>,

        /// Override the configured download directory
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },

    /// Send files to one or more devices
    Send {
        /// Target device address (repeatable)
        #[arg(long = "to", value_name = "ADDR")]
        devices: Vec<IpAddr>,

        /// Files to send
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Override the configured transfer port
        #[arg(long)]
        port: Option<u16>,
    },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = Config::load().context("Failed to load configuration")?;

    match cli.command {
        Command::Listen { port, download_dir } => run_listen(&config, port, download_dir).await,
        Command::Send {
            devices,
            files,
            port,
        } => run_send(&config, devices, files, port).await,
    }
}

async fn run_listen(
    config: &Config,
    port: Option<u16>,
    download_dir: Option<PathBuf>,
) -> Result<()> {
    let port = port.unwrap_or(config.network.transfer_port);
    let download_dir = download_dir.unwrap_or_else(|| config.paths.download_dir.clone());

    let events = Arc::new(TransferEventDispatcher::new());
    events.register(Arc::new(LoggingObserver));

    // Bind failure is fatal to the receiving capability.
    let listener = TransferListener::bind(
        SocketAddr::from(([0, 0, 0, 0], port)),
        &download_dir,
        config.network.worker_capacity,
        events.clone(),
    )
    .await
    .with_context(|| format!("Failed to bind transfer port {port}"))?;

    info!(
        "Receiving files into {} (port {}, {} workers)",
        download_dir.display(),
        port,
        config.network.worker_capacity
    );

    let handle = listener.handle();
    let listener_task = tokio::spawn(listener.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for shutdown signal")?;
    info!("Received shutdown signal");

    handle.stop();
    listener_task
        .await
        .context("Listener task panicked")?
        .context("Listener failed")?;

    // Drain: stopping the listener does not abort receptions already
    // accepted. The handle counts them from accept time, so this also
    // covers connections still queued for a worker slot or mid-handshake.
    while handle.active_receptions() > 0 {
        info!(
            "Waiting for {} in-flight receptions to finish",
            handle.active_receptions()
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn run_send(
    config: &Config,
    devices: Vec<IpAddr>,
    files: Vec<PathBuf>,
    port: Option<u16>,
) -> Result<()> {
    if devices.is_empty() {
        bail!("No device selected: pass one or more --to addresses");
    }
    if files.is_empty() {
        bail!("No file attached: pass one or more files to send");
    }

    let port = port.unwrap_or(config.network.transfer_port);

    let devices: Vec<Device> = devices
        .into_iter()
        .map(|address| Device::new(address.to_string(), "unknown", address))
        .collect();

    let mut transfer_files = Vec::new();
    for path in &files {
        let file = TransferFile::from_path(path)
            .await
            .with_context(|| format!("Cannot send {}", path.display()))?;
        transfer_files.push(file);
    }

    let total = devices.len() * transfer_files.len();
    let events = Arc::new(TransferEventDispatcher::new());
    events.register(Arc::new(LoggingObserver));
    let (completion, mut outcomes) = CompletionObserver::new();
    events.register(completion);

    SenderOrchestrator::new(port, events).send(&devices, &transfer_files);

    let mut failed = 0usize;
    for _ in 0..total {
        let success = outcomes.recv().await.context("Event channel closed")?;
        if !success {
            failed += 1;
        }
    }

    if failed > 0 {
        bail!("{failed} of {total} transfers failed");
    }
    info!("All {} transfers completed", total);
    Ok(())
}
