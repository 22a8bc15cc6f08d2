use anyhow::Context;
use clap::Parser;
use snapbridge::{init_logging, Config, PollerConfig, PrinterClient, State, StatePoller};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "snapbridge", version, about = "Moonraker bridge core for Snapmaker printers")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "snapbridge.toml")]
    config: PathBuf,

    /// Discover printers on the network and exit.
    #[arg(long)]
    discover: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    if cli.discover {
        return run_discovery().await;
    }

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    info!("snapbridge {} starting", snapbridge::VERSION);
    info!("server: {}", config.listen_addr());
    info!("printer: {} ({})", config.printer_ip, config.printer_model);
    info!("gcode directory: {}", config.gcode_dir.display());

    let client = PrinterClient::new(
        config.printer_ip.clone(),
        config.printer_token.clone(),
        config.printer_model.clone(),
    );
    let state = Arc::new(State::new());

    // Initial connect is non-fatal: the poller keeps retrying.
    if config.printer_ip.is_empty() {
        warn!("no printer IP configured - running in offline mode");
    } else if let Err(e) = client.connect().await {
        warn!("could not connect to printer: {e}");
        warn!("starting anyway - printer commands will fail until connected");
    }

    let data_dir = config
        .gcode_dir
        .parent()
        .map(|p| p.join(".snapbridge_data"))
        .unwrap_or_else(|| PathBuf::from(".snapbridge_data"));
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        warn!("could not create data directory {}: {e}", data_dir.display());
    }

    let poller_config = PollerConfig::new(
        Duration::from_secs(config.poll_interval_s),
        config.gcode_dir.clone(),
        data_dir.join("print_state.json"),
    );

    let poller = StatePoller::new(
        client.clone(),
        state.clone(),
        poller_config,
        Arc::new(move |state| {
            // The Moonraker surface subscribes here; until it is wired up,
            // surface transitions in the log.
            let snap = state.snapshot();
            tracing::debug!(
                connected = snap.connected,
                printer_state = %snap.printer_state,
                progress = snap.print_progress,
                "status update"
            );
        }),
    );
    poller.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down...");

    poller.stop().await;
    client.disconnect().await;

    Ok(())
}

async fn run_discovery() -> anyhow::Result<()> {
    info!("discovering Snapmaker printers on the network...");

    let printers = snapbridge::discover(Duration::from_secs(5)).await?;
    if printers.is_empty() {
        println!("No printers found.");
        return Ok(());
    }

    println!("Found {} printer(s):", printers.len());
    for (i, p) in printers.iter().enumerate() {
        println!(
            "  {}. {} ({}) - IP: {}, SACP: {}",
            i + 1,
            p.model,
            p.id,
            p.ip,
            if p.sacp { "yes" } else { "no" }
        );
    }

    Ok(())
}
