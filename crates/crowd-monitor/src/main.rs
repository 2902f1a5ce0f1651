//! Temple crowd-level monitor - Entry Point
//!
//! Reads selection commands from stdin (`select <key>`, `refresh <key>`,
//! `show`, `quit`) and logs the view as it changes.

use anyhow::Result;
use clap::Parser;
use crowd_monitor::command::read_commands;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;

/// Temple crowd-level monitor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CROWD_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Temple to select at startup (overrides the config file)
    #[arg(short, long)]
    select: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    crowd_ws::init_crypto();

    let args = Args::parse();

    crowd_telemetry::init_logging()?;

    info!("Starting crowd monitor v{}", env!("CARGO_PKG_VERSION"));

    let mut config = crowd_monitor::AppConfig::load(args.config)?;
    if let Some(selected) = args.select {
        config.selected = Some(selected);
    }
    info!(api_url = %config.api_url, push_url = %config.push_url, "Configuration loaded");

    let app = crowd_monitor::Application::new(config)?;

    let (command_tx, command_rx) = mpsc::channel(16);
    tokio::spawn(read_commands(BufReader::new(tokio::io::stdin()), command_tx));

    app.run(command_rx).await?;

    Ok(())
}
