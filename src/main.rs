use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;

use linkstate_router::config::Config;
use linkstate_router::instance::{Instance, TimerManager};
use linkstate_router::log_debug;
use linkstate_router::logging::{AsyncConsumer, Facility, LogRegistry};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug, PartialEq)]
enum Command {
    /// Run the routing engine
    Run {
        #[arg(long, default_value = "/etc/lsrd.json5")]
        config: PathBuf,
        /// Write logs as JSON lines directly to stderr
        #[arg(long)]
        json_logs: bool,
    },
    /// Validate a configuration file and exit
    CheckConfig {
        #[arg(long, default_value = "/etc/lsrd.json5")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run { config, json_logs } => run(config, json_logs).await,
        Command::CheckConfig { config } => {
            let parsed = Config::load_from_file(&config)?;
            parsed.validate()?;
            println!("{}: configuration ok", config.display());
            Ok(())
        }
    }
}

async fn run(path: PathBuf, json_logs: bool) -> Result<()> {
    let config = Config::load_from_file(&path)?;

    let registry = if json_logs {
        LogRegistry::stderr_json()
    } else {
        LogRegistry::with_ring(4096)
    };
    if let Some(ring) = registry.ring() {
        tokio::spawn(AsyncConsumer::stderr(ring).run());
    }
    let logger = registry.logger();

    let (event_tx, event_rx) = mpsc::channel(256);
    let (timer_tx, timer_rx) = mpsc::channel(256);
    let (send_tx, mut send_rx) = mpsc::channel(256);

    let instance = Instance::new(config, logger.clone())?;
    tokio::spawn(TimerManager::new(timer_rx, event_tx.clone(), logger.clone()).run());

    // Transmit signals are consumed by the external PDU serializers; with
    // none attached they are surfaced for inspection.
    let tx_logger = logger.clone();
    tokio::spawn(async move {
        while let Some(send) = send_rx.recv().await {
            log_debug!(tx_logger, Facility::Instance, &format!("transmit {send:?}"));
        }
    });

    // External integrations (PDU decoder, interface monitor) clone event_tx
    // to feed the engine; the loop runs until every sender is gone.
    instance.run(event_rx, timer_tx, send_tx).await
}
