//! Terminal status display for the EOM regulator.
//!
//! Starts regulation, prints one status line per poll and shuts the regulator
//! down on Ctrl-C.
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use eom_regulator::config::DEFAULT_CONFIG_FILE;
use eom_regulator::monitor::{poll_until, StatusLine};
use eom_regulator::{DeviceConfig, DeviceController, MockDriver, RegulatorDriver};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eom_monitor", version, about = "Run and watch the EOM regulation loop")]
struct Cli {
    /// Configuration file with [EOM] and [EOM_DLL] tables
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Polling period in milliseconds
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Print each reading as a JSON object instead of a status line
    #[arg(long)]
    json: bool,

    /// Use the built-in simulated driver instead of the native library
    #[arg(long)]
    simulate: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("EOM monitor failed to start: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    if cli.simulate {
        let config = DeviceConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?;
        info!("Using simulated EOM driver");
        let controller = DeviceController::with_driver(MockDriver::simulated(), config)?;
        monitor(controller, cli).await
    } else {
        let controller = DeviceController::from_config_path(&cli.config)
            .with_context(|| format!("creating EOM regulator from {}", cli.config.display()))?;
        monitor(controller, cli).await
    }
}

async fn monitor<D: RegulatorDriver>(mut controller: DeviceController<D>, cli: &Cli) -> Result<()> {
    if !controller.start()? {
        warn!("Regulation did not start; showing non-running state");
    }
    if !cli.json {
        println!("{}", StatusLine::starting());
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl-C; stop the process to exit");
            std::future::pending::<()>().await;
        }
    };

    let json = cli.json;
    let polls = poll_until(&controller, Duration::from_millis(cli.interval_ms), shutdown, |result| {
        match (&result, json) {
            (Ok(reading), true) => match serde_json::to_string(reading) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Cannot encode reading"),
            },
            (Err(e), _) => warn!(error = %e, "Poll failed"),
            _ => {}
        }
        if !json {
            println!("{}", StatusLine::from_result(&result));
        }
    })
    .await;

    controller.close();
    info!(polls, "EOM monitor stopped");
    Ok(())
}
