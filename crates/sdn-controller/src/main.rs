//! Controller entry point.

use anyhow::Context as _;
use clap::Parser;
use sdn_controller::config::DEFAULT_CONFIG_PATH;
use sdn_controller::{ControllerConfig, ControllerManager};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Declarative switch state reconciliation controller
#[derive(Parser, Debug)]
#[command(name = "sdn-controller")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Start in read-only mode, overriding the configuration file
    #[arg(long)]
    read_only: bool,
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = ControllerConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.read_only {
        config.reconcile.read_only = true;
    }

    let (manager, lab) = ControllerManager::from_config(&config)?;
    manager.seed(&config).await?;
    info!(
        switches = config.switches.len(),
        simulated = lab.fqdns().len(),
        pools = config.pools.len(),
        read_only = config.reconcile.read_only,
        "starting controller"
    );
    manager.start();

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl-c")?;
    warn!("received SIGINT, shutting down");
    manager.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging(&args.log_level, args.log_json) {
        eprintln!("sdn-controller: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => {
            info!("controller shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "controller failed");
            ExitCode::FAILURE
        }
    }
}
