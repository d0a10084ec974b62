use std::process;
use std::sync::Arc;

mod cli;
mod config;
mod exit_codes;
mod logging;
mod signal_handler;

use anyhow::anyhow;
use clap::Parser;
use cli::Cli;
use config::{ConfigProvider, ElectedConfig};
use elected::Daemon;
use elected_consul::ConsulClient;
use exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let config = match ConfigProvider::new().load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("elected: {}", e);
            process::exit(EXIT_ERROR);
        }
    };

    logging::configure_logging(config.verbose, config.quiet);

    let exit_code = match run(config).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("elected: {}", e);
            EXIT_ERROR
        }
    };
    process::exit(exit_code);
}

async fn run(config: ElectedConfig) -> anyhow::Result<()> {
    let hostname = elected::local_hostname()?;
    let daemon_config = config.daemon_config(&hostname)?;
    if config.restart && config.watch.is_none() {
        warn!("--restart has no effect without --watch");
    }

    let shutdown = CancellationToken::new();
    signal_handler::install(shutdown.clone())
        .map_err(|e| anyhow!("Failed to install signal handlers: {}", e))?;

    info!(
        "Using Consul at {} for key {} as {}",
        config.server, daemon_config.election.key, hostname
    );
    let client = Arc::new(ConsulClient::new(&config.server));
    let report = Daemon::new(client, daemon_config, shutdown).run().await?;
    debug!("Shutdown report: {:?}", report);
    Ok(())
}
