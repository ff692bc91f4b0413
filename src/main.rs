//! Token Broker - hands out short-lived access tokens over mutual TLS.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use token_broker::{cli::Cli, config::BrokerConfig, gateway::Broker, setup_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match BrokerConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        service_account = %config.token.service_account,
        "Starting token broker"
    );

    let broker = match Broker::new(config) {
        Ok(broker) => broker,
        Err(e) => {
            error!("Failed to create broker: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = broker.run().await {
        if e.is_startup() {
            error!("Failed to start broker: {e}");
        } else {
            error!("Broker error: {e}");
        }
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
