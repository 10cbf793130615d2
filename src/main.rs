//! CLI for Infocenter
//!
//! Loads `.env`, then the configuration file and `INFOCENTER__*` variables,
//! then applies command line overrides and runs the server until Ctrl-C.

use std::process::ExitCode;

use clap::Parser;
use infocenter::broker::Broker;
use infocenter::config::{DEFAULT_CONFIG_FILE, Settings, load_config_from};
use infocenter::transport::start_http_server;
use infocenter::utils::error::Result;
use infocenter::utils::logging;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "infocenter", about = "Topic broadcaster over Server-Sent Events")]
struct Cli {
    /// Configuration file, without extension
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Address to bind, overrides `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overrides `server.port`
    #[arg(long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace), overrides `log.level`
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = load_config_from(&self.config)?;
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.log.level = level.clone();
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log.level);

    match run_server(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Server failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_server(settings: Settings) -> Result<()> {
    let (broker, hub) = Broker::new().spawn();

    tokio::select! {
        result = start_http_server(&settings, broker) => {
            error!("HTTP server exited unexpectedly.");
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    hub.abort();
    Ok(())
}
