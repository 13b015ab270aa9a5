mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nightrelay_core::{load_config, validate_config};

use cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    match dispatch(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    info!("Loading configuration from {:?}", cli.config);
    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    validate_config(&config).context("Configuration validation failed")?;

    match cli.command {
        Command::Run {
            night,
            skip_confirmation,
            dry_run,
        } => commands::run(&config, night, skip_confirmation, dry_run).await,
        Command::Status { json } => commands::status(&config, json).map(|_| 0),
        Command::History { night } => commands::history(&config, &night).map(|_| 0),
        Command::Reset { night } => commands::reset(&config, &night).map(|_| 0),
        Command::Skip { night, reason } => commands::skip(&config, &night, &reason).map(|_| 0),
        Command::Reconcile => commands::reconcile(&config).await.map(|_| 0),
        Command::Config => commands::show_config(&config).map(|_| 0),
    }
}
