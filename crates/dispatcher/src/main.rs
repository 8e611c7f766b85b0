//! Tarwatch Dispatcher
//!
//! Delivers queued notifications through Telegram:
//! 1. Takes pending notifications, most urgent first
//! 2. Attaches deep-link actions for the referenced document
//! 3. Sends with retries and records the outcome
//!
//! `retract` and `requeue` act on a single notification and exit.

mod keyboard;
mod processor;

use crate::keyboard::Keyboard;
use crate::processor::{Dispatcher, DispatcherSettings};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tarwatch_common::{
    channel::TelegramChannel,
    config::AppConfig,
    db::{DbPool, Repository},
    telemetry, Pacer, Shutdown, VERSION,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dispatcher", version, about = "Deliver queued notifications")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (defaults to config/{default,$APP_ENV,local})
    #[arg(long, env = "TARWATCH_CONFIG", global = true)]
    config: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deliver notifications until interrupted (default)
    Run,
    /// Delete a delivered message from the channel
    Retract {
        #[arg(long)]
        id: i64,
    },
    /// Clear the error of a parked notification so it is retried
    Requeue {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };

    telemetry::init_tracing(&config.observability);

    let command = args.command.unwrap_or(Command::Run);
    if matches!(command, Command::Run) {
        telemetry::install_metrics_exporter(&config.observability)?;
    }

    info!("Starting Tarwatch Dispatcher v{}", VERSION);

    let db = DbPool::new(&config.database).await?;
    let repository = Repository::new(db);
    repository.ping().await?;
    info!(
        pending = repository.count_pending_notifications().await?,
        "Notification queue"
    );
    let store = Arc::new(repository);
    let channel = Arc::new(TelegramChannel::new(&config.telegram)?);

    let mut dispatcher = Dispatcher::new(
        store,
        channel,
        Keyboard::from_config(&config.dispatcher),
        DispatcherSettings::from_config(&config),
        Pacer::new("dispatcher", config.dispatcher.max_poll_interval_secs),
    );

    let result = match command {
        Command::Run => dispatcher.run(Shutdown::on_ctrl_c()).await,
        Command::Retract { id } => dispatcher.retract(id).await,
        Command::Requeue { id } => dispatcher.requeue(id).await,
    };

    if let Err(e) = result {
        error!(error = %e, "Dispatcher failed");
        return Err(e.into());
    }

    Ok(())
}
