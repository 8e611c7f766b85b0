//! Tarwatch Collector
//!
//! Runs one scan of every tracked court and exits:
//! 1. Fetches each court listing, newest first
//! 2. Skips rulings already stored, stopping at the first known one
//! 3. Stores new rulings as unclassified documents for the classifier

mod processor;

use crate::processor::{Collector, CollectorSettings};
use clap::Parser;
use std::sync::Arc;
use tarwatch_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    source::PortalSource,
    telemetry, Shutdown, VERSION,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "collector", version, about = "Scan court listings for new rulings")]
struct Args {
    /// Override `collector.notifications_enabled` for this run
    #[arg(long)]
    notifications: Option<bool>,

    /// Configuration file (defaults to config/{default,$APP_ENV,local})
    #[arg(long, env = "TARWATCH_CONFIG")]
    config: Option<String>,
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
    telemetry::install_metrics_exporter(&config.observability)?;

    info!("Starting Tarwatch Collector v{}", VERSION);

    let db = DbPool::new(&config.database).await?;
    let store = Arc::new(Repository::new(db));
    let source = Arc::new(PortalSource::new(&config.collector)?);

    let settings = CollectorSettings::from_config(&config, args.notifications);
    let collector = Collector::new(store, source, settings);

    let shutdown = Shutdown::on_ctrl_c();

    match collector.run(&shutdown).await {
        Ok(report) => {
            info!(
                created = report.documents_created,
                duplicates = report.duplicates,
                failed = report.courts_failed,
                "Collector finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, code = e.code().as_code(), "Collector failed");
            Err(e.into())
        }
    }
}
