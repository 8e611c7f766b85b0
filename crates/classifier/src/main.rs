//! Tarwatch Classifier
//!
//! Polls the store for unclassified documents:
//! 1. Normalizes text and scores it against the keyword sets
//! 2. Records relevance and the matched keywords
//! 3. Fans relevant documents out into notifications for the dispatcher

mod fuzzy;
mod processor;
mod scoring;
mod template;

use crate::processor::{Classifier, ClassifierError, ClassifierSettings, KeywordRefresh};
use crate::template::Template;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tarwatch_common::{
    config::AppConfig,
    db::{DbPool, Repository},
    errors::AppError,
    telemetry, KeywordSets, Pacer, Shutdown, VERSION,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "classifier", version, about = "Classify stored rulings and queue notifications")]
struct Args {
    /// Configuration file (defaults to config/{default,$APP_ENV,local})
    #[arg(long, env = "TARWATCH_CONFIG")]
    config: Option<String>,

    /// Local keyword document, used instead of `classifier.keyword_source_url`
    #[arg(long)]
    keywords: Option<PathBuf>,
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

    info!("Starting Tarwatch Classifier v{}", VERSION);

    let keywords = load_keywords(&args, &config)
        .await
        .map_err(ClassifierError::Keywords)?;

    let db = DbPool::new(&config.database).await?;
    let store = Arc::new(Repository::new(db));

    let refresh = match (&config.classifier.keyword_source_url, &args.keywords) {
        (Some(url), None) if config.classifier.keyword_refresh_secs > 0 => Some(KeywordRefresh {
            url: url.clone(),
            every: Duration::from_secs(config.classifier.keyword_refresh_secs),
            timeout: Duration::from_secs(config.classifier.keyword_fetch_timeout_secs),
        }),
        _ => None,
    };

    let mut classifier = Classifier::new(
        store,
        keywords,
        Template::new(config.classifier.template.clone()),
        ClassifierSettings::from_config(&config),
        Pacer::new("classifier", config.classifier.max_poll_interval_secs),
    );

    if classifier.keywords().is_empty() {
        warn!("Keyword sets are empty, no document will be relevant");
    }

    if let Err(e) = classifier.run(Shutdown::on_ctrl_c(), refresh).await {
        error!(error = %e, "Classifier failed");
        return Err(e.into());
    }

    Ok(())
}

async fn load_keywords(args: &Args, config: &AppConfig) -> Result<KeywordSets, AppError> {
    if let Some(path) = &args.keywords {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::KeywordLoad {
                message: format!("{}: {}", path.display(), e),
            })?;
        return KeywordSets::from_json(&raw);
    }

    match &config.classifier.keyword_source_url {
        Some(url) => {
            KeywordSets::fetch(url, Duration::from_secs(config.classifier.keyword_fetch_timeout_secs)).await
        }
        None => Err(AppError::Configuration {
            message: "classifier.keyword_source_url or --keywords is required".to_string(),
        }),
    }
}
