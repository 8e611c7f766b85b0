//! Configuration management for Tarwatch workers
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with TARWATCH__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Collector (source scan) configuration
    #[serde(default)]
    #[validate(nested)]
    pub collector: CollectorConfig,

    /// Classifier worker configuration
    #[serde(default)]
    #[validate(nested)]
    pub classifier: ClassifierConfig,

    /// Dispatcher worker configuration
    #[serde(default)]
    #[validate(nested)]
    pub dispatcher: DispatcherConfig,

    /// Telegram channel configuration
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Secrets used to derive public identifiers
    #[serde(default)]
    pub security: SecurityConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DatabaseConfig {
    /// Database URL
    #[validate(length(min = 1))]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending SQL migrations at startup
    #[serde(default)]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CollectorConfig {
    /// Whether documents found by a scan should notify subscribers
    #[serde(default)]
    pub notifications_enabled: bool,

    /// Hard cap on listing pages scanned per court
    #[serde(default = "default_max_pages")]
    #[validate(range(min = 1))]
    pub max_pages: u32,

    /// Stop a court scan at the first already-known document
    #[serde(default = "default_true")]
    pub early_stop: bool,

    /// Listing page of the court portal
    #[serde(default = "default_source_base_url")]
    #[validate(length(min = 1))]
    pub source_base_url: String,

    /// Timeout for a single source request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Listing page size requested from the source
    #[serde(default = "default_listing_page_size")]
    pub listing_page_size: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ClassifierConfig {
    /// Documents processed per poll
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: u64,

    /// Upper bound of the adaptive poll interval
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_secs: u64,

    /// JSON document with whitelist/blacklist/tags/exact keyword lists
    pub keyword_source_url: Option<String>,

    /// Reload keyword sets every N seconds (0 disables)
    #[serde(default)]
    pub keyword_refresh_secs: u64,

    /// Timeout for fetching the keyword document in seconds
    #[serde(default = "default_keyword_fetch_timeout")]
    #[validate(range(min = 1))]
    pub keyword_fetch_timeout_secs: u64,

    /// Broadcast alias notified on exact-shortcut documents
    pub broadcast_alias: Option<String>,

    /// Notification text template
    #[serde(default = "default_template")]
    pub template: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct DispatcherConfig {
    /// Notifications processed per poll
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1))]
    pub batch_size: u64,

    /// Upper bound of the adaptive poll interval
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_secs: u64,

    /// Send attempts per notification within one dispatch
    #[serde(default = "default_max_send_attempts")]
    #[validate(range(min = 1))]
    pub max_send_attempts: u32,

    /// Pause after every successful send
    #[serde(default = "default_send_cooldown")]
    pub send_cooldown_ms: u64,

    /// Retry delay unit, multiplied by the attempt number
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Deep link template, `{}` is replaced by the document public id
    #[serde(default = "default_deeplink_template")]
    pub deeplink_template: String,

    /// Label of the "details" keyboard action
    #[serde(default = "default_details_label")]
    pub details_label: String,

    /// Label of the "documents" keyboard action
    #[serde(default = "default_docs_label")]
    pub docs_label: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot API token
    pub token: Option<String>,

    /// Bot API base URL
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Alias receiving collector run notices
    pub support_alias: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Secret mixed into document public ids
    #[serde(default)]
    pub link_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_max_pages() -> u32 { 10 }
fn default_source_base_url() -> String {
    "https://www.giustizia-amministrativa.it/web/guest/dcsnprr".to_string()
}
fn default_request_timeout() -> u64 { 60 }
fn default_listing_page_size() -> u32 { 100 }
fn default_keyword_fetch_timeout() -> u64 { 30 }
fn default_batch_size() -> u64 { 20 }
fn default_max_poll_interval() -> u64 { 60 }
fn default_template() -> String {
    "<b>{court}</b> - Sez. {section}\n#{kind} del {date}\n\n{text}".to_string()
}
fn default_max_send_attempts() -> u32 { 3 }
fn default_send_cooldown() -> u64 { 3000 }
fn default_retry_base_delay() -> u64 { 5000 }
fn default_deeplink_template() -> String { "https://t.me/tarwatch_bot?start={}".to_string() }
fn default_details_label() -> String { "Dettagli".to_string() }
fn default_docs_label() -> String { "Documenti".to_string() }
fn default_telegram_api_base() -> String { "https://api.telegram.org".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            notifications_enabled: false,
            max_pages: default_max_pages(),
            early_stop: true,
            source_base_url: default_source_base_url(),
            request_timeout_secs: default_request_timeout(),
            listing_page_size: default_listing_page_size(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_poll_interval_secs: default_max_poll_interval(),
            keyword_source_url: None,
            keyword_refresh_secs: 0,
            keyword_fetch_timeout_secs: default_keyword_fetch_timeout(),
            broadcast_alias: None,
            template: default_template(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_poll_interval_secs: default_max_poll_interval(),
            max_send_attempts: default_max_send_attempts(),
            send_cooldown_ms: default_send_cooldown(),
            retry_base_delay_ms: default_retry_base_delay(),
            deeplink_template: default_deeplink_template(),
            details_label: default_details_label(),
            docs_label: default_docs_label(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files, then validate it
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., TARWATCH__DISPATCHER__BATCH_SIZE=50
            .add_source(
                Environment::with_prefix("TARWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    /// Load from a specific file, still honouring environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("TARWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self> {
        let parsed: AppConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Pause between successful sends
    pub fn send_cooldown(&self) -> Duration {
        Duration::from_millis(self.dispatcher.send_cooldown_ms)
    }

    /// Retry delay unit for failed sends
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.dispatcher.retry_base_delay_ms)
    }
}
