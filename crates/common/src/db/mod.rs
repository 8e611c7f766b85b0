//! Database layer for Tarwatch
//!
//! Provides:
//! - SeaORM entity models
//! - The PostgreSQL implementation of [`Store`](crate::store::Store)
//! - Connection pool management and schema migrations

pub mod models;
mod repository;

pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration, applying pending
    /// migrations when `run_migrations` is set
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let mut opts = ConnectOptions::new(&config.url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(opts)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect: {}", e),
            })?;

        let pool = Self { conn };

        if config.run_migrations {
            pool.migrate().await?;
        }

        info!("Database connection established");
        Ok(pool)
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply the embedded SQL migrations
    pub async fn migrate(&self) -> Result<()> {
        info!("Applying database migrations...");
        sqlx::migrate!("./migrations")
            .run(self.conn.get_postgres_connection_pool())
            .await?;
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.conn
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Ping failed: {}", e),
            })?;
        Ok(())
    }
}
