use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, instrument};

use crate::config::DatabaseConfig;
use crate::error::{NotifierError, Result};
use crate::store::PgNotificationStore;

/// Schema for the default notification and lease tables
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Pooled connection to the notification database
#[derive(Debug, Clone)]
pub struct DatabaseConnection {
    pool: PgPool,
    config: DatabaseConfig,
}

impl DatabaseConnection {
    /// Open a pool and apply migrations when configured to
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| NotifierError::query_failed("connect", e.to_string()))?;

        let connection = Self::from_pool(pool, config.clone());
        if config.run_migrations {
            connection.migrate().await?;
        }
        Ok(connection)
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, config: DatabaseConfig) -> Self {
        Self { pool, config }
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| NotifierError::query_failed("migrate", e.to_string()))?;
        info!("Notification schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Store over the configured tables
    pub fn notification_store(&self) -> Result<PgNotificationStore> {
        PgNotificationStore::from_config(self.pool.clone(), &self.config)
    }

    pub async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;

        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
