pub mod memory;
mod subscriptions;
mod tokens;

use anyhow::{Context, Result};
use ci_relay_core::config::{DbConfig, InstallationConfig};
use sqlx::{Pool, Sqlite, SqlitePool, migrate::MigrateDatabase, sqlite::SqlitePoolOptions};
pub use subscriptions::SqliteSubscriptionStore;
pub use tokens::{SqliteTokenStore, TokenCipher};

#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let pool =
            SqlitePool::connect(&config.url).await.context("Failed to connect to database")?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database. Limited to one connection so every query sees the
    /// same data.
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    pub fn subscriptions(&self, installation_id: &str) -> SqliteSubscriptionStore {
        SqliteSubscriptionStore::new(self.pool.clone(), installation_id)
    }

    pub fn tokens(&self, config: &InstallationConfig) -> Result<SqliteTokenStore> {
        let cipher = TokenCipher::from_base64(&config.encryption_key)
            .context("Invalid installation encryption key")?;
        Ok(SqliteTokenStore::new(self.pool.clone(), cipher))
    }
}
