//! Database connection setup.

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

/// Connect to Postgres with the configured pool size.
pub async fn connect(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!(
        max_connections = config.database.max_connections,
        "Connected to database"
    );
    Ok(pool)
}
