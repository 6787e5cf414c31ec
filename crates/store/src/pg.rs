use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use postbote_core::config::DatabaseConfig;

use crate::error::StoreError;

/// Create a PostgreSQL connection pool and apply migrations.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    info!("Connecting to PostgreSQL: {}", config.masked_url());

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    match sqlx::migrate!("../../migrations").run(&pool).await {
        Ok(()) => info!("Database migrations applied"),
        Err(e) => {
            // Schema may be managed out-of-band; the worker can still run.
            warn!("Failed to run migrations: {} — assuming schema is current", e);
        }
    }

    Ok(pool)
}
