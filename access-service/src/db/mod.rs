//! Store backend selection and PostgreSQL pool setup.

use crate::config::{DatabaseConfig, StoreBackend};
use crate::services::{Database, Stores};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "PostgreSQL pool ready"
    );
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Schema migrations applied");
    Ok(())
}

/// Opens the configured backend. Postgres is migrated before use; the
/// in-process store starts empty.
pub async fn open_stores(config: &DatabaseConfig) -> Result<Stores, AppError> {
    match config.backend {
        StoreBackend::Postgres => {
            let pool = create_pool(config).await?;
            run_migrations(&pool).await?;
            Ok(Stores::from_backend(Arc::new(Database::new(pool))))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-process store; data is lost on restart");
            Ok(Stores::in_memory())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::InviteLedger;

    #[tokio::test]
    async fn memory_backend_needs_no_connection() {
        let config = DatabaseConfig {
            backend: StoreBackend::Memory,
            url: String::new(),
            max_connections: 1,
            min_connections: 0,
        };

        let stores = open_stores(&config).await.unwrap();
        assert!(stores.invites.list_invites().await.unwrap().is_empty());
    }
}
