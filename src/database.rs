use crate::config::DB_MAX_CONNECTIONS;
use eyre::{Context, Result};
use log::info;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub async fn connect(db_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(DB_MAX_CONNECTIONS)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(db_url)
        .await
        .wrap_err("Failed to connect to postgres")
}

/// Applies every pending migration. Running it twice is a no-op.
pub async fn migrate_up(pool: &PgPool) -> Result<()> {
    info!("Running migrations...");
    MIGRATOR
        .run(pool)
        .await
        .wrap_err("Failed to run migrations")?;
    info!("Running migrations done.");
    Ok(())
}
