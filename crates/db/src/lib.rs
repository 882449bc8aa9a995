//! Persistence layer: SQLite pool setup, migrations, models, repositories.
//!
//! The engine only depends on record-level CRUD; everything storage-specific
//! lives behind this crate.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub mod models;
pub mod repositories;

pub use sqlx::SqlitePool;

/// Embedded migrations from `crates/db/migrations`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Errors raised while opening or migrating the database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Open (creating if missing) and migrate the database at `database_url`.
///
/// A single connection is used: SQLite serializes writers anyway, and one
/// connection keeps `sqlite::memory:` databases shared across all callers.
pub async fn connect(database_url: &str) -> Result<SqlitePool, DbError> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

/// Open a fresh in-memory database, migrated and ready. Test helper.
pub async fn connect_memory() -> Result<SqlitePool, DbError> {
    connect("sqlite::memory:").await
}

/// Cheap connectivity check.
pub async fn health_check(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
