//! Postgres persistence layer: connection pool, embedded migrations, and the
//! scan/job repositories.

pub mod models;
pub mod repositories;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub type DbPool = sqlx::PgPool;

/// Errors surfaced by the persistence layer.
///
/// "Not found" is never an error here; absent rows are expressed as `None`
/// by the repository methods.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A database error from sqlx (I/O, constraint violations, pool).
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A stored row could not be decoded into its domain representation.
    #[error("corrupt row: {0}")]
    Decode(String),
}

/// Pool settings loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Postgres connection string (`DATABASE_URL`).
    pub url: String,
    /// Maximum number of open connections (default: 10).
    pub max_connections: u32,
    /// How long to wait for a free connection (default: 10 s).
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                           | Required | Default |
    /// |-----------------------------------|----------|---------|
    /// | `DATABASE_URL`                    | **yes**  | --      |
    /// | `LOOKOUT_DB_MAX_CONNECTIONS`      | no       | `10`    |
    /// | `LOOKOUT_DB_ACQUIRE_TIMEOUT_SECS` | no       | `10`    |
    ///
    /// # Panics
    ///
    /// Panics if `DATABASE_URL` is not set.
    pub fn from_env() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let max_connections: u32 = std::env::var("LOOKOUT_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("LOOKOUT_DB_MAX_CONNECTIONS must be a valid u32");

        let acquire_timeout_secs: u64 = std::env::var("LOOKOUT_DB_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("LOOKOUT_DB_ACQUIRE_TIMEOUT_SECS must be a valid u64");

        Self {
            url,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        }
    }
}

/// Create a connection pool from the given configuration.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.url)
        .await
}

/// Verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await.map(|_| ())
}

/// Apply all embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
