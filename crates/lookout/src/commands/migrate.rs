//! `lookout migrate`: apply embedded database migrations.

use lookout_db::DatabaseConfig;

use super::CommandError;

pub async fn run() -> Result<(), CommandError> {
    let config = DatabaseConfig::from_env();
    let pool = lookout_db::create_pool(&config).await?;

    lookout_db::run_migrations(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(())
}
