use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, DatabaseConnection, DbErr};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DatabaseConfig;

pub mod migrations;
pub mod models;

/// Open the connection pool for this process.
///
/// The pool keeps `pool_size` connections warm and may grow by
/// `max_overflow` under load, so the fleet-wide connection count stays
/// predictable. The caller owns the pool and closes it at shutdown.
pub async fn setup_database_connection(
    db_config: &DatabaseConfig,
) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(db_config.url.clone());

    options.sqlx_logging(false); // Disable SQL query logging to reduce noise
    options.min_connections(db_config.pool_size);
    options.max_connections(db_config.pool_size + db_config.max_overflow);
    options.acquire_timeout(Duration::from_secs(db_config.acquire_timeout_seconds));

    let mut attempt = 1;
    loop {
        debug!(
            "Connecting to database (attempt {}/{})",
            attempt, db_config.connect_retries
        );

        match connect(options.clone()).await {
            Ok(db) => return Ok(db),
            Err(e) if attempt < db_config.connect_retries => {
                warn!(
                    "🔌 Database connection attempt {} failed: {}. Retrying in {}s...",
                    attempt, e, db_config.connect_retry_delay_seconds
                );
                sleep(Duration::from_secs(db_config.connect_retry_delay_seconds)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn connect(options: ConnectOptions) -> Result<DatabaseConnection, DbErr> {
    let db = sea_orm::Database::connect(options).await?;
    // Fail fast if the server accepted the pool but cannot run queries
    db.execute_unprepared("SELECT 1").await?;
    Ok(db)
}
