pub mod enqueue;
pub mod inspect;
pub mod migrate;
pub mod reap;
pub mod version;
pub mod work;

use std::process;

use sea_orm::DatabaseConnection;

use crate::{config::Config, database::setup_database_connection, jobs::store::PostgresJobStore};

/// Connect for a one-shot command, exiting with status 1 on failure
async fn connect_or_exit(config: &Config) -> DatabaseConnection {
    match setup_database_connection(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("❌ Failed to connect to the database: {e}");
            process::exit(1);
        }
    }
}

async fn store_or_exit(config: &Config) -> PostgresJobStore {
    let db = connect_or_exit(config).await;
    PostgresJobStore::new(db, config.jobs.retry.policy())
}
