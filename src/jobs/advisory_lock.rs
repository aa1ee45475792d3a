use sea_orm::DatabaseConnection;
use sqlx::{pool::PoolConnection, Postgres};
use std::{future::Future, time::Duration};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, warn};

/// Advisory lock keys for tasks that must run on one node at a time
pub mod lock_keys {
    /// Lock key for the cron scheduler
    pub const SCHEDULER: i64 = 0x5343_4845_4455_4C45; // "SCHEDULE" in hex

    /// Lock key for terminal job cleanup
    pub const CLEANUP: i64 = 0x434C_4541_4E55_5000; // "CLEANUP" in hex
}

/// Tries to acquire a `PostgreSQL` advisory lock.
///
/// Advisory locks belong to a session, so the connection that took the lock
/// is returned and must be kept until [`release_lock`].
pub async fn try_acquire_lock(
    db: &DatabaseConnection,
    key: i64,
) -> Result<Option<PoolConnection<Postgres>>, sqlx::Error> {
    let mut conn = db.get_postgres_connection_pool().acquire().await?;

    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await?;

    Ok(acquired.then_some(conn))
}

/// Explicitly releases a `PostgreSQL` advisory lock on the session holding it
pub async fn release_lock(mut conn: PoolConnection<Postgres>, key: i64) -> Result<bool, sqlx::Error> {
    let released = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .fetch_one(&mut *conn)
        .await;

    if released.is_err() {
        // Closing the session drops every lock it holds
        conn.close().await?;
    }
    released
}

/// Run `task_fn` on whichever node holds the advisory lock for `lock_key`.
///
/// Other nodes poll for the lock with jitter. The task is restarted after a
/// delay if it returns, and everything stops once `shutdown` turns `true`.
pub async fn run_with_advisory_lock<F, Fut>(
    db: DatabaseConnection,
    lock_key: i64,
    task_name: &str,
    mut shutdown: watch::Receiver<bool>,
    task_fn: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut restart_count = 0;

    while !*shutdown.borrow() {
        let wait = match try_acquire_lock(&db, lock_key).await {
            Ok(Some(conn)) => {
                debug!("🔒 Acquired advisory lock for {}", task_name);

                let stopped = tokio::select! {
                    () = task_fn() => false,
                    _ = shutdown.changed() => true,
                };

                match release_lock(conn, lock_key).await {
                    Ok(true) => {
                        debug!("🔓 Released advisory lock for {}", task_name);
                    }
                    Ok(false) => {
                        debug!(
                            "🔓 Advisory lock for {} was already released (possibly by connection close)",
                            task_name
                        );
                    }
                    Err(e) => {
                        warn!("Failed to release advisory lock for {}: {}", task_name, e);
                    }
                }

                if stopped {
                    break;
                }

                restart_count += 1;
                error!(
                    "💥 {} stopped unexpectedly (restart #{}) - restarting in 10s...",
                    task_name, restart_count
                );
                Duration::from_secs(10)
            }
            Ok(None) => {
                debug!(
                    "🔒 Advisory lock for {} held by another instance, waiting...",
                    task_name
                );

                // Add jitter to prevent thundering herd
                Duration::from_secs(5) + Duration::from_millis(fastrand::u64(0..2000))
            }
            Err(e) => {
                error!(
                    "❌ Failed to acquire advisory lock for {}: {}",
                    task_name, e
                );
                Duration::from_secs(10)
            }
        };

        tokio::select! {
            () = sleep(wait) => {}
            result = shutdown.changed() => {
                if result.is_err() {
                    break;
                }
            }
        }
    }

    debug!("{} stopped", task_name);
}
