use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time::sleep};
use tracing::{debug, error, info};

use super::store::JobStore;

/// Periodically return jobs with expired leases to the queue.
///
/// Runs on every node; the store makes concurrent reclaims safe, so no
/// leader election is needed. Store errors are logged and the next cycle
/// tries again.
pub async fn run_reaper(
    store: Arc<dyn JobStore>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("🏥 Starting lease reaper (every {:?})", interval);

    loop {
        match store.reclaim_expired(store.now()).await {
            Ok(0) => debug!("🏥 No expired leases"),
            Ok(reclaimed) => info!("🏥 Reclaimed {} job(s) with expired leases", reclaimed),
            Err(e) => error!("❌ Failed to reclaim expired leases: {}", e),
        }

        tokio::select! {
            () = sleep(interval) => {}
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("🏥 Lease reaper stopped");
}
