use std::process;

use crate::{config::Config, jobs::store::JobStore};

use super::store_or_exit;

pub async fn handle_reap_command(config: &Config) {
    let store = store_or_exit(config).await;

    match store.reclaim_expired(store.now()).await {
        Ok(0) => println!("✅ No expired leases"),
        Ok(reclaimed) => println!("♻️ Reclaimed {reclaimed} job(s) with expired leases"),
        Err(e) => {
            eprintln!("❌ Reclaim failed: {e}");
            process::exit(1);
        }
    }
}
