//! Event retention: a background task that prunes old event records.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::storage::RelayDatabase;

/// Spawn the pruning loop. Events older than `retention_days` are deleted on
/// every tick; deletion is irreversible.
pub fn spawn_retention_task(
    db: RelayDatabase,
    retention_days: u32,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip first immediate tick
        loop {
            ticker.tick().await;
            match db.prune_events_older_than(retention_days).await {
                Ok(removed) if removed > 0 => {
                    info!(removed, retention_days, "Pruned expired events");
                }
                Err(error) => {
                    warn!(%error, "Event pruning failed");
                }
                _ => {}
            }
        }
    })
}
