//! Periodic liveness sweep over one registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::registry::RegistryTable;

/// Sweep `table` every `interval` until `shutdown` flips to true.
pub async fn run_liveness(
    table: Arc<RegistryTable>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let registry = table.kind().name;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    info!(registry, interval_ms = interval.as_millis() as u64, "liveness sweep started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = table.sweep().await;
                if !expired.is_empty() {
                    info!(registry, count = expired.len(), ids = ?expired, "instances missed their heartbeats");
                }
            }
            _ = shutdown.changed() => {
                debug!(registry, "liveness sweep stopping");
                break;
            }
        }
    }
}
