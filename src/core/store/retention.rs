// Periodic retention sweep

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::logging::get_debug_logger;
use crate::core::store::Store;
use crate::core::types::epoch_ms;

pub const DEFAULT_RETENTION_DAYS: u64 = 30;
const SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Spawn a background sweep removing outages and session history older than
/// `retention_days`. Runs once at startup, then every six hours.
pub fn spawn_retention_sweep(
    store: Arc<Store>,
    retention_days: u64,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if store.is_writable() {
                let cutoff = epoch_ms().saturating_sub(retention_days * 24 * 60 * 60 * 1_000);
                if let Err(e) = store.purge(cutoff).await {
                    get_debug_logger().warn("store", format!("retention sweep failed: {}", e));
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }
        }
    })
}
