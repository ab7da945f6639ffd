use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that applies per-conversation retention.
///
/// Runs on an interval and tombstones messages older than their
/// conversation's `autoDeleteAfterDays` where auto-delete is enabled.
pub async fn run_retention_loop(engine: Engine, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        match engine.purge_expired().await {
            Ok(count) => {
                if count > 0 {
                    info!("Retention: deleted {} expired messages", count);
                }
            }
            Err(e) => {
                warn!("Retention sweep error: {}", e);
            }
        }
    }
}
