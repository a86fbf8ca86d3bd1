use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, now_ms};

/// Background task that enforces confirmation windows proactively: notified
/// entries past `expires_at` are expired and the queue cascades, so the
/// waiting list makes progress even when no request happens to trigger it.
pub async fn run_sweeper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(engine.config.sweep_interval);
    loop {
        interval.tick().await;
        let expired = engine.collect_expired_notifications(now_ms());
        for (entry_id, _room_id) in expired {
            match engine.expire_notification(entry_id).await {
                Ok(true) => info!("expired waitlist entry {entry_id}"),
                Ok(false) => {} // confirmed or already expired in the meantime
                Err(e) => tracing::debug!("sweeper skip {entry_id}: {e}"),
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL after {appends} appends"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
