use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Cache;

/// Process-wide counters surfaced to Redis under `health:ingestion` so an
/// external monitor can page on a stalled feed without tailing logs.
#[derive(Default)]
pub struct IngestionHealth {
    pub ticks_published: AtomicU64,
    pub frames_dropped: AtomicU64,
}

impl IngestionHealth {
    pub fn record_published(&self) {
        self.ticks_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Periodically publish a snapshot to the cache. Intended to run as a
    /// background task alongside the transport/publisher pair.
    pub async fn run_heartbeat(self: Arc<Self>, cache: Arc<Cache>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = serde_json::json!({
                "ticks_published": self.ticks_published.load(Ordering::Relaxed),
                "frames_dropped": self.frames_dropped.load(Ordering::Relaxed),
            });
            if let Ok(payload) = serde_json::to_string(&snapshot) {
                cache
                    .set_with_ttl("health:ingestion", &payload, interval * 3)
                    .await
                    .ok();
            }
        }
    }
}
