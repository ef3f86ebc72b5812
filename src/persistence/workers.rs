use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lapin::message::Delivery;
use tracing::{error, info, warn};

use crate::bus::{Bus, TICKS_DLQ, TICKS_QUEUE};
use crate::cache::Cache;
use crate::core::AppError;
use crate::db::Db;
use crate::feed::NormalizedTick;

use super::ticks_dao;

const MAX_DECODE_FAILURES_BEFORE_DLQ: u32 = 3;

/// Consumes the `ticks` queue, batches deliveries by count/time
/// (`BATCH_SIZE`/`BATCH_TIMEOUT_SECONDS`), and flushes each batch with one
/// UPSERT round trip. DB failures nack-requeue the whole batch so nothing is
/// lost; repeated decode failures on the same delivery are dead-lettered
/// rather than looping forever.
pub struct PersistenceWorker {
    bus: Arc<Bus>,
    db: Arc<Db>,
    cache: Arc<Cache>,
    batch_size: usize,
    batch_timeout: Duration,
}

struct PendingRow {
    tick: NormalizedTick,
    delivery_tag: u64,
}

impl PersistenceWorker {
    pub fn new(bus: Arc<Bus>, db: Arc<Db>, cache: Arc<Cache>, batch_size: usize, batch_timeout: Duration) -> Self {
        Self {
            bus,
            db,
            cache,
            batch_size,
            batch_timeout,
        }
    }

    pub async fn run(&self, consumer_tag: &str) -> Result<(), AppError> {
        self.bus.declare_durable_queue(TICKS_QUEUE).await?;
        self.bus.declare_durable_queue(TICKS_DLQ).await?;

        let mut consumer = self.bus.consume(TICKS_QUEUE, consumer_tag).await?;
        let mut batch: Vec<PendingRow> = Vec::with_capacity(self.batch_size);
        let mut decode_failures: u32 = 0;
        let mut ticker = tokio::time::interval(self.batch_timeout);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = consumer.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            match self.decode(&delivery) {
                                Ok(tick) => {
                                    decode_failures = 0;
                                    batch.push(PendingRow { tick, delivery_tag: delivery.delivery_tag });
                                    if batch.len() >= self.batch_size {
                                        self.flush(&mut batch).await;
                                    }
                                }
                                Err(e) => {
                                    decode_failures += 1;
                                    warn!(error = %e, "failed to decode queued tick");
                                    if decode_failures >= MAX_DECODE_FAILURES_BEFORE_DLQ {
                                        let _ = self.bus.publish_persistent(TICKS_DLQ, &delivery.data).await;
                                        let _ = self.bus.nack_drop(delivery.delivery_tag).await;
                                    } else {
                                        let _ = self.bus.nack_requeue(delivery.delivery_tag).await;
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "bus consumer error");
                            return Err(AppError::Bus(e));
                        }
                        None => {
                            info!("ticks consumer stream ended");
                            return Ok(());
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(&mut batch).await;
                    }
                }
            }
        }
    }

    fn decode(&self, delivery: &Delivery) -> Result<NormalizedTick, AppError> {
        bincode::deserialize(&delivery.data).map_err(|e| AppError::Decode(e.to_string()))
    }

    async fn flush(&self, batch: &mut Vec<PendingRow>) {
        if batch.is_empty() {
            return;
        }
        let ticks: Vec<NormalizedTick> = batch.iter().map(|r| r.tick.clone()).collect();

        match ticks_dao::upsert_batch(self.db.client(), &ticks).await {
            Ok(rows) => {
                for row in batch.iter() {
                    if let Err(e) = self.bus.ack(row.delivery_tag).await {
                        warn!(error = %e, "ack failed after successful flush");
                    }
                }
                self.cache
                    .set_with_ttl("health:persistence:last_flush_rows", &rows.to_string(), Duration::from_secs(300))
                    .await
                    .ok();
                batch.clear();
            }
            Err(e) => {
                warn!(error = %e, batch_len = batch.len(), "batch upsert failed; requeueing");
                for row in batch.iter() {
                    let _ = self.bus.nack_requeue(row.delivery_tag).await;
                }
                batch.clear();
            }
        }
    }
}
