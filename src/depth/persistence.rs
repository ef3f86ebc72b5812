use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_postgres::Client;

use crate::cache::Cache;
use crate::core::AppError;

use super::decoder::{DepthLevel200, DepthSide};
use super::snapshot::DepthSnapshot;

const BATCH_ROW_LIMIT: usize = 400;

/// Persist one snapshot's bid and ask rows into `depth_levels_200`, batching
/// in chunks of `BATCH_ROW_LIMIT` rows per statement. Conflicts are ignored:
/// a (time, security_id, side, level_num) collision means this exact level
/// was already recorded, so `DO NOTHING` is correct rather than an upsert.
pub async fn persist_snapshot(
    client: &Client,
    security_id: &str,
    at: DateTime<Utc>,
    snapshot: &DepthSnapshot,
) -> Result<u64, AppError> {
    let mut rows: Vec<(DepthSide, i32, DepthLevel200)> = Vec::with_capacity(snapshot.bids.len() + snapshot.asks.len());
    for (i, level) in snapshot.bids.iter().enumerate() {
        rows.push((DepthSide::Bid, i as i32, *level));
    }
    for (i, level) in snapshot.asks.iter().enumerate() {
        rows.push((DepthSide::Ask, i as i32, *level));
    }

    let mut total = 0u64;
    for chunk in rows.chunks(BATCH_ROW_LIMIT) {
        let mut times = Vec::with_capacity(chunk.len());
        let mut sids = Vec::with_capacity(chunk.len());
        let mut sides = Vec::with_capacity(chunk.len());
        let mut level_nums = Vec::with_capacity(chunk.len());
        let mut prices = Vec::with_capacity(chunk.len());
        let mut qtys = Vec::with_capacity(chunk.len());
        let mut order_counts = Vec::with_capacity(chunk.len());

        for (side, level_num, level) in chunk {
            times.push(at);
            sids.push(security_id.to_string());
            sides.push(if *side == DepthSide::Bid { "bid" } else { "ask" });
            level_nums.push(*level_num);
            prices.push(level.price);
            qtys.push(level.quantity);
            order_counts.push(level.order_count);
        }

        let rows_affected = client
            .execute(
                "INSERT INTO depth_levels_200 (time, security_id, side, level_num, price, quantity, order_count)
                 SELECT * FROM UNNEST($1::timestamptz[], $2::text[], $3::text[], $4::int[], $5::float8[], $6::bigint[], $7::int[])
                 ON CONFLICT (time, security_id, side, level_num) DO NOTHING",
                &[&times, &sids, &sides, &level_nums, &prices, &qtys, &order_counts],
            )
            .await?;
        total += rows_affected;
    }

    Ok(total)
}

/// Best-effort publish of a compact top-20 view to
/// `depth_snapshots:<security_id>`, consumed by dashboards. Never blocks
/// persistence: failures are logged by `Cache::publish_best_effort` itself.
pub async fn publish_top_levels(cache: &Arc<Cache>, security_id: &str, snapshot: &DepthSnapshot) {
    let top_bids: Vec<_> = snapshot.bids.iter().take(20).collect();
    let top_asks: Vec<_> = snapshot.asks.iter().take(20).collect();
    let payload = json!({
        "security_id": security_id,
        "bids": top_bids.iter().map(|l| json!({"price": l.price, "quantity": l.quantity, "order_count": l.order_count})).collect::<Vec<_>>(),
        "asks": top_asks.iter().map(|l| json!({"price": l.price, "quantity": l.quantity, "order_count": l.order_count})).collect::<Vec<_>>(),
    });
    cache
        .publish_best_effort(&format!("depth_snapshots:{security_id}"), &payload.to_string())
        .await;
}
