use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_postgres::Client;

use crate::cache::Cache;
use crate::core::AppError;

use super::analyzer::{MarketState, SignalSnapshot};
use super::tracked_level::BreakKind;

const SIGNAL_STATE_TTL: Duration = Duration::from_secs(60);

fn market_state_str(state: MarketState) -> &'static str {
    match state {
        MarketState::Bullish => "bullish",
        MarketState::Bearish => "bearish",
        MarketState::Neutral => "neutral",
    }
}

/// Persist one evaluation's result into `depth_signals` and best-effort
/// cache the latest state under `signal_state:<security_id>` with a 60s TTL
/// (§4.5.4, §6), roughly one evaluation cycle, so a stale cache entry
/// expires before it could mislead a reader about current market state.
pub async fn persist_signal(client: &Client, at: DateTime<Utc>, snapshot: &SignalSnapshot) -> Result<(), AppError> {
    let key_levels = json!(snapshot
        .key_levels
        .iter()
        .map(|l| json!({
            "price": l.price,
            "side": format!("{:?}", l.side),
            "status": format!("{:?}", l.stage),
            "orders": l.orders,
            "strength_ratio": l.strength_ratio,
            "age_seconds": l.age_seconds,
            "tests": l.tests,
        }))
        .collect::<Vec<_>>());

    let absorptions = json!(snapshot
        .absorptions
        .iter()
        .map(|a| json!({
            "price": a.price,
            "side": format!("{:?}", a.side),
            "kind": format!("{:?}", a.kind),
            "orders_before": a.orders_before,
            "orders_now": a.orders_now,
            "reduction_pct": a.reduction_pct,
            "breakthrough": a.kind == BreakKind::Breakthrough,
        }))
        .collect::<Vec<_>>());

    client
        .execute(
            "INSERT INTO depth_signals (time, security_id, current_price, key_levels, absorptions,
                                         pressure_30s, pressure_60s, pressure_120s, market_state)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (time, security_id) DO NOTHING",
            &[
                &at,
                &snapshot.security_id,
                &snapshot.current_price,
                &key_levels,
                &absorptions,
                &snapshot.pressure_30s,
                &snapshot.pressure_60s,
                &snapshot.pressure_120s,
                &market_state_str(snapshot.market_state),
            ],
        )
        .await?;

    Ok(())
}

pub async fn cache_signal_state(cache: &Cache, snapshot: &SignalSnapshot) {
    let payload = json!({
        "current_price": snapshot.current_price,
        "pressure_30s": snapshot.pressure_30s,
        "pressure_60s": snapshot.pressure_60s,
        "pressure_120s": snapshot.pressure_120s,
        "market_state": market_state_str(snapshot.market_state),
    });
    let key = format!("signal_state:{}", snapshot.security_id);
    cache.set_with_ttl(&key, &payload.to_string(), SIGNAL_STATE_TTL).await.ok();
}
