use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::warn;

use crate::depth::DepthSide;

use super::analyzer::{AbsorptionReport, MarketState, SignalSnapshot, PRESSURE_ALERT_THRESHOLD};
use super::tracked_level::BreakKind;

/// Cooldown window so the same (security, signal kind, price bucket, side)
/// doesn't fire a webhook on every 10s evaluation tick while a level lingers
/// in the same state (§4.5.5).
const DEDUP_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Key-level alert filter (§4.5.6): the level's strength must be at least
/// this many times the book's mean order count...
const KEY_LEVEL_ALERT_STRENGTH: f64 = 3.0;
/// ...and must have persisted at least this long.
const KEY_LEVEL_ALERT_MIN_AGE: Duration = Duration::from_secs(10);
/// Absorption alert filter (§4.5.6): reduction must reach this threshold,
/// stricter than the 60% that merely qualifies an absorption for reporting.
const ABSORPTION_ALERT_REDUCTION: f64 = 0.70;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SignalKind {
    KeyLevel,
    Breakthrough,
    Cancellation,
    Pressure,
}

fn price_bucket(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// Posts webhook notifications for newly-confirmed key levels, absorption
/// events, and pressure-driven market state transitions, deduplicated by
/// (security, signal kind, price bucket, side) within `DEDUP_COOLDOWN`.
/// Unconditional startup/shutdown messages bypass the cooldown entirely
/// since they happen at most once per process lifetime.
pub struct AlertDispatcher {
    webhook_url: Option<String>,
    http: reqwest::Client,
    timeout: Duration,
    last_sent: HashMap<(String, SignalKind, i64, DepthSide), Instant>,
    last_market_state: HashMap<String, MarketState>,
}

impl AlertDispatcher {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
            timeout,
            last_sent: HashMap::new(),
            last_market_state: HashMap::new(),
        }
    }

    pub async fn notify_startup(&self, security_id: &str) {
        self.send_unconditional(&json!({
            "event": "startup",
            "security_id": security_id,
        }))
        .await;
    }

    pub async fn notify_shutdown(&self, security_id: &str) {
        self.send_unconditional(&json!({
            "event": "shutdown",
            "security_id": security_id,
        }))
        .await;
    }

    /// Applies the three §4.5.6 alert filters on top of the dedup cooldown:
    /// a key level only alerts once it is at least `KEY_LEVEL_ALERT_STRENGTH`
    /// times the mean and has held for `KEY_LEVEL_ALERT_MIN_AGE`; an
    /// absorption only alerts as a confirmed breakthrough reducing order
    /// count by `ABSORPTION_ALERT_REDUCTION` or more; pressure only alerts
    /// when the primary 60s reading passes `PRESSURE_ALERT_THRESHOLD` and
    /// the market state actually transitioned this evaluation. All three
    /// signals are still persisted regardless of whether they clear their
    /// alert filter; this only gates the webhook.
    pub async fn notify_snapshot(&mut self, snapshot: &SignalSnapshot) {
        let now = Instant::now();

        for level in &snapshot.key_levels {
            if level.strength_ratio < KEY_LEVEL_ALERT_STRENGTH || level.age_seconds < KEY_LEVEL_ALERT_MIN_AGE.as_secs_f64() {
                continue;
            }
            let key = (snapshot.security_id.clone(), SignalKind::KeyLevel, price_bucket(level.price), level.side);
            if self.should_send(&key, now) {
                self.send_unconditional(&json!({
                    "event": "key_level",
                    "security_id": snapshot.security_id,
                    "price": level.price,
                    "side": side_str(level.side),
                    "status": format!("{:?}", level.stage),
                    "strength_ratio": level.strength_ratio,
                    "age_seconds": level.age_seconds,
                }))
                .await;
                self.last_sent.insert(key, now);
            }
        }

        for absorption in &snapshot.absorptions {
            if absorption.reduction_pct < ABSORPTION_ALERT_REDUCTION || absorption.kind != BreakKind::Breakthrough {
                continue;
            }
            let key = (snapshot.security_id.clone(), SignalKind::Breakthrough, price_bucket(absorption.price), absorption.side);
            if self.should_send(&key, now) {
                self.send_absorption(&snapshot.security_id, absorption).await;
                self.last_sent.insert(key, now);
            }
        }

        let transitioned = self
            .last_market_state
            .insert(snapshot.security_id.clone(), snapshot.market_state)
            .is_some_and(|prior| prior != snapshot.market_state);
        if transitioned && (snapshot.pressure_60s.abs() >= PRESSURE_ALERT_THRESHOLD) {
            let key = (snapshot.security_id.clone(), SignalKind::Pressure, 0, DepthSide::Bid);
            if self.should_send(&key, now) {
                self.send_unconditional(&json!({
                    "event": "pressure",
                    "security_id": snapshot.security_id,
                    "pressure_60s": snapshot.pressure_60s,
                    "market_state": format!("{:?}", snapshot.market_state),
                }))
                .await;
                self.last_sent.insert(key, now);
            }
        }
    }

    fn should_send(&self, key: &(String, SignalKind, i64, DepthSide), now: Instant) -> bool {
        match self.last_sent.get(key) {
            Some(last) => now.duration_since(*last) >= DEDUP_COOLDOWN,
            None => true,
        }
    }

    async fn send_absorption(&self, security_id: &str, absorption: &AbsorptionReport) {
        let kind = match absorption.kind {
            BreakKind::Breakthrough => "breakthrough",
            BreakKind::Cancellation => "cancellation",
        };
        self.send_unconditional(&json!({
            "event": "absorption",
            "security_id": security_id,
            "price": absorption.price,
            "side": side_str(absorption.side),
            "kind": kind,
            "orders_before": absorption.orders_before,
            "orders_now": absorption.orders_now,
            "reduction_pct": absorption.reduction_pct,
        }))
        .await;
    }

    async fn send_unconditional(&self, payload: &serde_json::Value) {
        let Some(url) = &self.webhook_url else {
            return;
        };
        let result = tokio::time::timeout(self.timeout, self.http.post(url).json(payload).send()).await;
        match result {
            Ok(Ok(resp)) if !resp.status().is_success() => {
                warn!(status = %resp.status(), "webhook returned non-success status");
            }
            Ok(Err(e)) => warn!(error = %e, "webhook send failed"),
            Err(_) => warn!("webhook send timed out"),
            Ok(Ok(_)) => {}
        }
    }
}

fn side_str(side: DepthSide) -> &'static str {
    match side {
        DepthSide::Bid => "bid",
        DepthSide::Ask => "ask",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::analyzer::KeyLevelReport;

    fn dispatcher() -> AlertDispatcher {
        AlertDispatcher::new(None, Duration::from_secs(1))
    }

    fn base_snapshot(security_id: &str, market_state: MarketState, pressure_60s: f64) -> SignalSnapshot {
        SignalSnapshot {
            security_id: security_id.to_string(),
            current_price: 100.0,
            key_levels: Vec::new(),
            absorptions: Vec::new(),
            pressure_30s: pressure_60s,
            pressure_60s,
            pressure_120s: pressure_60s,
            market_state,
        }
    }

    #[tokio::test]
    async fn weak_key_level_does_not_schedule_an_alert() {
        let mut dispatcher = dispatcher();
        let mut snapshot = base_snapshot("1", MarketState::Neutral, 0.0);
        snapshot.key_levels.push(KeyLevelReport {
            price: 100.0,
            side: DepthSide::Bid,
            stage: crate::signal::LevelStage::Active,
            orders: 500,
            strength_ratio: 2.0, // below KEY_LEVEL_ALERT_STRENGTH
            age_seconds: 20.0,
            tests: 0,
        });
        dispatcher.notify_snapshot(&snapshot).await;
        assert!(dispatcher.last_sent.is_empty());
    }

    #[tokio::test]
    async fn strong_aged_key_level_schedules_an_alert() {
        let mut dispatcher = dispatcher();
        let mut snapshot = base_snapshot("1", MarketState::Neutral, 0.0);
        snapshot.key_levels.push(KeyLevelReport {
            price: 100.0,
            side: DepthSide::Bid,
            stage: crate::signal::LevelStage::Active,
            orders: 600,
            strength_ratio: 3.5,
            age_seconds: 15.0,
            tests: 0,
        });
        dispatcher.notify_snapshot(&snapshot).await;
        assert_eq!(dispatcher.last_sent.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_never_schedules_an_absorption_alert() {
        let mut dispatcher = dispatcher();
        let mut snapshot = base_snapshot("1", MarketState::Neutral, 0.0);
        snapshot.absorptions.push(AbsorptionReport {
            price: 100.0,
            side: DepthSide::Bid,
            kind: BreakKind::Cancellation,
            orders_before: 1000,
            orders_now: 100,
            reduction_pct: 0.90,
        });
        dispatcher.notify_snapshot(&snapshot).await;
        assert!(dispatcher.last_sent.is_empty());
    }

    #[tokio::test]
    async fn pressure_alert_only_fires_on_transition_past_threshold() {
        let mut dispatcher = dispatcher();
        dispatcher.notify_snapshot(&base_snapshot("1", MarketState::Neutral, 0.1)).await;
        assert!(dispatcher.last_sent.is_empty());

        dispatcher.notify_snapshot(&base_snapshot("1", MarketState::Bullish, 0.42)).await;
        assert_eq!(dispatcher.last_sent.len(), 1);

        // Same state again, no transition: must not re-fire even though
        // the cooldown alone would allow it.
        dispatcher.notify_snapshot(&base_snapshot("1", MarketState::Bullish, 0.45)).await;
        assert_eq!(dispatcher.last_sent.len(), 1);
    }
}
