use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::depth::{DepthRingBuffer, DepthSide, DepthSnapshot};

use super::tracked_level::{BreakKind, LevelStage, TrackedLevel};

/// Evaluation cadence (§4.5.4): a drift-corrected 10s tick, not a naive
/// `sleep(10s)` loop, so evaluations land on a stable wall-clock cadence
/// even if one evaluation runs long.
pub const EVALUATION_INTERVAL: Duration = Duration::from_secs(10);

/// Pressure and key-level detection only look at levels close to the
/// market (§4.5.4(a)/(c)): the top N levels each side for pressure, and a
/// fixed price band around the mid for key-level candidates.
const PRESSURE_DEPTH: usize = 20;
const KEY_LEVEL_BAND: f64 = 100.0;

/// The buffer age band absorption qualification looks back across
/// (§4.5.4(b)): "the count observed 30-60s ago".
const ABSORPTION_LOOKBACK_MIN: Duration = Duration::from_secs(30);
const ABSORPTION_LOOKBACK_MAX: Duration = Duration::from_secs(60);

/// Absolute 60s pressure reading beyond which a pressure alert is eligible
/// (§4.5.6); distinct from the +-0.3 band `classify_market_state` uses.
pub const PRESSURE_ALERT_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketState {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone)]
pub struct KeyLevelReport {
    pub price: f64,
    pub side: DepthSide,
    pub stage: LevelStage,
    pub orders: i64,
    pub strength_ratio: f64,
    pub age_seconds: f64,
    pub tests: u32,
}

#[derive(Debug, Clone)]
pub struct AbsorptionReport {
    pub price: f64,
    pub side: DepthSide,
    pub kind: BreakKind,
    pub orders_before: i64,
    pub orders_now: i64,
    pub reduction_pct: f64,
}

#[derive(Debug, Clone)]
pub struct SignalSnapshot {
    pub security_id: String,
    pub current_price: f64,
    pub key_levels: Vec<KeyLevelReport>,
    pub absorptions: Vec<AbsorptionReport>,
    pub pressure_30s: f64,
    pub pressure_60s: f64,
    pub pressure_120s: f64,
    pub market_state: MarketState,
}

/// Signed order-flow pressure over a window (§4.5.4(c)): `(bid orders - ask
/// orders) / (bid orders + ask orders)`, summed over the top
/// `PRESSURE_DEPTH` levels each side and averaged across snapshots in the
/// window. Positive values indicate bid-side dominance. Returns 0.0 for an
/// empty window rather than dividing by zero.
pub fn compute_pressure(snapshots: &[DepthSnapshot]) -> f64 {
    if snapshots.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    let mut n = 0usize;
    for s in snapshots {
        let bid_orders: i64 = s.bids.iter().take(PRESSURE_DEPTH).map(|l| l.order_count as i64).sum();
        let ask_orders: i64 = s.asks.iter().take(PRESSURE_DEPTH).map(|l| l.order_count as i64).sum();
        let denom = bid_orders + ask_orders;
        if denom > 0 {
            total += (bid_orders - ask_orders) as f64 / denom as f64;
            n += 1;
        }
    }
    if n == 0 {
        0.0
    } else {
        (total / n as f64).clamp(-1.0, 1.0)
    }
}

/// Classify the primary 60s pressure reading into a market state (§4.5.4(c)):
/// beyond +-0.3 the state flips to bullish/bearish; inside that band it
/// stays neutral to avoid flapping on noise. The wider +-0.4 band belongs to
/// the pressure alert filter, not this classification.
pub fn classify_market_state(pressure_60s: f64) -> MarketState {
    if pressure_60s > 0.3 {
        MarketState::Bullish
    } else if pressure_60s < -0.3 {
        MarketState::Bearish
    } else {
        MarketState::Neutral
    }
}

/// Mean order count across both sides within `KEY_LEVEL_BAND` of `mid`; the
/// denominator key-level detection compares a candidate's peak against
/// (§4.5.4(a)).
fn mean_orders_near_mid(snapshot: &DepthSnapshot, mid: f64) -> f64 {
    let orders: Vec<i64> = snapshot
        .bids
        .iter()
        .chain(snapshot.asks.iter())
        .filter(|l| (l.price - mid).abs() <= KEY_LEVEL_BAND)
        .map(|l| l.order_count as i64)
        .collect();
    if orders.is_empty() {
        return 0.0;
    }
    orders.iter().sum::<i64>() as f64 / orders.len() as f64
}

fn order_count_at(snapshot: &DepthSnapshot, side: DepthSide, price: f64) -> Option<i64> {
    let levels = match side {
        DepthSide::Bid => &snapshot.bids,
        DepthSide::Ask => &snapshot.asks,
    };
    let target = price_bucket(price);
    levels
        .iter()
        .find(|l| price_bucket(l.price) == target)
        .map(|l| l.order_count as i64)
}

/// Tracks key levels and absorption events for one security across
/// evaluation ticks. Owns no I/O; `evaluate` is a pure function of the
/// ring buffer's current contents plus the tracker's own state.
pub struct SecurityAnalyzer {
    security_id: String,
    levels: HashMap<(DepthSide, u64), TrackedLevel>,
}

fn price_bucket(price: f64) -> u64 {
    (price * 100.0).round() as u64
}

impl SecurityAnalyzer {
    pub fn new(security_id: impl Into<String>) -> Self {
        Self {
            security_id: security_id.into(),
            levels: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, buffer: &DepthRingBuffer, now: Instant) -> Option<SignalSnapshot> {
        let latest = buffer.latest()?;
        let current_price = latest
            .bids
            .first()
            .zip(latest.asks.first())
            .map(|(b, a)| (b.price + a.price) / 2.0)
            .unwrap_or(0.0);

        let mean = self.update_tracked_levels(&latest, current_price, now);
        self.gc_broken(now);

        let window_30 = buffer.window(Duration::from_secs(30));
        let window_60 = buffer.window(Duration::from_secs(60));
        let window_120 = buffer.window(Duration::from_secs(120));

        let pressure_30s = compute_pressure(&window_30);
        let pressure_60s = compute_pressure(&window_60);
        let pressure_120s = compute_pressure(&window_120);

        let key_levels = self
            .levels
            .values()
            .filter(|l| matches!(l.stage, LevelStage::Active | LevelStage::Breaking))
            .map(|l| KeyLevelReport {
                price: l.price,
                side: l.side,
                stage: l.stage,
                orders: l.current_orders,
                strength_ratio: if mean > 0.0 { l.current_orders as f64 / mean } else { 0.0 },
                age_seconds: now.duration_since(l.first_seen).as_secs_f64(),
                tests: l.test_count,
            })
            .collect();

        let absorptions = self.compute_absorptions(buffer, current_price);

        Some(SignalSnapshot {
            security_id: self.security_id.clone(),
            current_price,
            key_levels,
            absorptions,
            pressure_30s,
            pressure_60s,
            pressure_120s,
            market_state: classify_market_state(pressure_60s),
        })
    }

    /// Absorption qualification (§4.5.4(b)): for every level currently
    /// `Active`/`Breaking`, compare its order count now against the order
    /// count the rolling buffer observed 30-60s ago at the same price. A
    /// drop of 60% or more qualifies; whether price has since crossed
    /// through the level decides breakthrough vs cancellation. Independent
    /// of the level's own peak-relative `Breaking`/`Broken` transitions.
    fn compute_absorptions(&self, buffer: &DepthRingBuffer, current_price: f64) -> Vec<AbsorptionReport> {
        let reference = match buffer.window_between(ABSORPTION_LOOKBACK_MIN, ABSORPTION_LOOKBACK_MAX).pop() {
            Some(s) => s,
            None => return Vec::new(),
        };

        self.levels
            .values()
            .filter(|l| matches!(l.stage, LevelStage::Active | LevelStage::Breaking))
            .filter_map(|l| {
                let orders_before = order_count_at(&reference, l.side, l.price)?;
                if orders_before <= 0 {
                    return None;
                }
                let orders_now = l.current_orders;
                let reduction_pct = 1.0 - (orders_now as f64 / orders_before as f64);
                if reduction_pct < 0.60 {
                    return None;
                }
                let crossed = match l.side {
                    DepthSide::Bid => current_price < l.price,
                    DepthSide::Ask => current_price > l.price,
                };
                let kind = if crossed { BreakKind::Breakthrough } else { BreakKind::Cancellation };
                Some(AbsorptionReport {
                    price: l.price,
                    side: l.side,
                    kind,
                    orders_before,
                    orders_now,
                    reduction_pct,
                })
            })
            .collect()
    }

    /// Folds the latest snapshot into the tracked-level state machine,
    /// restricted to levels within `KEY_LEVEL_BAND` of the current mid
    /// (§4.5.4(a)). Returns the mean order count over that band, reused to
    /// report each active level's `strength_ratio`.
    fn update_tracked_levels(&mut self, snapshot: &DepthSnapshot, current_price: f64, now: Instant) -> f64 {
        let mean = mean_orders_near_mid(snapshot, current_price);
        for level in snapshot.bids.iter().filter(|l| (l.price - current_price).abs() <= KEY_LEVEL_BAND) {
            self.observe_side(DepthSide::Bid, level.price, level.order_count as i64, mean, current_price, now);
        }
        for level in snapshot.asks.iter().filter(|l| (l.price - current_price).abs() <= KEY_LEVEL_BAND) {
            self.observe_side(DepthSide::Ask, level.price, level.order_count as i64, mean, current_price, now);
        }
        mean
    }

    fn observe_side(&mut self, side: DepthSide, price: f64, orders: i64, mean: f64, current_price: f64, now: Instant) {
        let key = (side, price_bucket(price));
        let entry = self
            .levels
            .entry(key)
            .or_insert_with(|| TrackedLevel::new(price, side, orders, now));
        // `traded_through` cannot be derived from the depth feed alone; the
        // full enrichment pipeline wires this from tick trade activity.
        // Absent that signal here, treat disappearance as cancellation.
        entry.observe(orders, mean, current_price, false, now);
    }

    fn gc_broken(&mut self, now: Instant) {
        self.levels.retain(|_, l| !l.is_collectable(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::DepthLevel200;

    fn snapshot(bid_orders: i32, ask_orders: i32) -> DepthSnapshot {
        DepthSnapshot {
            security_id: 1,
            bids: vec![DepthLevel200 {
                price: 100.0,
                quantity: 1,
                order_count: bid_orders,
            }],
            asks: vec![DepthLevel200 {
                price: 101.0,
                quantity: 1,
                order_count: ask_orders,
            }],
        }
    }

    /// Scenario S4: pressure classification thresholds, primary 60s window.
    #[test]
    fn strong_bid_dominance_classifies_bullish() {
        let snapshots = vec![snapshot(4300, 2200)];
        let pressure = compute_pressure(&snapshots);
        assert!(pressure > 0.3);
        assert_eq!(classify_market_state(pressure), MarketState::Bullish);
    }

    #[test]
    fn strong_ask_dominance_classifies_bearish() {
        let snapshots = vec![snapshot(100, 900)];
        let pressure = compute_pressure(&snapshots);
        assert!(pressure < -0.3);
        assert_eq!(classify_market_state(pressure), MarketState::Bearish);
    }

    #[test]
    fn balanced_book_classifies_neutral() {
        let snapshots = vec![snapshot(500, 500)];
        let pressure = compute_pressure(&snapshots);
        assert_eq!(pressure, 0.0);
        assert_eq!(classify_market_state(pressure), MarketState::Neutral);
    }

    #[test]
    fn empty_window_has_zero_pressure() {
        assert_eq!(compute_pressure(&[]), 0.0);
    }

    #[test]
    fn pressure_only_sums_top_levels_each_side() {
        let mut wide = snapshot(100, 100);
        for i in 0..30 {
            wide.bids.push(DepthLevel200 { price: 100.0 - i as f64, quantity: 1, order_count: 1 });
        }
        // Sits past index 20 in the bid book; must not dominate pressure.
        wide.bids.push(DepthLevel200 { price: 60.0, quantity: 1, order_count: 10_000 });
        let pressure = compute_pressure(&[wide]);
        assert!(pressure.abs() < 0.9);
    }

    #[test]
    fn analyzer_emits_snapshot_once_buffer_has_data() {
        let buffer = DepthRingBuffer::new();
        buffer.push(snapshot(4300, 2200));
        let mut analyzer = SecurityAnalyzer::new("49229");
        let result = analyzer.evaluate(&buffer, Instant::now());
        assert!(result.is_some());
        let snap = result.unwrap();
        assert_eq!(snap.market_state, MarketState::Bullish);
    }

    #[test]
    fn levels_outside_band_are_not_tracked() {
        let mut snap = snapshot(100, 100);
        snap.bids.push(DepthLevel200 { price: 100.0 - KEY_LEVEL_BAND - 1.0, quantity: 1, order_count: 5000 });
        let buffer = DepthRingBuffer::new();
        buffer.push(snap);
        let mut analyzer = SecurityAnalyzer::new("49229");
        analyzer.evaluate(&buffer, Instant::now());
        assert!(!analyzer.levels.keys().any(|(_, bucket)| *bucket == price_bucket(100.0 - KEY_LEVEL_BAND - 1.0)));
    }
}
