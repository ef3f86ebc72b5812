use std::time::{Duration, Instant};

use crate::depth::DepthSide;

/// How long a level must survive after breaking before it is garbage
/// collected from the analyzer's tracked set (§4.5.1).
pub const BROKEN_GC_DELAY: Duration = Duration::from_secs(60);

/// Minimum time a level must persist since first observed before it can be
/// confirmed `Active` (§4.5.4(a)); guards against a single noisy snapshot
/// promoting a level that never actually holds.
pub const MIN_ACTIVE_AGE: Duration = Duration::from_secs(5);

/// Price approach distance, in price units, within which a non-crossing
/// touch counts toward a level's `test_count` (§3, §4.5.4(a)).
pub const TEST_DISTANCE: f64 = 5.0;

/// A key level's position in its lifecycle (§4.5.1): `forming` levels have
/// been seen but not yet confirmed significant; `active` levels passed the
/// key-level threshold and persisted long enough to confirm it; `breaking`
/// levels show a meaningful reduction in resting order count; `broken`
/// levels have either been absorbed through or cancelled away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelStage {
    Forming,
    Active,
    Breaking,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    Breakthrough,
    Cancellation,
}

#[derive(Debug, Clone)]
pub struct TrackedLevel {
    pub price: f64,
    pub side: DepthSide,
    pub stage: LevelStage,
    pub peak_orders: i64,
    pub current_orders: i64,
    pub test_count: u32,
    pub first_seen: Instant,
    pub last_updated: Instant,
    pub broken_at: Option<Instant>,
    pub break_kind: Option<BreakKind>,
}

impl TrackedLevel {
    pub fn new(price: f64, side: DepthSide, orders: i64, now: Instant) -> Self {
        Self {
            price,
            side,
            stage: LevelStage::Forming,
            peak_orders: orders,
            current_orders: orders,
            test_count: 0,
            first_seen: now,
            last_updated: now,
            broken_at: None,
            break_kind: None,
        }
    }

    /// Update resting order count at this price and advance the lifecycle.
    /// `mean_orders` is the book's mean resting order count across the
    /// candidate band at this snapshot, used to decide whether this level
    /// counts as "key" (§4.5.4(a): > 2.5x the mean). `current_price` is the
    /// book's current mid/last, used both to grow `test_count` (a touch
    /// within `TEST_DISTANCE` that doesn't cross the level) and to tell a
    /// breakthrough (price traded through) from a cancellation (orders
    /// pulled with no corresponding price pressure).
    pub fn observe(&mut self, orders: i64, mean_orders: f64, current_price: f64, traded_through: bool, now: Instant) {
        self.last_updated = now;

        let distance = (current_price - self.price).abs();
        let crossed = match self.side {
            DepthSide::Bid => current_price < self.price,
            DepthSide::Ask => current_price > self.price,
        };
        if distance <= TEST_DISTANCE && !crossed {
            self.test_count += 1;
        }

        self.peak_orders = self.peak_orders.max(self.current_orders);
        self.current_orders = orders;

        if self.stage == LevelStage::Broken {
            return;
        }

        let is_key = mean_orders > 0.0 && (self.peak_orders as f64) > mean_orders * 2.5;
        if self.stage == LevelStage::Forming
            && is_key
            && now.duration_since(self.first_seen) >= MIN_ACTIVE_AGE
        {
            self.stage = LevelStage::Active;
        }

        if self.stage == LevelStage::Active || self.stage == LevelStage::Breaking {
            let reduction = if self.peak_orders > 0 {
                1.0 - (orders as f64 / self.peak_orders as f64)
            } else {
                0.0
            };

            if reduction >= 0.70 {
                self.stage = LevelStage::Broken;
                self.broken_at = Some(now);
                self.break_kind = Some(if traded_through {
                    BreakKind::Breakthrough
                } else {
                    BreakKind::Cancellation
                });
            } else if reduction >= 0.60 {
                self.stage = LevelStage::Breaking;
            }
        }
    }

    pub fn is_collectable(&self, now: Instant) -> bool {
        matches!(self.stage, LevelStage::Broken)
            && self.broken_at.is_some_and(|t| now.duration_since(t) >= BROKEN_GC_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S3: key-level detection crossing the 2.5x mean threshold,
    /// confirmed only after persisting past `MIN_ACTIVE_AGE` (S3: 8s).
    #[test]
    fn level_becomes_active_above_key_threshold_after_persisting() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        assert_eq!(level.stage, LevelStage::Forming);

        // mean=300 -> 2.5x mean = 750; peak 1000 qualifies, but not yet 5s old.
        level.observe(1000, 300.0, 100.0, false, now);
        assert_eq!(level.stage, LevelStage::Forming);

        let later = now + Duration::from_secs(8);
        level.observe(1000, 300.0, 100.0, false, later);
        assert_eq!(level.stage, LevelStage::Active);
    }

    #[test]
    fn level_stays_forming_below_key_threshold() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 400, now);
        let later = now + Duration::from_secs(8);
        level.observe(400, 300.0, 100.0, false, later);
        assert_eq!(level.stage, LevelStage::Forming);
    }

    #[test]
    fn approach_within_distance_without_crossing_increments_test_count() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        // price approaches to 98, which is within 5 units and doesn't cross
        // a bid (support) level held below the market.
        level.observe(1000, 300.0, 98.0, false, now);
        assert_eq!(level.test_count, 1);
    }

    #[test]
    fn crossing_through_the_level_does_not_count_as_a_test() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        // price trades through a bid (support) level, below it: a break, not a test.
        level.observe(1000, 300.0, 90.0, false, now);
        assert_eq!(level.test_count, 0);
    }

    /// Scenario S5: absorption breakthrough vs cancellation, reduction
    /// measured against peak order count.
    #[test]
    fn large_reduction_with_trade_is_breakthrough() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        let active_at = now + Duration::from_secs(8);
        level.observe(1000, 300.0, 100.0, false, active_at);
        assert_eq!(level.stage, LevelStage::Active);

        level.observe(200, 300.0, 100.0, true, active_at); // 80% off peak, traded through
        assert_eq!(level.stage, LevelStage::Broken);
        assert_eq!(level.break_kind, Some(BreakKind::Breakthrough));
    }

    #[test]
    fn large_reduction_without_trade_is_cancellation() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        let active_at = now + Duration::from_secs(8);
        level.observe(1000, 300.0, 100.0, false, active_at);
        level.observe(150, 300.0, 100.0, false, active_at); // 85% off peak, no trade
        assert_eq!(level.break_kind, Some(BreakKind::Cancellation));
    }

    #[test]
    fn moderate_reduction_moves_to_breaking_not_broken() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        let active_at = now + Duration::from_secs(8);
        level.observe(1000, 300.0, 100.0, false, active_at);
        level.observe(350, 300.0, 100.0, false, active_at); // 65% off peak
        assert_eq!(level.stage, LevelStage::Breaking);
    }

    #[test]
    fn broken_level_is_collectable_after_gc_delay() {
        let now = Instant::now();
        let mut level = TrackedLevel::new(100.0, DepthSide::Bid, 1000, now);
        let active_at = now + Duration::from_secs(8);
        level.observe(1000, 300.0, 100.0, false, active_at);
        level.observe(100, 300.0, 100.0, true, active_at);
        assert!(!level.is_collectable(active_at));
        assert!(level.is_collectable(active_at + BROKEN_GC_DELAY + Duration::from_secs(1)));
    }
}
