use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::frame::{DepthLevel, ExchangeSegment, FeedFrame};

/// Normalized, instrument-resolved tick (§3). This is the shape that
/// travels over the bus and lands in `ticks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTick {
    pub instrument_token: i32,
    pub security_id: String,
    pub exchange_segment: String,
    pub received_at: DateTime<Utc>,

    pub last_price: f64,
    pub avg_traded_price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub prev_close: f64,
    pub last_traded_qty: i64,
    pub volume_traded: i64,
    pub total_buy_qty: i64,
    pub total_sell_qty: i64,
    pub oi: i64,
    pub oi_day_high: i64,
    pub oi_day_low: i64,

    pub bid_prices: [f64; 5],
    pub bid_qtys: [i64; 5],
    pub bid_orders: [i32; 5],
    pub ask_prices: [f64; 5],
    pub ask_qtys: [i64; 5],
    pub ask_orders: [i32; 5],

    /// Derived fields (§4.3): computed by the enricher, not the decoder.
    pub change: f64,
    pub change_pct: f64,
    pub spread: f64,
    pub mid: f64,
    pub order_imbalance: i64,
}

/// Accumulates partial frames (ticker/quote/oi/prev-close/full) for a single
/// security into one mergeable state, keyed by `security_id` in the
/// bounded-LRU merger (§4.3, §9 redesign note). A `Full` frame already
/// contains every field this state tracks, so merging never needs to
/// combine two `Full` frames; it only folds lighter frame kinds into the
/// most recent full snapshot.
#[derive(Debug, Clone, Default)]
pub struct PartialTickState {
    pub security_id: Option<String>,
    pub exchange_segment: Option<ExchangeSegment>,

    pub last_price: Option<f64>,
    pub avg_traded_price: Option<f64>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub prev_close: Option<f64>,
    pub last_traded_qty: Option<i64>,
    pub volume_traded: Option<i64>,
    pub total_buy_qty: Option<i64>,
    pub total_sell_qty: Option<i64>,
    pub oi: Option<i64>,
    pub oi_day_high: Option<i64>,
    pub oi_day_low: Option<i64>,
    pub depth: Option<[DepthLevel; 5]>,
}

impl PartialTickState {
    /// Fold a decoded frame into this state. Returns `true` when the frame
    /// carries enough information (trade price + depth) for the state to be
    /// considered emittable as a normalized tick.
    pub fn apply(&mut self, security_id: &str, frame: &FeedFrame) -> bool {
        self.security_id = Some(security_id.to_string());
        self.exchange_segment = frame.header().exchange_segment;

        match frame {
            FeedFrame::Ticker { last_price, .. } => {
                self.last_price = Some(*last_price as f64);
            }
            FeedFrame::Quote {
                last_price,
                last_traded_qty,
                avg_traded_price,
                volume_traded,
                total_sell_qty,
                total_buy_qty,
                open,
                close,
                high,
                low,
                ..
            } => {
                self.last_price = Some(*last_price as f64);
                self.last_traded_qty = Some(*last_traded_qty as i64);
                self.avg_traded_price = Some(*avg_traded_price as f64);
                self.volume_traded = Some(*volume_traded as i64);
                self.total_sell_qty = Some(*total_sell_qty as i64);
                self.total_buy_qty = Some(*total_buy_qty as i64);
                self.open = Some(*open as f64);
                self.close = Some(*close as f64);
                self.high = Some(*high as f64);
                self.low = Some(*low as f64);
            }
            FeedFrame::Oi { oi, .. } => {
                self.oi = Some(*oi as i64);
            }
            FeedFrame::PrevClose { prev_close, .. } => {
                self.prev_close = Some(*prev_close as f64);
            }
            FeedFrame::Full {
                last_price,
                last_traded_qty,
                avg_traded_price,
                volume_traded,
                total_sell_qty,
                total_buy_qty,
                oi,
                oi_day_high,
                oi_day_low,
                open,
                close,
                high,
                low,
                depth,
                ..
            } => {
                self.last_price = Some(*last_price as f64);
                self.last_traded_qty = Some(*last_traded_qty as i64);
                self.avg_traded_price = Some(*avg_traded_price as f64);
                self.volume_traded = Some(*volume_traded as i64);
                self.total_sell_qty = Some(*total_sell_qty as i64);
                self.total_buy_qty = Some(*total_buy_qty as i64);
                self.oi = Some(*oi as i64);
                self.oi_day_high = Some(*oi_day_high as i64);
                self.oi_day_low = Some(*oi_day_low as i64);
                self.open = Some(*open as f64);
                self.close = Some(*close as f64);
                self.high = Some(*high as f64);
                self.low = Some(*low as f64);
                self.depth = Some(*depth);
            }
            FeedFrame::Index { .. } | FeedFrame::MarketStatus { .. } | FeedFrame::Disconnect { .. } => {
                return self.is_ready();
            }
        }
        self.is_ready()
    }

    fn is_ready(&self) -> bool {
        self.last_price.is_some() && self.depth.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::frame::{FeedResponseCode, FrameHeader};

    fn ticker_frame(security_id: i32, last_price: f32) -> FeedFrame {
        FeedFrame::Ticker {
            header: FrameHeader {
                response_code: FeedResponseCode::Ticker,
                message_length: 16,
                exchange_segment_code: 1,
                exchange_segment: Some(ExchangeSegment::NseEq),
                security_id,
            },
            last_price,
            last_trade_time: 0,
        }
    }

    #[test]
    fn ticker_alone_is_not_ready() {
        let mut state = PartialTickState::default();
        let ready = state.apply("1333", &ticker_frame(1333, 1500.0));
        assert!(!ready);
        assert_eq!(state.last_price, Some(1500.0));
    }

    #[test]
    fn full_frame_makes_state_ready() {
        let mut state = PartialTickState::default();
        let depth = [DepthLevel {
            bid_qty: 10,
            ask_qty: 10,
            bid_orders: 1,
            ask_orders: 1,
            bid_price: 99.0,
            ask_price: 101.0,
        }; 5];
        let frame = FeedFrame::Full {
            header: FrameHeader {
                response_code: FeedResponseCode::Full,
                message_length: 163,
                exchange_segment_code: 2,
                exchange_segment: Some(ExchangeSegment::NseFno),
                security_id: 49229,
            },
            last_price: 100.0,
            last_traded_qty: 1,
            last_trade_time: 0,
            avg_traded_price: 100.0,
            volume_traded: 1000,
            total_sell_qty: 0,
            total_buy_qty: 0,
            oi: 0,
            oi_day_high: 0,
            oi_day_low: 0,
            open: 100.0,
            close: 100.0,
            high: 100.0,
            low: 100.0,
            depth,
        };
        assert!(state.apply("49229", &frame));
    }
}
