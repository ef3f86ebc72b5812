use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::decoder::{DepthLevel200, DepthPacket, DepthSide};

/// Max age a one-sided packet may sit waiting for its other side before the
/// merger discards it rather than emitting a stale snapshot (§4.4).
pub const SNAPSHOT_STALENESS_LIMIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DepthSnapshot {
    pub security_id: i32,
    pub bids: Vec<DepthLevel200>,
    pub asks: Vec<DepthLevel200>,
}

struct PendingSide {
    levels: Vec<DepthLevel200>,
    received_at: Instant,
}

/// Merges independently-arriving bid/ask 200-level packets for the same
/// security into one two-sided snapshot. A side older than
/// `SNAPSHOT_STALENESS_LIMIT` is dropped rather than paired with a fresh
/// opposite side, since pairing them would misrepresent the book at a
/// single point in time.
#[derive(Default)]
pub struct DepthMerger {
    pending: HashMap<i32, (Option<PendingSide>, Option<PendingSide>)>,
}

impl DepthMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded packet in. Returns a completed snapshot once both
    /// sides are present and neither is stale; otherwise `None`.
    pub fn ingest(&mut self, packet: DepthPacket) -> Option<DepthSnapshot> {
        let now = Instant::now();
        let entry = self.pending.entry(packet.security_id).or_insert((None, None));

        let pending_side = PendingSide {
            levels: packet.levels,
            received_at: now,
        };
        match packet.side {
            DepthSide::Bid => entry.0 = Some(pending_side),
            DepthSide::Ask => entry.1 = Some(pending_side),
        }

        let (bid_slot, ask_slot) = entry;
        let bid_fresh = bid_slot.as_ref().is_some_and(|s| now.duration_since(s.received_at) <= SNAPSHOT_STALENESS_LIMIT);
        let ask_fresh = ask_slot.as_ref().is_some_and(|s| now.duration_since(s.received_at) <= SNAPSHOT_STALENESS_LIMIT);

        if !bid_fresh || !ask_fresh {
            return None;
        }

        let bids = bid_slot.take().unwrap().levels;
        let asks = ask_slot.take().unwrap().levels;

        Some(DepthSnapshot {
            security_id: packet.security_id,
            bids,
            asks,
        })
    }

    /// Drop any pending sides older than the staleness limit, freeing memory
    /// for securities whose feed has gone quiet.
    pub fn sweep_stale(&mut self) {
        let now = Instant::now();
        self.pending.retain(|_, (bid, ask)| {
            if let Some(s) = bid {
                if now.duration_since(s.received_at) > SNAPSHOT_STALENESS_LIMIT {
                    *bid = None;
                }
            }
            if let Some(s) = ask {
                if now.duration_since(s.received_at) > SNAPSHOT_STALENESS_LIMIT {
                    *ask = None;
                }
            }
            bid.is_some() || ask.is_some()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::decoder::DepthLevel200;

    fn packet(security_id: i32, side: DepthSide) -> DepthPacket {
        DepthPacket {
            security_id,
            side,
            levels: vec![DepthLevel200 {
                price: 100.0,
                quantity: 10,
                order_count: 1,
            }],
        }
    }

    #[test]
    fn pairs_bid_then_ask_into_snapshot() {
        let mut merger = DepthMerger::new();
        assert!(merger.ingest(packet(1, DepthSide::Bid)).is_none());
        let snap = merger.ingest(packet(1, DepthSide::Ask)).expect("both sides present");
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.asks.len(), 1);
    }

    #[test]
    fn different_securities_do_not_cross_pair() {
        let mut merger = DepthMerger::new();
        assert!(merger.ingest(packet(1, DepthSide::Bid)).is_none());
        assert!(merger.ingest(packet(2, DepthSide::Ask)).is_none());
    }
}
