pub mod frame;
pub mod tick;

pub use frame::{decode_frame, DecodeError, ExchangeSegment, FeedFrame, FeedResponseCode, FrameHeader};
pub use tick::{NormalizedTick, PartialTickState};

/// Counters a caller accumulates across a connection's lifetime (§4.2,
/// §8 property: decode failures are counted, not fatal). Owned by the
/// ingestion transport, not the decoder itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedDecodeStats {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub bytes_received: u64,
}

impl FeedDecodeStats {
    pub fn record_decoded(&mut self, bytes: usize) {
        self.frames_decoded += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_dropped(&mut self, bytes: usize) {
        self.frames_dropped += 1;
        self.bytes_received += bytes as u64;
    }
}
