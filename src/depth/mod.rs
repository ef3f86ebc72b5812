pub mod buffer;
pub mod decoder;
pub mod persistence;
pub mod runner;
pub mod snapshot;

pub use buffer::DepthRingBuffer;
pub use decoder::{decode_depth_frame, decode_depth_packet, DepthLevel200, DepthPacket, DepthSide};
pub use runner::DepthFeedRunner;
pub use snapshot::{DepthMerger, DepthSnapshot, SNAPSHOT_STALENESS_LIMIT};
