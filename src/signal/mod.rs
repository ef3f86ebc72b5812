pub mod alerts;
pub mod analyzer;
pub mod persistence;
pub mod tracked_level;

pub use alerts::AlertDispatcher;
pub use analyzer::{classify_market_state, compute_pressure, MarketState, SecurityAnalyzer, SignalSnapshot, EVALUATION_INTERVAL};
pub use tracked_level::{BreakKind, LevelStage, TrackedLevel};
