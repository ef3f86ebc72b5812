pub mod enricher;
pub mod health;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use health::IngestionHealth;
pub use publisher::Publisher;
pub use transport::FeedTransport;
