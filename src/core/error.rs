use thiserror::Error;

/// Error kinds per §7 of the design: decode/resolve errors never propagate
/// upward out of the pipeline stage that produced them (they are counted and
/// dropped), persistence errors never drop data (they backpressure), and
/// config/auth errors abort the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required env var: {0}")]
    MissingEnv(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Bus(#[from] lapin::Error),

    #[error(transparent)]
    Cache(#[from] redis::RedisError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("access token rejected, refresh required: {0}")]
    AuthExpired(String),
}
