use std::time::Duration;

use super::error::AppError;

/// Which exchange feed protocol/auth scheme to speak. Selects the tick-feed
/// URL shape and header requirements in `ingestion::transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Kite,
    Dhan,
}

impl DataSource {
    fn from_env_str(s: &str) -> Result<Self, AppError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kite" => Ok(Self::Kite),
            "dhan" => Ok(Self::Dhan),
            other => Err(AppError::Config(format!(
                "DATA_SOURCE must be 'kite' or 'dhan', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_source: DataSource,

    pub database_url: String,
    pub redis_url: String,
    pub rabbitmq_url: String,

    pub batch_size: usize,
    pub batch_timeout: Duration,

    /// Single symbol this process instance subscribes the depth feed to.
    pub security_id: Option<String>,

    /// Well-known path to the access-token file (plain token, or JSON
    /// `{access_token, expiry, client_id}`). File is the source of truth.
    pub token_file_path: String,
    pub client_id: Option<String>,
    pub api_key: Option<String>,

    pub notification_webhook_url: Option<String>,

    pub reconnect_max_attempts: u32,
    pub reconnect_delay: Duration,
    pub transport_idle_timeout: Duration,
    pub sql_batch_timeout: Duration,
    pub webhook_timeout: Duration,
    pub cache_op_timeout: Duration,

    pub db_auto_migrate: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let data_source = DataSource::from_env_str(
            &std::env::var("DATA_SOURCE").map_err(|_| AppError::MissingEnv("DATA_SOURCE"))?,
        )?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AppError::MissingEnv("DATABASE_URL"))?;
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let rabbitmq_url = std::env::var("RABBITMQ_URL")
            .unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".to_string());

        let batch_size = env_usize("BATCH_SIZE").filter(|v| *v > 0).unwrap_or(1000);
        let batch_timeout_secs = env_u64("BATCH_TIMEOUT_SECONDS")
            .filter(|v| *v > 0)
            .unwrap_or(5);

        let security_id = std::env::var("SECURITY_ID")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let token_file_path = std::env::var("TOKEN_FILE_PATH")
            .unwrap_or_else(|_| "./access_token.json".to_string());
        let client_id = std::env::var("CLIENT_ID").ok().filter(|s| !s.is_empty());
        let api_key = std::env::var("API_KEY").ok().filter(|s| !s.is_empty());

        let notification_webhook_url = std::env::var("NOTIFICATION_WEBHOOK_URL")
            .ok()
            .filter(|s| !s.is_empty());

        let reconnect_max_attempts = env_u32("RECONNECT_MAX_ATTEMPTS").unwrap_or(5);
        let reconnect_delay_secs = env_u64("RECONNECT_DELAY_SECONDS").unwrap_or(5);
        let db_auto_migrate = parse_bool_env("DB_AUTO_MIGRATE").unwrap_or(false);

        Ok(Self {
            data_source,
            database_url,
            redis_url,
            rabbitmq_url,
            batch_size,
            batch_timeout: Duration::from_secs(batch_timeout_secs),
            security_id,
            token_file_path,
            client_id,
            api_key,
            notification_webhook_url,
            reconnect_max_attempts,
            reconnect_delay: Duration::from_secs(reconnect_delay_secs),
            transport_idle_timeout: Duration::from_secs(40),
            sql_batch_timeout: Duration::from_secs(30),
            webhook_timeout: Duration::from_secs(5),
            cache_op_timeout: Duration::from_secs(2),
            db_auto_migrate,
        })
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool_env(key: &str) -> Option<bool> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        return None;
    }
    Some(matches!(v, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON"))
}
