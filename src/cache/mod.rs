use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;

use crate::core::AppError;

/// Thin wrapper over a Redis connection manager. Every operation here is
/// best-effort per §5/§7: callers log failures and continue rather than
/// propagate them, except where the cache is explicitly the fallback source
/// of truth (instrument-cache bootstrap).
#[derive(Clone)]
pub struct Cache {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl Cache {
    pub async fn connect(redis_url: &str, op_timeout: Duration) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn, op_timeout })
    }

    /// Publish best-effort: timeout or error is logged and swallowed, never
    /// propagated, matching §4.5.2's "publication must never block
    /// persistence" rule.
    pub async fn publish_best_effort(&self, channel: &str, payload: &str) {
        let mut conn = self.conn.clone();
        let fut = conn.publish::<_, _, i64>(channel, payload);
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, channel, "redis publish failed"),
            Err(_) => tracing::warn!(channel, "redis publish timed out"),
        }
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let fut = conn.set_ex::<_, _, ()>(key, value, ttl.as_secs());
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| AppError::Config(format!("redis set timed out for key {key}")))??;
        Ok(())
    }

    pub async fn set_json_with_ttl<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let payload = serde_json::to_string(value)?;
        self.set_with_ttl(key, &payload, ttl).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let fut = conn.get::<_, Option<String>>(key);
        let v = tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| AppError::Config(format!("redis get timed out for key {key}")))??;
        Ok(v)
    }

    pub async fn health(&self) -> bool {
        let mut conn = self.conn.clone();
        tokio::time::timeout(self.op_timeout, redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}
