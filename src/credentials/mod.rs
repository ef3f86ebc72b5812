use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;

use crate::cache::Cache;
use crate::core::AppError;

const CACHE_KEY: &str = "credentials:access_token";
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Deserialize)]
struct TokenFileJson {
    access_token: String,
    #[serde(default)]
    expiry: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

/// File-backed credential provider with a cache fallback: a file source of
/// truth, a Redis cache as a secondary read path, and one caller-visible
/// `get()`. Tokens are never auto-refreshed; `refresh()` is a separate,
/// caller-invoked operation guarded by a mutex, since upstream renew
/// endpoints are externally rotated and not something this crate drives.
pub struct CredentialProvider {
    file_path: String,
    cache: Arc<Cache>,
    refresh_lock: Mutex<()>,
}

impl CredentialProvider {
    pub fn new(file_path: impl Into<String>, cache: Arc<Cache>) -> Self {
        Self {
            file_path: file_path.into(),
            cache,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Read the token file (source of truth). On failure, fall back to the
    /// last value cached in Redis. If both fail, the caller treats this as
    /// `AuthExpired`/`Config` and aborts rather than guessing.
    pub async fn get(&self) -> Result<AccessToken, AppError> {
        match self.read_file().await {
            Ok(tok) => {
                let _ = self
                    .cache
                    .set_json_with_ttl(CACHE_KEY, &tok, CACHE_TTL)
                    .await;
                Ok(tok)
            }
            Err(file_err) => {
                tracing::warn!(error = %file_err, path = %self.file_path, "token file unreadable, falling back to cache");
                let cached = self
                    .cache
                    .get(CACHE_KEY)
                    .await?
                    .ok_or_else(|| AppError::AuthExpired("no cached access token available".into()))?;
                let tok: AccessToken = serde_json::from_str(&cached)?;
                Ok(tok)
            }
        }
    }

    async fn read_file(&self) -> Result<AccessToken, AppError> {
        let contents = tokio::fs::read_to_string(&self.file_path)
            .await
            .map_err(|e| AppError::Config(format!("reading {}: {e}", self.file_path)))?;
        let trimmed = contents.trim();

        if trimmed.starts_with('{') {
            let parsed: TokenFileJson = serde_json::from_str(trimmed)?;
            Ok(AccessToken {
                access_token: parsed.access_token,
                expiry: parsed.expiry,
                client_id: parsed.client_id,
            })
        } else {
            Ok(AccessToken {
                access_token: trimmed.to_string(),
                expiry: None,
                client_id: None,
            })
        }
    }

    /// Guarded so only one caller performs an external refresh call at a
    /// time. Intentionally does not call any renew endpoint itself: this
    /// crate treats access tokens as externally rotated, since Dhan's
    /// `/RenewToken` endpoint is unreliable enough to avoid depending on.
    pub async fn refresh(&self) -> Result<AccessToken, AppError> {
        let _guard = self.refresh_lock.lock().await;
        self.get().await
    }
}
