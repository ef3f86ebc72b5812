use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::core::{AppConfig, AppError, DataSource};
use crate::credentials::CredentialProvider;
use crate::feed::ExchangeSegment;
use crate::ingestion::subscriber::{build_subscription_messages, SubscriptionKind};

use super::decoder::decode_depth_frame;
use super::snapshot::{DepthMerger, DepthSnapshot};

/// Connects to the 200-level depth feed and forwards merged two-sided
/// snapshots on `out`. Structurally a sibling of `ingestion::transport`, but
/// kept separate since the depth feed is its own subscription stream
/// (response codes 41/51/50) rather than the tick feed's 8/16/51/12-byte
/// frames.
pub struct DepthFeedRunner {
    config: Arc<AppConfig>,
    credentials: Arc<CredentialProvider>,
    instrument_refs: Vec<(ExchangeSegment, String)>,
    out: mpsc::Sender<DepthSnapshot>,
}

impl DepthFeedRunner {
    pub fn new(
        config: Arc<AppConfig>,
        credentials: Arc<CredentialProvider>,
        instrument_refs: Vec<(ExchangeSegment, String)>,
        out: mpsc::Sender<DepthSnapshot>,
    ) -> Self {
        Self {
            config,
            credentials,
            instrument_refs,
            out,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_forever().await;
        })
    }

    async fn run_forever(&self) {
        let mut backoff = self.config.reconnect_delay;
        let max_backoff = Duration::from_secs(60);
        let mut consecutive_fast_failures: u32 = 0;

        loop {
            let started = std::time::Instant::now();
            match self.run_once().await {
                Ok(()) => {
                    backoff = self.config.reconnect_delay;
                    consecutive_fast_failures = 0;
                }
                Err(e) => {
                    if started.elapsed() < Duration::from_secs(2) {
                        consecutive_fast_failures += 1;
                    } else {
                        consecutive_fast_failures = 0;
                    }
                    warn!(error = %e, sleep_ms = backoff.as_millis() as u64, "depth feed error; reconnecting");

                    if consecutive_fast_failures >= 2 {
                        warn!("repeated fast depth reconnects; treating as expired credentials");
                        if let Err(refresh_err) = self.credentials.refresh().await {
                            warn!(error = %refresh_err, "credential refresh failed");
                        }
                        consecutive_fast_failures = 0;
                    }

                    sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }

    async fn run_once(&self) -> Result<(), AppError> {
        if self.instrument_refs.is_empty() {
            return Err(AppError::Config("no instruments to subscribe for depth".into()));
        }

        let token = self.credentials.get().await?;
        let url = match self.config.data_source {
            DataSource::Kite => format!(
                "wss://ws.kite.trade/?api_key={}&access_token={}",
                urlencoding::encode(self.config.api_key.as_deref().unwrap_or_default()),
                urlencoding::encode(&token.access_token),
            ),
            DataSource::Dhan => format!(
                "wss://api-feed.dhan.co/20depth?token={}&clientId={}&authType=2",
                urlencoding::encode(&token.access_token),
                urlencoding::encode(self.config.client_id.as_deref().unwrap_or_default()),
            ),
        };
        let mut req = url
            .into_client_request()
            .map_err(|e| AppError::TransientNetwork(format!("depth ws request build failed: {e}")))?;
        req.headers_mut()
            .insert("User-Agent", HeaderValue::from_static("fno-md-core/0.1"));

        info!(instrument_count = self.instrument_refs.len(), "connecting depth websocket");
        let (ws_stream, resp) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| AppError::TransientNetwork(format!("depth ws connect failed: {e}")))?;
        info!(status = %resp.status(), "depth websocket connected");

        let (mut write, mut read) = ws_stream.split();

        for msg in build_subscription_messages(SubscriptionKind::Depth20Level, &self.instrument_refs) {
            write
                .send(Message::Text(msg))
                .await
                .map_err(|e| AppError::TransientNetwork(format!("depth subscribe send failed: {e}")))?;
        }

        let mut merger = DepthMerger::new();
        let idle_timeout = self.config.transport_idle_timeout;

        loop {
            let next = tokio::time::timeout(idle_timeout, read.next()).await;
            let msg = match next {
                Ok(Some(m)) => m,
                Ok(None) => return Ok(()),
                Err(_) => return Err(AppError::TransientNetwork("depth feed idle timeout".into())),
            };

            match msg {
                Ok(Message::Binary(bin)) => match decode_depth_frame(&bin) {
                    Ok(packet) => {
                        if let Some(snapshot) = merger.ingest(packet) {
                            if self.out.send(snapshot).await.is_err() {
                                warn!("depth snapshot channel closed; dropping snapshot");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping undecodable depth frame");
                    }
                },
                Ok(Message::Ping(p)) => {
                    write
                        .send(Message::Pong(p))
                        .await
                        .map_err(|e| AppError::TransientNetwork(format!("depth ws pong failed: {e}")))?;
                }
                Ok(Message::Close(frame)) => {
                    info!(close = ?frame, "depth websocket closed");
                    return Ok(());
                }
                Err(e) => return Err(AppError::TransientNetwork(format!("depth ws read error: {e}"))),
                _ => {}
            }

            merger.sweep_stale();
        }
    }
}
