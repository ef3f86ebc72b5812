use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use lru::LruCache;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::core::{AppConfig, AppError, DataSource};
use crate::credentials::CredentialProvider;
use crate::feed::{decode_frame, FeedDecodeStats, FeedFrame, NormalizedTick, PartialTickState};
use crate::instrument_cache::InstrumentCache;

use super::enricher::enrich;
use super::health::IngestionHealth;
use super::subscriber::{build_subscription_messages, SubscriptionKind};

/// Per-security partial-frame state, bounded so a runaway subscription list
/// can never grow the process's memory without limit (§9 redesign note).
const MERGER_CAPACITY: usize = 10_000;

/// Connects to the vendor's tick feed, decodes frames, merges them into
/// normalized ticks, and forwards ready ticks on `out`. Reconnects with
/// exponential backoff on any transport error, branching on `DataSource`
/// wherever Kite and Dhan disagree on URL or header shape.
pub struct FeedTransport {
    config: Arc<AppConfig>,
    credentials: Arc<CredentialProvider>,
    instruments: Arc<InstrumentCache>,
    instrument_refs: Vec<(crate::feed::ExchangeSegment, String)>,
    out: mpsc::Sender<NormalizedTick>,
    health: Arc<IngestionHealth>,
}

impl FeedTransport {
    pub fn new(
        config: Arc<AppConfig>,
        credentials: Arc<CredentialProvider>,
        instruments: Arc<InstrumentCache>,
        instrument_refs: Vec<(crate::feed::ExchangeSegment, String)>,
        out: mpsc::Sender<NormalizedTick>,
        health: Arc<IngestionHealth>,
    ) -> Self {
        Self {
            config,
            credentials,
            instruments,
            instrument_refs,
            out,
            health,
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
                    warn!(error = %e, sleep_ms = backoff.as_millis() as u64, "feed transport error; reconnecting");

                    // Two fast reconnects in a row with no data delivered reads as
                    // an expired/rejected token, not a transient network blip.
                    if consecutive_fast_failures >= 2 {
                        warn!("repeated fast reconnects; treating as expired credentials");
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

    fn build_url_and_headers(&self, access_token: &str) -> Result<tokio_tungstenite::tungstenite::http::Request<()>, AppError> {
        let url = match self.config.data_source {
            DataSource::Kite => format!(
                "wss://ws.kite.trade/?api_key={}&access_token={}",
                urlencoding::encode(self.config.api_key.as_deref().unwrap_or_default()),
                urlencoding::encode(access_token),
            ),
            DataSource::Dhan => format!(
                "wss://api-feed.dhan.co?version=2&token={}&clientId={}&authType=2",
                urlencoding::encode(access_token),
                urlencoding::encode(self.config.client_id.as_deref().unwrap_or_default()),
            ),
        };

        let mut req = url
            .into_client_request()
            .map_err(|e| AppError::TransientNetwork(format!("ws request build failed: {e}")))?;

        match self.config.data_source {
            DataSource::Kite => {
                req.headers_mut()
                    .insert("Origin", HeaderValue::from_static("https://kite.zerodha.com"));
                req.headers_mut()
                    .insert("X-Kite-Version", HeaderValue::from_static("3"));
            }
            DataSource::Dhan => {}
        }
        req.headers_mut()
            .insert("User-Agent", HeaderValue::from_static("fno-md-core/0.1"));

        Ok(req)
    }

    async fn run_once(&self) -> Result<(), AppError> {
        if self.instrument_refs.is_empty() {
            return Err(AppError::Config("no instruments to subscribe".into()));
        }

        let token = self.credentials.get().await?;
        let req = self.build_url_and_headers(&token.access_token)?;

        info!(instrument_count = self.instrument_refs.len(), source = ?self.config.data_source, "connecting feed websocket");
        let (ws_stream, resp) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| AppError::TransientNetwork(format!("ws connect failed: {e}")))?;
        info!(status = %resp.status(), "feed websocket connected");

        let (mut write, mut read) = ws_stream.split();

        for msg in build_subscription_messages(SubscriptionKind::Full, &self.instrument_refs) {
            write
                .send(Message::Text(msg))
                .await
                .map_err(|e| AppError::TransientNetwork(format!("ws subscribe send failed: {e}")))?;
        }
        for msg in build_subscription_messages(SubscriptionKind::Depth20Level, &self.instrument_refs) {
            write
                .send(Message::Text(msg))
                .await
                .map_err(|e| AppError::TransientNetwork(format!("ws depth subscribe send failed: {e}")))?;
        }

        let mut merger: LruCache<String, PartialTickState> =
            LruCache::new(std::num::NonZeroUsize::new(MERGER_CAPACITY).unwrap());
        let mut stats = FeedDecodeStats::default();
        let idle_timeout = self.config.transport_idle_timeout;

        loop {
            let next = tokio::time::timeout(idle_timeout, read.next()).await;
            let msg = match next {
                Ok(Some(m)) => m,
                Ok(None) => return Ok(()),
                Err(_) => {
                    return Err(AppError::TransientNetwork("feed idle timeout".into()));
                }
            };

            match msg {
                Ok(Message::Binary(bin)) => {
                    self.handle_binary(&bin, &mut merger, &mut stats).await;
                }
                Ok(Message::Ping(p)) => {
                    write
                        .send(Message::Pong(p))
                        .await
                        .map_err(|e| AppError::TransientNetwork(format!("ws pong failed: {e}")))?;
                }
                Ok(Message::Pong(_)) => {}
                Ok(Message::Text(txt)) => {
                    debug!(message = %txt, "feed text frame");
                }
                Ok(Message::Close(frame)) => {
                    info!(close = ?frame, frames_decoded = stats.frames_decoded, frames_dropped = stats.frames_dropped, "feed websocket closed");
                    return Ok(());
                }
                Err(e) => {
                    return Err(AppError::TransientNetwork(format!("ws read error: {e}")));
                }
                _ => {}
            }
        }
    }

    async fn handle_binary(
        &self,
        bin: &[u8],
        merger: &mut LruCache<String, PartialTickState>,
        stats: &mut FeedDecodeStats,
    ) {
        let frame = match decode_frame(bin) {
            Ok(f) => f,
            Err(e) => {
                stats.record_dropped(bin.len());
                self.health.record_dropped();
                debug!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        stats.record_decoded(bin.len());

        if let FeedFrame::Index { .. } = frame {
            // Index packets carry no tradable security id; decoded for
            // observability but never routed downstream.
            return;
        }
        if let FeedFrame::Disconnect { reason_code, .. } = frame {
            warn!(reason_code, "feed sent disconnect frame");
            return;
        }
        if let FeedFrame::MarketStatus { .. } = frame {
            return;
        }

        let security_id = frame.header().security_id.to_string();
        let state = merger.get_or_insert_mut(security_id.clone(), PartialTickState::default);
        let ready = state.apply(&security_id, &frame);
        if !ready {
            return;
        }

        if let Some(tick) = enrich(state, &self.instruments) {
            self.health.record_published();
            if self.out.send(tick).await.is_err() {
                warn!("normalized tick channel closed; dropping tick");
            }
        } else {
            self.health.record_dropped();
            debug!(security_id, "dropping tick for unresolved instrument");
        }
    }
}
