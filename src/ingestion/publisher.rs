use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::{Bus, TICKS_QUEUE};
use crate::feed::NormalizedTick;

/// Drains normalized ticks from the transport and publishes each as a
/// persistent bincode-encoded message on the `ticks` queue. A bounded
/// channel between transport and publisher provides backpressure: if the
/// publisher falls behind, the channel fills and the transport blocks on
/// `send` rather than buffering unboundedly in process memory.
pub struct Publisher {
    bus: Arc<Bus>,
    inbox: mpsc::Receiver<NormalizedTick>,
}

impl Publisher {
    pub fn new(bus: Arc<Bus>, inbox: mpsc::Receiver<NormalizedTick>) -> Self {
        Self { bus, inbox }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(mut self) {
        while let Some(tick) = self.inbox.recv().await {
            let payload = match bincode::serialize(&tick) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, security_id = %tick.security_id, "failed to serialize tick; dropping");
                    continue;
                }
            };
            if let Err(e) = self.bus.publish_persistent(TICKS_QUEUE, &payload).await {
                warn!(error = %e, security_id = %tick.security_id, "failed to publish tick; dropping");
            }
        }
    }
}
