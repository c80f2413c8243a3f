pub mod relay;

pub use relay::RelayClient;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::config::BROADCAST_INTERVAL_SECS;
use crate::error::Result;
use crate::state::MatchCache;

/// Latest serialized payload. `None` until the first batch has been cached.
pub type PayloadRx = watch::Receiver<Option<Arc<str>>>;
pub type PayloadTx = watch::Sender<Option<Arc<str>>>;

pub fn channel() -> (PayloadTx, PayloadRx) {
    watch::channel(None)
}

/// Polls the latest-matches cache and publishes its payload whenever the batch fingerprint moves.
pub struct Broadcaster {
    cache: Arc<MatchCache>,
    tx: PayloadTx,
    last_fingerprint: Option<u64>,
}

impl Broadcaster {
    pub fn new(cache: Arc<MatchCache>, tx: PayloadTx) -> Self {
        Self { cache, tx, last_fingerprint: None }
    }

    pub async fn run(mut self) {
        info!(interval_secs = BROADCAST_INTERVAL_SECS, "Broadcaster started");
        let mut tick = interval(Duration::from_secs(BROADCAST_INTERVAL_SECS));
        loop {
            tick.tick().await;
            if let Err(e) = self.publish_if_changed().await {
                error!(error = %e, "Broadcast publish failed");
            }
        }
    }

    /// Returns true when a new payload went out.
    pub async fn publish_if_changed(&mut self) -> Result<bool> {
        let fingerprint = self.cache.fingerprint().await;
        if self.last_fingerprint == Some(fingerprint) {
            return Ok(false);
        }
        let payload = self.cache.payload().await;
        if payload.timestamp.is_empty() {
            // Nothing cached yet.
            return Ok(false);
        }
        let text = serde_json::to_string(&payload)?;
        self.tx.send_replace(Some(Arc::from(text)));
        self.last_fingerprint = Some(fingerprint);
        debug!(
            event = "BROADCAST",
            matches = payload.matches.len(),
            subscribers = self.tx.receiver_count(),
            "BROADCAST | {} matches",
            payload.matches.len()
        );
        Ok(true)
    }
}
