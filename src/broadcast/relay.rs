use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::broadcast::PayloadRx;
use crate::config::{RECONNECT_BACKOFF_MS, WS_PING_INTERVAL_SECS};
use crate::error::Result;

/// Forwards every published payload to an external WebSocket relay, reconnecting with backoff.
pub struct RelayClient {
    url: String,
    rx: PayloadRx,
    health: Arc<HealthState>,
}

enum Closed {
    /// The relay hung up; reconnect.
    Remote,
    /// The broadcaster is gone; stop.
    Publisher,
}

impl RelayClient {
    pub fn new(url: String, rx: PayloadRx, health: Arc<HealthState>) -> Self {
        Self { url, rx, health }
    }

    pub async fn run(mut self) {
        let mut backoff_idx = 0usize;

        loop {
            info!("Relay connecting to {}", self.url);
            let outcome = self.connect_once().await;
            self.health.set_relay_connected(false);
            match outcome {
                Ok(Closed::Publisher) => {
                    info!("Broadcast channel closed, relay client stopping");
                    return;
                }
                Ok(Closed::Remote) => {
                    info!("Relay connection closed cleanly");
                    backoff_idx = 0;
                }
                Err(e) => error!("Relay connection error: {e}"),
            }

            let delay_ms = backoff_delay_ms(backoff_idx);
            backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len().saturating_sub(1));

            warn!("Relay reconnecting in {delay_ms}ms");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn connect_once(&mut self) -> Result<Closed> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        self.health.set_relay_connected(true);
        info!("Relay connected");

        // Catch the relay up with whatever is current.
        let current = self.rx.borrow_and_update().clone();
        if let Some(text) = current {
            write.send(Message::Text(text.to_string().into())).await?;
        }

        let mut ping_interval = interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping_interval.tick().await;

        loop {
            tokio::select! {
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(Closed::Publisher);
                    }
                    let current = self.rx.borrow_and_update().clone();
                    if let Some(text) = current {
                        debug!(bytes = text.len(), "Relay forward");
                        write.send(Message::Text(text.to_string().into())).await?;
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(Closed::Remote),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }

                _ = ping_interval.tick() => {
                    debug!("Relay ping");
                    write.send(Message::Ping(vec![].into())).await?;
                }
            }
        }
    }
}

fn backoff_delay_ms(idx: usize) -> u64 {
    RECONNECT_BACKOFF_MS
        .get(idx)
        .or_else(|| RECONNECT_BACKOFF_MS.last())
        .copied()
        .unwrap_or(1_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_saturates_at_last_step() {
        assert_eq!(backoff_delay_ms(0), RECONNECT_BACKOFF_MS[0]);
        assert_eq!(backoff_delay_ms(99), *RECONNECT_BACKOFF_MS.last().unwrap());
    }

    #[tokio::test]
    async fn unreachable_relay_reports_disconnected() {
        let (_tx, rx) = crate::broadcast::channel();
        let health = Arc::new(HealthState::new());
        let mut client = RelayClient::new("ws://127.0.0.1:1".to_string(), rx, Arc::clone(&health));
        assert!(client.connect_once().await.is_err());
        assert!(!health.snapshot().relay_connected);
    }
}
