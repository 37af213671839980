//! Pub/sub transport interface
//!
//! Delivery is best-effort: a release notification may be dropped by the
//! transport, so waiters always pair the subscription with a TTL-bounded
//! timer. The lock engine keeps at most one transport subscription per
//! channel per process and fans messages out locally.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// Stream of raw payloads published on one channel.
pub struct MessageStream {
    channel: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MessageStream {
    pub fn new(channel: impl Into<String>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            rx,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next payload, or `None` once the transport side is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Best-effort publish/subscribe transport to the store.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Open a subscription for `channel`.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;

    /// Publish `payload` on `channel`; returns the number of subscribers the
    /// store delivered to.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize>;

    /// Tear down this process's subscription for `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
}
