//! Wake channel registry
//!
//! Per lock-name fan-out of "lock released" notifications to local waiters.
//! The registry keeps at most one transport subscription per channel,
//! refcounted across all local threads blocked on that name. Messages for a
//! channel go through an ordered queue drained by a single dispatcher at a
//! time; each unlock message releases exactly one permit on the entry's
//! latch, and the latch's FIFO waiter queue preserves enqueue order.
//!
//! Delivery from the transport is best-effort, so waiters never rely on the
//! latch alone: every wait is bounded by the store-reported TTL when one is
//! known.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use locket_api::{PubSubTransport, Result, UNLOCK_MESSAGE};

/// Process-wide registry of wake channels.
pub struct WakeChannelRegistry {
    transport: Arc<dyn PubSubTransport>,
    entries: Mutex<HashMap<String, EntrySlot>>,
}

struct EntrySlot {
    entry: Arc<WakeEntry>,
    refs: usize,
    reader: JoinHandle<()>,
}

/// Per-channel latch plus delivery queue, shared by all local waiters.
struct WakeEntry {
    latch: Semaphore,
    queue: parking_lot::Mutex<DeliveryQueue>,
}

#[derive(Default)]
struct DeliveryQueue {
    pending: VecDeque<Vec<u8>>,
    dispatching: bool,
}

impl WakeEntry {
    fn new() -> Self {
        Self {
            latch: Semaphore::new(0),
            queue: parking_lot::Mutex::new(DeliveryQueue::default()),
        }
    }

    /// Queue `payload` and, when no dispatcher is active, drain in order.
    /// The pop-or-clear step runs under the queue lock, so a message
    /// arriving while a drain finishes is either taken by that drain or
    /// starts a fresh one; none is ever skipped.
    fn on_message(&self, payload: Vec<u8>) {
        {
            let mut q = self.queue.lock();
            q.pending.push_back(payload);
            if q.dispatching {
                return;
            }
            q.dispatching = true;
        }
        loop {
            let message = {
                let mut q = self.queue.lock();
                match q.pending.pop_front() {
                    Some(m) => m,
                    None => {
                        q.dispatching = false;
                        return;
                    }
                }
            };
            if message.as_slice() == UNLOCK_MESSAGE {
                // One permit per release: exactly one queued waiter retries.
                self.latch.add_permits(1);
            }
        }
    }

    /// Wait for a wake, bounded by `ttl` when known. Returns whether a
    /// notification (rather than the timer) ended the wait.
    async fn wait(&self, ttl: Option<Duration>) -> bool {
        let acquired = match ttl {
            Some(bound) => match tokio::time::timeout(bound, self.latch.acquire()).await {
                Ok(result) => result.ok(),
                Err(_) => None,
            },
            None => self.latch.acquire().await.ok(),
        };
        match acquired {
            Some(permit) => {
                permit.forget();
                true
            }
            None => false,
        }
    }
}

impl WakeChannelRegistry {
    pub fn new(transport: Arc<dyn PubSubTransport>) -> Self {
        Self {
            transport,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a local waiter for `channel`, reusing the existing
    /// subscription when one is live. Cancelling this call before it
    /// completes leaves the registry unchanged.
    pub async fn subscribe(self: &Arc<Self>, channel: &str) -> Result<WakeHandle> {
        let mut entries = self.entries.lock().await;
        if let Some(slot) = entries.get_mut(channel) {
            slot.refs += 1;
            return Ok(self.handle(channel, slot.entry.clone()));
        }

        // Transport subscribe happens before the slot exists: a caller
        // cancelled mid-subscribe strands at most a dangling transport
        // stream, which the store prunes, never a registry slot.
        let mut stream = self.transport.subscribe(channel).await?;
        let entry = Arc::new(WakeEntry::new());
        let reader_entry = entry.clone();
        let reader_channel = channel.to_string();
        let reader = tokio::spawn(async move {
            while let Some(payload) = stream.recv().await {
                reader_entry.on_message(payload);
            }
            debug!(channel = %reader_channel, "wake stream ended");
        });
        entries.insert(
            channel.to_string(),
            EntrySlot {
                entry: entry.clone(),
                refs: 1,
                reader,
            },
        );
        debug!(channel, "wake channel subscribed");
        Ok(self.handle(channel, entry))
    }

    fn handle(self: &Arc<Self>, channel: &str, entry: Arc<WakeEntry>) -> WakeHandle {
        WakeHandle {
            registry: Arc::clone(self),
            channel: channel.to_string(),
            entry,
            released: false,
        }
    }

    /// Drop one waiter reference; the last one tears the subscription down.
    async fn release(&self, channel: &str) {
        let mut entries = self.entries.lock().await;
        let remove = match entries.get_mut(channel) {
            Some(slot) => {
                slot.refs -= 1;
                slot.refs == 0
            }
            None => false,
        };
        if !remove {
            return;
        }
        if let Some(slot) = entries.remove(channel) {
            slot.reader.abort();
        }
        // Still under the registry lock, so a concurrent subscribe cannot
        // recreate the channel before the transport side is gone.
        if let Err(e) = self.transport.unsubscribe(channel).await {
            warn!(channel, error = %e, "wake channel unsubscribe failed");
        } else {
            debug!(channel, "wake channel unsubscribed");
        }
    }

    /// Number of channels with live subscriptions.
    pub async fn channel_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// One local waiter's registration on a wake channel.
pub struct WakeHandle {
    registry: Arc<WakeChannelRegistry>,
    channel: String,
    entry: Arc<WakeEntry>,
    released: bool,
}

impl WakeHandle {
    /// Wait for a wake, bounded by `ttl` when known.
    pub async fn wait(&self, ttl: Option<Duration>) -> bool {
        self.entry.wait(ttl).await
    }

    /// Deregister this waiter. Preferred over dropping: the refcount is
    /// released before the call returns.
    pub async fn unsubscribe(mut self) {
        self.released = true;
        let registry = Arc::clone(&self.registry);
        let channel = std::mem::take(&mut self.channel);
        registry.release(&channel).await;
    }
}

impl Drop for WakeHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Backstop for cancelled waits; runs the release out of band.
        let registry = Arc::clone(&self.registry);
        let channel = std::mem::take(&mut self.channel);
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move { registry.release(&channel).await });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locket_store::MemoryStore;

    fn registry(store: &MemoryStore) -> Arc<WakeChannelRegistry> {
        Arc::new(WakeChannelRegistry::new(Arc::new(store.clone())))
    }

    #[tokio::test]
    async fn test_waiters_wake_in_enqueue_order() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        let handle = registry.subscribe("c").await.unwrap();
        let entry = handle.entry.clone();

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for id in 0..3 {
            let entry = entry.clone();
            let order = order.clone();
            tasks.push(tokio::spawn(async move {
                entry.wait(None).await;
                order.lock().push(id);
            }));
            // Let each waiter park before the next one queues up.
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for _ in 0..3 {
            store.publish("c", UNLOCK_MESSAGE).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_refcounted_teardown() {
        let store = MemoryStore::new();
        let registry = registry(&store);

        let first = registry.subscribe("c").await.unwrap();
        let second = registry.subscribe("c").await.unwrap();
        assert_eq!(registry.channel_count().await, 1);

        first.unsubscribe().await;
        // One waiter left: the transport subscription must survive.
        assert_eq!(store.publish("c", UNLOCK_MESSAGE).await.unwrap(), 1);

        second.unsubscribe().await;
        assert_eq!(registry.channel_count().await, 0);
        assert_eq!(store.publish("c", UNLOCK_MESSAGE).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_unlock_payload_does_not_wake() {
        let store = MemoryStore::new();
        let registry = registry(&store);
        let handle = registry.subscribe("c").await.unwrap();

        store.publish("c", b"9").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.wait(Some(Duration::from_millis(100))).await);

        store.publish("c", UNLOCK_MESSAGE).await.unwrap();
        assert!(handle.wait(Some(Duration::from_millis(100))).await);
        handle.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_drop_backstop_releases_refcount() {
        let store = MemoryStore::new();
        let registry = registry(&store);

        let handle = registry.subscribe("c").await.unwrap();
        drop(handle);
        // The spawned cleanup needs a tick to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.channel_count().await, 0);
    }
}
