//! Lease watchdog
//!
//! Background renewal for holds acquired without an explicit lease. Each
//! watched hold gets one task that re-extends the store-side TTL to the
//! configured watchdog timeout every third of that timeout, and stops as
//! soon as the hold is released, force-released, or reported gone by the
//! store.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use locket_api::{Result, ScriptArg, ScriptExecutor, ScriptId, ScriptReply};

use crate::config::LockConfig;

/// Renewal tasks keyed by `(lock key, owner field)`.
pub struct LeaseWatchdog {
    executor: Arc<dyn ScriptExecutor>,
    config: LockConfig,
    tasks: DashMap<(String, String), mpsc::Sender<()>>,
}

impl LeaseWatchdog {
    pub fn new(executor: Arc<dyn ScriptExecutor>, config: LockConfig) -> Self {
        Self {
            executor,
            config,
            tasks: DashMap::new(),
        }
    }

    /// TTL applied to watched holds.
    pub fn lease(&self) -> std::time::Duration {
        self.config.watchdog_timeout
    }

    /// Start renewing `(key, field)`. A second registration for the same
    /// hold (a reentrant acquire) is a no-op; the existing task covers it.
    pub fn register(self: &Arc<Self>, key: &str, field: &str) {
        let slot = match self.tasks.entry((key.to_string(), field.to_string())) {
            Entry::Occupied(_) => return,
            Entry::Vacant(v) => v,
        };
        let (stop_tx, mut stop_rx) = mpsc::channel(1);
        let my_tx = stop_tx.clone();
        slot.insert(stop_tx);
        gauge!("locket_watchdogs_active").increment(1.0);

        let watchdog = Arc::clone(self);
        let key = key.to_string();
        let field = field.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watchdog.config.renewal_interval());
            // First tick completes immediately; the hold was just extended.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => match watchdog.renew(&key, &field).await {
                        Ok(true) => {
                            counter!("locket_lock_renewals_total").increment(1);
                            debug!(key = %key, field = %field, "lease renewed");
                        }
                        Ok(false) => {
                            warn!(key = %key, field = %field, "hold no longer present, stopping watchdog");
                            // Only remove our own entry: a release followed by
                            // a fresh acquire may have re-registered this slot.
                            watchdog.tasks.remove_if(
                                &(key.clone(), field.clone()),
                                |_, tx| tx.same_channel(&my_tx),
                            );
                            break;
                        }
                        Err(e) => {
                            warn!(key = %key, field = %field, error = %e, "lease renewal failed");
                        }
                    },
                    _ = stop_rx.recv() => break,
                }
            }
            gauge!("locket_watchdogs_active").decrement(1.0);
        });
    }

    /// Stop renewing `(key, field)` if it is being watched.
    pub fn cancel(&self, key: &str, field: &str) {
        if let Some((_, tx)) = self.tasks.remove(&(key.to_string(), field.to_string())) {
            let _ = tx.try_send(());
            debug!(key, field, "watchdog cancelled");
        }
    }

    /// Stop every renewal task for `key`, regardless of owner.
    pub fn cancel_key(&self, key: &str) {
        self.tasks.retain(|(k, _), tx| {
            if k == key {
                let _ = tx.try_send(());
                false
            } else {
                true
            }
        });
    }

    /// Stop all renewal tasks. Used at client shutdown.
    pub fn cancel_all(&self) {
        self.tasks.retain(|_, tx| {
            let _ = tx.try_send(());
            false
        });
    }

    /// Number of holds currently being renewed.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    async fn renew(&self, key: &str, field: &str) -> Result<bool> {
        let keys = [key.to_string()];
        let args = [
            ScriptArg::Int(self.config.watchdog_timeout.as_millis() as i64),
            ScriptArg::Str(field.to_string()),
        ];
        match self.executor.execute(ScriptId::Renew, &keys, &args).await? {
            ScriptReply::Bool(renewed) => Ok(renewed),
            other => Err(locket_api::LockError::Protocol {
                script: ScriptId::Renew.name(),
                detail: format!("unexpected renew reply {other:?}"),
            }),
        }
    }
}
