//! Lock client
//!
//! Entry point for minting lock handles. A client carries the script
//! executor and pub/sub transport for one store, a process-unique client
//! id, and the shared wake registry and lease watchdog every handle uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;
use uuid::Uuid;

use locket_api::{PubSubTransport, ScriptExecutor};

use crate::config::LockConfig;
use crate::mutex::LockEntry;
use crate::owner::OwnerId;
use crate::rwlock::ReadWriteLockEntry;
use crate::wake::WakeChannelRegistry;
use crate::watchdog::LeaseWatchdog;

pub(crate) struct ClientShared {
    pub(crate) executor: Arc<dyn ScriptExecutor>,
    pub(crate) wake: Arc<WakeChannelRegistry>,
    pub(crate) watchdog: Arc<LeaseWatchdog>,
    client_id: Uuid,
    next_handle: AtomicU64,
}

impl ClientShared {
    fn next_owner(&self) -> OwnerId {
        OwnerId::new(
            self.client_id,
            self.next_handle.fetch_add(1, Ordering::Relaxed),
        )
    }
}

/// Client for a TTL-capable store with script execution and pub/sub.
/// Cloning is cheap; clones share the wake registry and watchdog.
#[derive(Clone)]
pub struct LockClient {
    shared: Arc<ClientShared>,
}

impl LockClient {
    pub fn new(executor: Arc<dyn ScriptExecutor>, transport: Arc<dyn PubSubTransport>) -> Self {
        Self::with_config(executor, transport, LockConfig::default())
    }

    pub fn with_config(
        executor: Arc<dyn ScriptExecutor>,
        transport: Arc<dyn PubSubTransport>,
        config: LockConfig,
    ) -> Self {
        let client_id = Uuid::new_v4();
        let watchdog = Arc::new(LeaseWatchdog::new(Arc::clone(&executor), config));
        info!(client_id = %client_id, "lock client created");
        Self {
            shared: Arc::new(ClientShared {
                executor,
                wake: Arc::new(WakeChannelRegistry::new(transport)),
                watchdog,
                client_id,
                next_handle: AtomicU64::new(1),
            }),
        }
    }

    /// Process-unique identity embedded in every owner field this client
    /// mints.
    pub fn id(&self) -> Uuid {
        self.shared.client_id
    }

    /// Mint a mutex handle with a fresh owner identity.
    pub fn mutex(&self, name: &str) -> LockEntry {
        let owner = self.shared.next_owner();
        LockEntry::new(Arc::clone(&self.shared), name, owner)
    }

    /// Mint a read/write lock handle pair with a fresh owner identity.
    pub fn read_write(&self, name: &str) -> ReadWriteLockEntry {
        let owner = self.shared.next_owner();
        ReadWriteLockEntry::new(Arc::clone(&self.shared), name, owner)
    }

    /// Stop all lease renewal for this client. Unreleased watched holds
    /// expire on their own after the watchdog timeout.
    pub fn shutdown(&self) {
        self.shared.watchdog.cancel_all();
        info!(client_id = %self.shared.client_id, "lock client shut down");
    }
}
