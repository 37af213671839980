//! Reentrant distributed read/write lock.
//!
//! A single storage hash carries a `mode` marker plus per-owner unit
//! counters; per-unit timeout marker keys let individual read holds expire
//! without collapsing the shared hash. Readers coexist, writers exclude
//! everyone else, and a write holder may take read units without
//! releasing the write.

use std::sync::Arc;
use std::time::Duration;

use locket_api::{READ_MODE, Result, ScriptId, ScriptReply, WRITE_MODE, rwlock_channel, write_field};

use crate::client::ClientShared;
use crate::owner::OwnerId;
use crate::raw::{RawLock, protocol};

/// Handle to a named read/write lock pair. Both sides share the owner
/// identity, so the write holder's read acquisitions are reentrant.
pub struct ReadWriteLockEntry {
    shared: Arc<ClientShared>,
    name: String,
    owner: OwnerId,
}

impl ReadWriteLockEntry {
    pub(crate) fn new(shared: Arc<ClientShared>, name: &str, owner: OwnerId) -> Self {
        Self {
            shared,
            name: name.to_string(),
            owner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read side of the pair.
    pub fn read(&self) -> ReadLockEntry {
        let field = self.owner.to_string();
        let raw = RawLock::new(
            Arc::clone(&self.shared),
            self.name.clone(),
            self.name.clone(),
            rwlock_channel(&self.name),
            field.clone(),
            vec![field.clone(), write_field(&field)],
            ScriptId::ReadAcquire,
            ScriptId::RwRelease,
        );
        ReadLockEntry { raw }
    }

    /// Write side of the pair.
    pub fn write(&self) -> WriteLockEntry {
        let field = write_field(&self.owner.to_string());
        let raw = RawLock::new(
            Arc::clone(&self.shared),
            self.name.clone(),
            self.name.clone(),
            rwlock_channel(&self.name),
            field.clone(),
            vec![field],
            ScriptId::WriteAcquire,
            ScriptId::RwRelease,
        );
        WriteLockEntry { raw }
    }
}

/// Shared-mode handle. Multiple owners may hold read units at once.
#[derive(Clone)]
pub struct ReadLockEntry {
    raw: RawLock,
}

/// Exclusive-mode handle. At most one owner holds write units, and no
/// other owner may hold read units while it does.
#[derive(Clone)]
pub struct WriteLockEntry {
    raw: RawLock,
}

macro_rules! rw_lock_ops {
    ($entry:ident, $mode:expr) => {
        impl $entry {
            pub fn name(&self) -> &str {
                self.raw.name()
            }

            pub fn owner(&self) -> &str {
                self.raw.owner_field()
            }

            /// Acquire, waiting as long as it takes, renewed by the
            /// watchdog until released.
            pub async fn acquire(&self) -> Result<()> {
                self.raw.acquire(None).await
            }

            /// Acquire with a fixed lease.
            pub async fn acquire_with_lease(&self, lease: Duration) -> Result<()> {
                self.raw.acquire(Some(lease)).await
            }

            /// Single acquisition attempt without waiting.
            pub async fn try_acquire(&self) -> Result<bool> {
                self.raw.try_acquire(Duration::ZERO, None).await
            }

            /// Acquire, waiting up to `wait`.
            pub async fn try_acquire_with(
                &self,
                wait: Duration,
                lease: Option<Duration>,
            ) -> Result<bool> {
                self.raw.try_acquire(wait, lease).await
            }

            /// Release one hold unit of this mode.
            pub async fn release(&self) -> Result<()> {
                self.raw.release().await
            }

            /// Delete the whole lock regardless of owner or mode.
            pub async fn force_release(&self) -> Result<bool> {
                self.raw.force_unlock().await
            }

            /// Whether the lock is currently held in this handle's mode.
            pub async fn is_locked(&self) -> Result<bool> {
                match self.raw.state(None).await? {
                    // An absent lock reports a zero holder count.
                    ScriptReply::Int(_) => Ok(false),
                    ScriptReply::Str(mode) => Ok(mode == $mode),
                    other => Err(protocol(ScriptId::IsLocked, &other)),
                }
            }

            /// Whether this handle's owner holds units in this mode.
            pub async fn is_held(&self) -> Result<bool> {
                Ok(self.hold_count().await? > 0)
            }

            /// Reentrant hold depth for this handle's owner in this mode.
            pub async fn hold_count(&self) -> Result<u64> {
                self.raw.hold_count().await
            }
        }
    };
}

rw_lock_ops!(ReadLockEntry, READ_MODE);
rw_lock_ops!(WriteLockEntry, WRITE_MODE);
