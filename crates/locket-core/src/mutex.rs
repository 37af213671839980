//! Reentrant distributed mutex.
//!
//! One storage hash per lock name; the owner field counts reentrant hold
//! units, and every release decrements one unit. Fully releasing publishes
//! an unlock message on the lock's wake channel so the oldest waiter
//! retries first.

use std::time::Duration;

use locket_api::{Result, ScriptId, ScriptReply, lock_channel};

use crate::client::ClientShared;
use crate::owner::OwnerId;
use crate::raw::{RawLock, protocol};

/// Handle to a named reentrant mutex. Cloning preserves the owner
/// identity, so clones share hold units.
#[derive(Clone)]
pub struct LockEntry {
    raw: RawLock,
}

impl LockEntry {
    pub(crate) fn new(shared: std::sync::Arc<ClientShared>, name: &str, owner: OwnerId) -> Self {
        let field = owner.to_string();
        let raw = RawLock::new(
            shared,
            name.to_string(),
            name.to_string(),
            lock_channel(name),
            field.clone(),
            vec![field],
            ScriptId::MutexAcquire,
            ScriptId::MutexRelease,
        );
        Self { raw }
    }

    /// Lock name this handle operates on.
    pub fn name(&self) -> &str {
        self.raw.name()
    }

    /// Owner field this handle acquires and releases under.
    pub fn owner(&self) -> &str {
        self.raw.owner_field()
    }

    /// Acquire, waiting as long as it takes. The hold is renewed by the
    /// watchdog until released.
    pub async fn acquire(&self) -> Result<()> {
        self.raw.acquire(None).await
    }

    /// Acquire with a fixed lease; the hold expires on its own after
    /// `lease` unless released or reacquired first.
    pub async fn acquire_with_lease(&self, lease: Duration) -> Result<()> {
        self.raw.acquire(Some(lease)).await
    }

    /// Single acquisition attempt without waiting.
    pub async fn try_acquire(&self) -> Result<bool> {
        self.raw.try_acquire(Duration::ZERO, None).await
    }

    /// Acquire, waiting up to `wait`. `lease == None` puts the hold under
    /// the watchdog.
    pub async fn try_acquire_with(&self, wait: Duration, lease: Option<Duration>) -> Result<bool> {
        self.raw.try_acquire(wait, lease).await
    }

    /// Release one hold unit. Fails with [`locket_api::LockError::NotOwner`]
    /// when another owner holds the lock.
    pub async fn release(&self) -> Result<()> {
        self.raw.release().await
    }

    /// Delete the lock regardless of owner. Returns whether a lock
    /// existed to delete.
    pub async fn force_release(&self) -> Result<bool> {
        self.raw.force_unlock().await
    }

    /// Whether any owner currently holds the lock.
    pub async fn is_locked(&self) -> Result<bool> {
        match self.raw.state(None).await? {
            ScriptReply::Int(holders) => Ok(holders > 0),
            ScriptReply::Str(_) => Ok(true),
            other => Err(protocol(ScriptId::IsLocked, &other)),
        }
    }

    /// Whether this handle's owner holds the lock.
    pub async fn is_held(&self) -> Result<bool> {
        Ok(self.hold_count().await? > 0)
    }

    /// Reentrant hold depth for this handle's owner.
    pub async fn hold_count(&self) -> Result<u64> {
        self.raw.hold_count().await
    }
}
