//! Shared acquire/release machinery behind every lock flavor.
//!
//! A `RawLock` binds one owner field to one storage key and drives the
//! acquire loop: attempt a script, and while the store reports a holder,
//! park on the lock's wake channel bounded by the reported TTL before
//! retrying. Mutex and read/write handles differ only in the scripts they
//! run and the fields they present, so everything else lives here.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time::{Instant, timeout};
use tracing::debug;

use locket_api::{LockError, Result, ScriptArg, ScriptId, ScriptReply};

use crate::client::ClientShared;

/// Outcome of a single acquire script attempt.
pub(crate) enum Attempt {
    Acquired,
    /// Someone else holds the lock; `ttl` is the remaining hold time when
    /// the store reports one.
    Blocked { ttl: Option<Duration> },
}

#[derive(Clone)]
pub(crate) struct RawLock {
    shared: Arc<ClientShared>,
    name: String,
    key: String,
    channel: String,
    field: String,
    /// Fields passed to the acquire script, after the lease argument.
    acquire_fields: Vec<String>,
    acquire_script: ScriptId,
    release_script: ScriptId,
    /// Lease applied by the most recent successful acquire; the mutex
    /// release script re-extends the hold by this much for the units that
    /// remain.
    last_lease: Arc<parking_lot::Mutex<Duration>>,
}

impl RawLock {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<ClientShared>,
        name: String,
        key: String,
        channel: String,
        field: String,
        acquire_fields: Vec<String>,
        acquire_script: ScriptId,
        release_script: ScriptId,
    ) -> Self {
        Self {
            shared,
            name,
            key,
            channel,
            field,
            acquire_fields,
            acquire_script,
            release_script,
            last_lease: Arc::new(parking_lot::Mutex::new(Duration::ZERO)),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn owner_field(&self) -> &str {
        &self.field
    }

    fn check_lease(lease: Duration) -> Result<()> {
        if lease.as_millis() == 0 {
            return Err(LockError::InvalidArgument(
                "lease must be at least one millisecond".to_string(),
            ));
        }
        Ok(())
    }

    /// Run the acquire script once.
    pub(crate) async fn try_once(&self, lease: Option<Duration>) -> Result<Attempt> {
        let effective = lease.unwrap_or_else(|| self.shared.watchdog.lease());
        let keys = [self.key.clone()];
        let mut args = Vec::with_capacity(1 + self.acquire_fields.len());
        args.push(ScriptArg::Int(effective.as_millis() as i64));
        for field in &self.acquire_fields {
            args.push(ScriptArg::Str(field.clone()));
        }
        match self
            .shared
            .executor
            .execute(self.acquire_script, &keys, &args)
            .await?
        {
            ScriptReply::Nil => {
                *self.last_lease.lock() = effective;
                if lease.is_none() {
                    self.shared.watchdog.register(&self.key, &self.field);
                }
                counter!("locket_lock_acquisitions_total").increment(1);
                debug!(name = %self.name, field = %self.field, "lock acquired");
                Ok(Attempt::Acquired)
            }
            ScriptReply::Int(ttl) => Ok(Attempt::Blocked {
                ttl: (ttl >= 0).then(|| Duration::from_millis(ttl as u64)),
            }),
            other => Err(protocol(self.acquire_script, &other)),
        }
    }

    /// Acquire, waiting indefinitely. `lease == None` puts the hold under
    /// the watchdog.
    pub(crate) async fn acquire(&self, lease: Option<Duration>) -> Result<()> {
        if let Some(lease) = lease {
            Self::check_lease(lease)?;
        }
        let mut ttl = match self.try_once(lease).await? {
            Attempt::Acquired => return Ok(()),
            Attempt::Blocked { ttl } => ttl,
        };
        let handle = self.shared.wake.subscribe(&self.channel).await?;
        let result = loop {
            handle.wait(ttl).await;
            match self.try_once(lease).await {
                Ok(Attempt::Acquired) => break Ok(()),
                Ok(Attempt::Blocked { ttl: next }) => ttl = next,
                Err(e) => break Err(e),
            }
        };
        handle.unsubscribe().await;
        result
    }

    /// Acquire with a wait bound. Returns `Ok(false)` when `wait` elapses
    /// without the lock becoming available.
    pub(crate) async fn try_acquire(&self, wait: Duration, lease: Option<Duration>) -> Result<bool> {
        if let Some(lease) = lease {
            Self::check_lease(lease)?;
        }
        let deadline = Instant::now() + wait;
        let mut ttl = match self.try_once(lease).await? {
            Attempt::Acquired => return Ok(true),
            Attempt::Blocked { ttl } => ttl,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let handle = match timeout(remaining, self.shared.wake.subscribe(&self.channel)).await {
            Ok(subscribed) => subscribed?,
            Err(_) => return Ok(false),
        };
        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break Ok(false);
            }
            let bound = match ttl {
                Some(ttl) => ttl.min(remaining),
                None => remaining,
            };
            handle.wait(Some(bound)).await;
            match self.try_once(lease).await {
                Ok(Attempt::Acquired) => break Ok(true),
                Ok(Attempt::Blocked { ttl: next }) => ttl = next,
                Err(e) => break Err(e),
            }
        };
        handle.unsubscribe().await;
        result
    }

    /// Release one hold unit. Fully releasing the hold cancels its
    /// watchdog; releasing a lock this owner does not hold fails with
    /// `NotOwner`.
    pub(crate) async fn release(&self) -> Result<()> {
        let keys = [self.key.clone(), self.channel.clone()];
        let mut args = vec![unlock_payload()];
        if self.release_script == ScriptId::MutexRelease {
            // A handle that never acquired has no recorded lease; the script
            // still wants a positive one for its refresh branch.
            let last = *self.last_lease.lock();
            let lease = if last.is_zero() {
                self.shared.watchdog.lease()
            } else {
                last
            };
            args.push(ScriptArg::Int(lease.as_millis() as i64));
        }
        args.push(ScriptArg::Str(self.field.clone()));
        match self
            .shared
            .executor
            .execute(self.release_script, &keys, &args)
            .await?
        {
            ScriptReply::Nil => Err(LockError::NotOwner {
                name: self.name.clone(),
                owner: self.field.clone(),
            }),
            ScriptReply::Bool(false) => Ok(()),
            ScriptReply::Bool(true) => {
                self.shared.watchdog.cancel(&self.key, &self.field);
                counter!("locket_lock_releases_total").increment(1);
                debug!(name = %self.name, field = %self.field, "lock released");
                Ok(())
            }
            other => Err(protocol(self.release_script, &other)),
        }
    }

    /// Delete the lock regardless of owner. Returns whether a lock existed.
    pub(crate) async fn force_unlock(&self) -> Result<bool> {
        let keys = [self.key.clone(), self.channel.clone()];
        let args = [unlock_payload()];
        match self
            .shared
            .executor
            .execute(ScriptId::ForceUnlock, &keys, &args)
            .await?
        {
            ScriptReply::Bool(deleted) => {
                if deleted {
                    self.shared.watchdog.cancel_key(&self.key);
                    debug!(name = %self.name, "lock force released");
                }
                Ok(deleted)
            }
            other => Err(protocol(ScriptId::ForceUnlock, &other)),
        }
    }

    /// Query lock state, either globally or for one owner field.
    pub(crate) async fn state(&self, field: Option<&str>) -> Result<ScriptReply> {
        let keys = [self.key.clone()];
        let args = match field {
            Some(field) => vec![ScriptArg::Str(field.to_string())],
            None => Vec::new(),
        };
        self.shared
            .executor
            .execute(ScriptId::IsLocked, &keys, &args)
            .await
    }

    /// Reentrant hold depth for this handle's owner field.
    pub(crate) async fn hold_count(&self) -> Result<u64> {
        match self.state(Some(&self.field)).await? {
            ScriptReply::Int(count) => Ok(count.max(0) as u64),
            other => Err(protocol(ScriptId::IsLocked, &other)),
        }
    }
}

fn unlock_payload() -> ScriptArg {
    ScriptArg::Str(String::from_utf8_lossy(locket_api::UNLOCK_MESSAGE).into_owned())
}

pub(crate) fn protocol(script: ScriptId, reply: &ScriptReply) -> LockError {
    LockError::Protocol {
        script: script.name(),
        detail: format!("unexpected reply {reply:?}"),
    }
}
