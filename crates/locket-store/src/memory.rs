//! In-memory store backend
//!
//! A single-writer, TTL-capable key/value store that executes every lock
//! script inside one critical section, giving the same atomicity a server-side
//! script has on a networked store. Keys expire lazily: an entry past its
//! deadline is evicted the next time any script touches it, which is also how
//! an abandoned lock becomes acquirable again.
//!
//! Pub/sub is in-process and best-effort: publishing walks the channel's
//! subscriber list and drops senders whose receiver side went away.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use locket_api::{
    LockError, MessageStream, MODE_FIELD, PubSubTransport, READ_MODE, Result, ScriptArg,
    ScriptExecutor, ScriptId, ScriptReply, WRITE_FIELD_SUFFIX, WRITE_MODE, rw_timeout_key,
};

/// Shared in-memory store handle.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    keys: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Hash(HashMap<String, String>),
    /// Standalone marker keys carry no payload worth reading; only their
    /// expiry matters.
    Plain,
}

impl Entry {
    fn hash(fields: HashMap<String, String>, expires_at: Instant) -> Self {
        Self {
            value: Value::Hash(fields),
            expires_at: Some(expires_at),
        }
    }

    fn marker(expires_at: Instant) -> Self {
        Self {
            value: Value::Plain,
            expires_at: Some(expires_at),
        }
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Remaining TTL in milliseconds, `-1` when the entry has no deadline.
    fn pttl(&self, now: Instant) -> i64 {
        match self.expires_at {
            Some(deadline) => deadline.saturating_duration_since(now).as_millis() as i64,
            None => -1,
        }
    }

    /// Never shrinks an existing deadline below a live holder's lease.
    fn raise_expiry(&mut self, deadline: Instant) {
        match self.expires_at {
            Some(current) if current >= deadline => {}
            Some(_) => self.expires_at = Some(deadline),
            // No deadline means the key never expires; keep it that way.
            None => {}
        }
    }
}

/// Fetch a key, evicting it first when its TTL has elapsed.
fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a mut Entry> {
    if map.get(key).is_some_and(|e| e.expired(now)) {
        map.remove(key);
    }
    map.get_mut(key)
}

fn hash_mut<'a>(entry: &'a mut Entry) -> Result<&'a mut HashMap<String, String>> {
    match &mut entry.value {
        Value::Hash(h) => Ok(h),
        Value::Plain => Err(LockError::InvalidArgument(
            "key holds a non-hash value".to_string(),
        )),
    }
}

/// Add `delta` to a counter field, returning the new value.
fn hincrby(hash: &mut HashMap<String, String>, field: &str, delta: i64) -> i64 {
    let current = hash
        .get(field)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);
    let next = current + delta;
    hash.insert(field.to_string(), next.to_string());
    next
}

fn field_count(hash: &HashMap<String, String>, field: &str) -> i64 {
    hash.get(field).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0)
}

enum AcquirePlan {
    /// Create the hash from scratch.
    Fresh,
    /// Reentrant grant; carries the post-increment unit count.
    Grant(i64),
    /// Held by an incompatible owner; carries the reported TTL.
    Blocked(i64),
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining TTL of `key`, if it exists and carries a deadline.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let map = self.inner.keys.lock();
        let entry = map.get(key).filter(|e| !e.expired(now))?;
        entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .keys
            .lock()
            .get(key)
            .is_some_and(|e| !e.expired(now))
    }

    fn publish_local(&self, channel: &str, payload: &[u8]) -> usize {
        let mut channels = self.inner.channels.lock();
        let Some(senders) = channels.get_mut(channel) else {
            return 0;
        };
        senders.retain(|tx| tx.send(payload.to_vec()).is_ok());
        let delivered = senders.len();
        if senders.is_empty() {
            channels.remove(channel);
        }
        delivered
    }

    fn mutex_acquire(&self, key: &str, lease: Duration, field: &str) -> ScriptReply {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        match live(&mut map, key, now) {
            None => {
                let mut fields = HashMap::new();
                fields.insert(field.to_string(), "1".to_string());
                map.insert(key.to_string(), Entry::hash(fields, now + lease));
                ScriptReply::Nil
            }
            Some(entry) => {
                let pttl = entry.pttl(now);
                let reentrant = match hash_mut(entry) {
                    Ok(h) if h.contains_key(field) => {
                        hincrby(h, field, 1);
                        true
                    }
                    _ => false,
                };
                if reentrant {
                    entry.expires_at = Some(now + lease);
                    ScriptReply::Nil
                } else {
                    ScriptReply::Int(pttl)
                }
            }
        }
    }

    fn mutex_release(
        &self,
        key: &str,
        channel: &str,
        payload: &[u8],
        lease: Duration,
        field: &str,
    ) -> Result<ScriptReply> {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let Some(entry) = live(&mut map, key, now) else {
            // Already unlocked: foreign waiters still need a wake.
            drop(map);
            self.publish_local(channel, payload);
            return Ok(ScriptReply::Bool(true));
        };
        let h = hash_mut(entry)?;
        if !h.contains_key(field) {
            return Ok(ScriptReply::Nil);
        }
        let remaining = hincrby(h, field, -1);
        if remaining > 0 {
            entry.expires_at = Some(now + lease);
            return Ok(ScriptReply::Bool(false));
        }
        h.remove(field);
        if h.is_empty() {
            map.remove(key);
        }
        drop(map);
        self.publish_local(channel, payload);
        Ok(ScriptReply::Bool(true))
    }

    fn read_acquire(
        &self,
        key: &str,
        lease: Duration,
        read_field: &str,
        write_field: &str,
    ) -> Result<ScriptReply> {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let plan = match live(&mut map, key, now) {
            None => AcquirePlan::Fresh,
            Some(entry) => {
                let pttl = entry.pttl(now);
                let h = hash_mut(entry)?;
                match h.get(MODE_FIELD).map(String::as_str) {
                    None => AcquirePlan::Fresh,
                    Some(READ_MODE) => AcquirePlan::Grant(hincrby(h, read_field, 1)),
                    Some(WRITE_MODE) if h.contains_key(write_field) => {
                        // Writer re-entering as a reader.
                        AcquirePlan::Grant(hincrby(h, read_field, 1))
                    }
                    Some(_) => AcquirePlan::Blocked(pttl),
                }
            }
        };
        self.finish_rw_acquire(&mut map, key, read_field, READ_MODE, lease, now, plan)
    }

    fn write_acquire(&self, key: &str, lease: Duration, write_field: &str) -> Result<ScriptReply> {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let plan = match live(&mut map, key, now) {
            None => AcquirePlan::Fresh,
            Some(entry) => {
                let pttl = entry.pttl(now);
                let h = hash_mut(entry)?;
                match h.get(MODE_FIELD).map(String::as_str) {
                    None => AcquirePlan::Fresh,
                    Some(WRITE_MODE) if h.contains_key(write_field) => {
                        AcquirePlan::Grant(hincrby(h, write_field, 1))
                    }
                    Some(_) => AcquirePlan::Blocked(pttl),
                }
            }
        };
        self.finish_rw_acquire(&mut map, key, write_field, WRITE_MODE, lease, now, plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_rw_acquire(
        &self,
        map: &mut HashMap<String, Entry>,
        key: &str,
        field: &str,
        mode: &str,
        lease: Duration,
        now: Instant,
        plan: AcquirePlan,
    ) -> Result<ScriptReply> {
        match plan {
            AcquirePlan::Fresh => {
                let mut fields = HashMap::new();
                fields.insert(MODE_FIELD.to_string(), mode.to_string());
                fields.insert(field.to_string(), "1".to_string());
                map.insert(key.to_string(), Entry::hash(fields, now + lease));
                map.insert(rw_timeout_key(key, field, 1), Entry::marker(now + lease));
                Ok(ScriptReply::Nil)
            }
            AcquirePlan::Grant(unit) => {
                map.insert(rw_timeout_key(key, field, unit), Entry::marker(now + lease));
                if let Some(entry) = map.get_mut(key) {
                    entry.raise_expiry(now + lease);
                }
                Ok(ScriptReply::Nil)
            }
            AcquirePlan::Blocked(pttl) => Ok(ScriptReply::Int(pttl)),
        }
    }

    fn rw_release(
        &self,
        key: &str,
        channel: &str,
        payload: &[u8],
        field: &str,
    ) -> Result<ScriptReply> {
        enum Plan {
            /// Key or mode already gone; publish the compensating wake.
            Gone,
            NotOwner,
            Proceed {
                remaining: i64,
                fully_out: bool,
                mode_is_write: bool,
                downgraded: bool,
                holder_units: Vec<(String, i64)>,
            },
        }

        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let plan = match live(&mut map, key, now) {
            None => Plan::Gone,
            Some(entry) => {
                let h = hash_mut(entry)?;
                if !h.contains_key(MODE_FIELD) {
                    Plan::Gone
                } else if !h.contains_key(field) {
                    Plan::NotOwner
                } else {
                    let remaining = hincrby(h, field, -1);
                    let fully_out = remaining <= 0;
                    if fully_out {
                        h.remove(field);
                    }
                    let holders_remain = h.len() > 1;
                    // Last write unit gone while readers remain: the key
                    // downgrades to read mode so further readers are admitted.
                    let downgraded = holders_remain
                        && fully_out
                        && field.ends_with(WRITE_FIELD_SUFFIX)
                        && h.get(MODE_FIELD).map(String::as_str) == Some(WRITE_MODE);
                    if downgraded {
                        h.insert(MODE_FIELD.to_string(), READ_MODE.to_string());
                    }
                    let mode_is_write = h.get(MODE_FIELD).map(String::as_str) == Some(WRITE_MODE);
                    let holder_units: Vec<(String, i64)> = h
                        .iter()
                        .filter(|(f, _)| f.as_str() != MODE_FIELD)
                        .map(|(f, v)| (f.clone(), v.parse::<i64>().unwrap_or(0)))
                        .collect();
                    Plan::Proceed {
                        remaining,
                        fully_out,
                        mode_is_write,
                        downgraded,
                        holder_units,
                    }
                }
            }
        };

        let (remaining, fully_out, mode_is_write, downgraded, holder_units) = match plan {
            Plan::Gone => {
                drop(map);
                self.publish_local(channel, payload);
                return Ok(ScriptReply::Bool(true));
            }
            Plan::NotOwner => return Ok(ScriptReply::Nil),
            Plan::Proceed {
                remaining,
                fully_out,
                mode_is_write,
                downgraded,
                holder_units,
            } => (remaining, fully_out, mode_is_write, downgraded, holder_units),
        };

        map.remove(&rw_timeout_key(key, field, remaining + 1));

        if !holder_units.is_empty() {
            // The hash TTL is the supremum over every still-live unit marker.
            let mut max_deadline: Option<Instant> = None;
            for (holder, units) in &holder_units {
                for unit in 1..=*units {
                    let marker = rw_timeout_key(key, holder, unit);
                    if let Some(deadline) = map
                        .get(&marker)
                        .filter(|e| !e.expired(now))
                        .and_then(|e| e.expires_at)
                    {
                        max_deadline = Some(max_deadline.map_or(deadline, |d| d.max(deadline)));
                    }
                }
            }
            if let Some(deadline) = max_deadline {
                if let Some(entry) = map.get_mut(key) {
                    entry.expires_at = Some(deadline);
                }
                drop(map);
                if downgraded {
                    // Blocked readers may enter now that the writer is out.
                    self.publish_local(channel, payload);
                }
                return Ok(ScriptReply::Bool(fully_out));
            }
            if mode_is_write {
                // Sole writer remains; the mutex path owns its TTL.
                return Ok(ScriptReply::Bool(fully_out));
            }
            // Read mode with every unit past its lease: nothing live remains.
        }

        map.remove(key);
        drop(map);
        self.publish_local(channel, payload);
        Ok(ScriptReply::Bool(true))
    }

    fn force_unlock(&self, key: &str, channel: &str, payload: &[u8]) -> ScriptReply {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let deleted = live(&mut map, key, now).is_some() && map.remove(key).is_some();
        drop(map);
        if deleted {
            self.publish_local(channel, payload);
        }
        ScriptReply::Bool(deleted)
    }

    fn renew(&self, key: &str, lease: Duration, field: &str) -> Result<ScriptReply> {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let Some(entry) = live(&mut map, key, now) else {
            return Ok(ScriptReply::Bool(false));
        };
        let h = hash_mut(entry)?;
        if !h.contains_key(field) {
            return Ok(ScriptReply::Bool(false));
        }
        // Raise-only: another holder's longer lease must survive a renewal
        // by a shorter-leased owner on the same hash.
        entry.raise_expiry(now + lease);
        Ok(ScriptReply::Bool(true))
    }

    fn is_locked(&self, key: &str, field: Option<&str>) -> Result<ScriptReply> {
        let now = Instant::now();
        let mut map = self.inner.keys.lock();
        let Some(entry) = live(&mut map, key, now) else {
            return Ok(ScriptReply::Int(0));
        };
        let h = hash_mut(entry)?;
        match field {
            Some(f) => Ok(ScriptReply::Int(field_count(h, f))),
            None => match h.get(MODE_FIELD) {
                Some(mode) => Ok(ScriptReply::Str(mode.clone())),
                None => Ok(ScriptReply::Int(h.len() as i64)),
            },
        }
    }
}

fn key_at<'a>(keys: &'a [String], index: usize, script: ScriptId) -> Result<&'a str> {
    keys.get(index).map(String::as_str).ok_or_else(|| {
        LockError::InvalidArgument(format!("{} requires key {}", script.name(), index + 1))
    })
}

fn str_at<'a>(args: &'a [ScriptArg], index: usize, script: ScriptId) -> Result<&'a str> {
    match args.get(index) {
        Some(ScriptArg::Str(s)) => Ok(s),
        _ => Err(LockError::InvalidArgument(format!(
            "{} requires a string at argument {}",
            script.name(),
            index + 1
        ))),
    }
}

fn lease_at(args: &[ScriptArg], index: usize, script: ScriptId) -> Result<Duration> {
    match args.get(index) {
        Some(ScriptArg::Int(ms)) if *ms > 0 => Ok(Duration::from_millis(*ms as u64)),
        _ => Err(LockError::InvalidArgument(format!(
            "{} requires a positive lease at argument {}",
            script.name(),
            index + 1
        ))),
    }
}

#[async_trait]
impl ScriptExecutor for MemoryStore {
    async fn execute(
        &self,
        script: ScriptId,
        keys: &[String],
        args: &[ScriptArg],
    ) -> Result<ScriptReply> {
        match script {
            ScriptId::MutexAcquire => {
                let key = key_at(keys, 0, script)?;
                let lease = lease_at(args, 0, script)?;
                let field = str_at(args, 1, script)?;
                Ok(self.mutex_acquire(key, lease, field))
            }
            ScriptId::MutexRelease => {
                let key = key_at(keys, 0, script)?;
                let channel = key_at(keys, 1, script)?;
                let payload = str_at(args, 0, script)?.as_bytes().to_vec();
                let lease = lease_at(args, 1, script)?;
                let field = str_at(args, 2, script)?;
                self.mutex_release(key, channel, &payload, lease, field)
            }
            ScriptId::ReadAcquire => {
                let key = key_at(keys, 0, script)?;
                let lease = lease_at(args, 0, script)?;
                let read_field = str_at(args, 1, script)?;
                let write_field = str_at(args, 2, script)?;
                self.read_acquire(key, lease, read_field, write_field)
            }
            ScriptId::WriteAcquire => {
                let key = key_at(keys, 0, script)?;
                let lease = lease_at(args, 0, script)?;
                let write_field = str_at(args, 1, script)?;
                self.write_acquire(key, lease, write_field)
            }
            ScriptId::RwRelease => {
                let key = key_at(keys, 0, script)?;
                let channel = key_at(keys, 1, script)?;
                let payload = str_at(args, 0, script)?.as_bytes().to_vec();
                let field = str_at(args, 1, script)?;
                self.rw_release(key, channel, &payload, field)
            }
            ScriptId::ForceUnlock => {
                let key = key_at(keys, 0, script)?;
                let channel = key_at(keys, 1, script)?;
                let payload = str_at(args, 0, script)?.as_bytes().to_vec();
                Ok(self.force_unlock(key, channel, &payload))
            }
            ScriptId::Renew => {
                let key = key_at(keys, 0, script)?;
                let lease = lease_at(args, 0, script)?;
                let field = str_at(args, 1, script)?;
                self.renew(key, lease, field)
            }
            ScriptId::IsLocked => {
                let key = key_at(keys, 0, script)?;
                let field = match args.first() {
                    Some(ScriptArg::Str(s)) => Some(s.as_str()),
                    None => None,
                    Some(other) => {
                        return Err(LockError::InvalidArgument(format!(
                            "is_locked takes an optional field, got {other:?}"
                        )));
                    }
                };
                self.is_locked(key, field)
            }
        }
    }
}

#[async_trait]
impl PubSubTransport for MemoryStore {
    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        debug!(channel, "subscribed");
        Ok(MessageStream::new(channel, rx))
    }

    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize> {
        Ok(self.publish_local(channel, payload))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.inner.channels.lock().remove(channel);
        debug!(channel, "unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use locket_api::UNLOCK_MESSAGE;

    fn msg() -> ScriptArg {
        ScriptArg::Str(String::from_utf8_lossy(UNLOCK_MESSAGE).into_owned())
    }

    async fn acquire(store: &MemoryStore, key: &str, lease_ms: i64, field: &str) -> ScriptReply {
        store
            .execute(
                ScriptId::MutexAcquire,
                &[key.to_string()],
                &[ScriptArg::Int(lease_ms), ScriptArg::from(field)],
            )
            .await
            .unwrap()
    }

    async fn release(store: &MemoryStore, key: &str, lease_ms: i64, field: &str) -> ScriptReply {
        store
            .execute(
                ScriptId::MutexRelease,
                &[key.to_string(), format!("chan:{key}")],
                &[msg(), ScriptArg::Int(lease_ms), ScriptArg::from(field)],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mutex_acquire_reentrant_and_blocked() {
        let store = MemoryStore::new();

        assert_eq!(acquire(&store, "m", 30_000, "a").await, ScriptReply::Nil);
        // Reentrant grant for the same owner.
        assert_eq!(acquire(&store, "m", 30_000, "a").await, ScriptReply::Nil);
        // A different owner gets the remaining TTL back.
        match acquire(&store, "m", 30_000, "b").await {
            ScriptReply::Int(ttl) => assert!(ttl > 0 && ttl <= 30_000),
            other => panic!("expected ttl, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_mutex_release_trichotomy() {
        let store = MemoryStore::new();
        acquire(&store, "m", 30_000, "a").await;
        acquire(&store, "m", 30_000, "a").await;

        // Non-holder release on a held key.
        assert_eq!(release(&store, "m", 30_000, "b").await, ScriptReply::Nil);
        // Partial release keeps the key.
        assert_eq!(release(&store, "m", 30_000, "a").await, ScriptReply::Bool(false));
        assert!(store.exists("m"));
        // Final release deletes it.
        assert_eq!(release(&store, "m", 30_000, "a").await, ScriptReply::Bool(true));
        assert!(!store.exists("m"));
        // Release on an absent key is the benign compensating case.
        assert_eq!(release(&store, "m", 30_000, "a").await, ScriptReply::Bool(true));
    }

    #[tokio::test]
    async fn test_release_publishes_wake() {
        let store = MemoryStore::new();
        let mut stream = store.subscribe("chan:m").await.unwrap();

        acquire(&store, "m", 30_000, "a").await;
        release(&store, "m", 30_000, "a").await;

        assert_eq!(stream.recv().await.unwrap(), UNLOCK_MESSAGE.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_frees_key() {
        let store = MemoryStore::new();
        acquire(&store, "m", 1_000, "a").await;

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!store.exists("m"));
        assert_eq!(acquire(&store, "m", 1_000, "b").await, ScriptReply::Nil);
    }

    #[tokio::test]
    async fn test_read_write_compatibility() {
        let store = MemoryStore::new();
        let keys = vec!["rw".to_string()];

        // Reader in; second reader admitted; writer blocked.
        let reply = store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "r1".into(), "r1:write".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Nil);
        assert!(store.exists("rw:r1:rwlock_timeout:1"));

        let reply = store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "r2".into(), "r2:write".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Nil);

        let reply = store
            .execute(
                ScriptId::WriteAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "w1:write".into()],
            )
            .await
            .unwrap();
        assert!(matches!(reply, ScriptReply::Int(_)));
    }

    #[tokio::test]
    async fn test_writer_reenters_as_reader() {
        let store = MemoryStore::new();
        let keys = vec!["rw".to_string()];

        store
            .execute(
                ScriptId::WriteAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "w1:write".into()],
            )
            .await
            .unwrap();

        let reply = store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "w1".into(), "w1:write".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Nil);

        // A different owner still cannot read.
        let reply = store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "r2".into(), "r2:write".into()],
            )
            .await
            .unwrap();
        assert!(matches!(reply, ScriptReply::Int(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rw_release_recomputes_ttl_supremum() {
        let store = MemoryStore::new();
        let keys = vec!["rw".to_string()];
        let chan_keys = vec!["rw".to_string(), "chan:rw".to_string()];

        // Short-lease reader first, long-lease reader second.
        store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(1_000), "r1".into(), "r1:write".into()],
            )
            .await
            .unwrap();
        store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(5_000), "r2".into(), "r2:write".into()],
            )
            .await
            .unwrap();
        // The second acquire may not shrink the hash TTL below 5s.
        assert!(store.remaining_ttl("rw").unwrap() >= Duration::from_millis(4_900));

        // Releasing the short holder keeps the supremum at r2's lease.
        let reply = store
            .execute(ScriptId::RwRelease, &chan_keys, &[msg(), "r1".into()])
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(true));
        assert!(store.remaining_ttl("rw").unwrap() >= Duration::from_millis(4_900));

        // Last holder out deletes the key.
        let reply = store
            .execute(ScriptId::RwRelease, &chan_keys, &[msg(), "r2".into()])
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(true));
        assert!(!store.exists("rw"));
    }

    #[tokio::test]
    async fn test_write_release_downgrades_mode() {
        let store = MemoryStore::new();
        let keys = vec!["rw".to_string()];
        let chan_keys = vec!["rw".to_string(), "chan:rw".to_string()];

        store
            .execute(
                ScriptId::WriteAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "w1:write".into()],
            )
            .await
            .unwrap();
        store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "w1".into(), "w1:write".into()],
            )
            .await
            .unwrap();

        let reply = store
            .execute(ScriptId::RwRelease, &chan_keys, &[msg(), "w1:write".into()])
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(true));

        // Mode downgraded to read; an unrelated reader is now admitted.
        let reply = store
            .execute(ScriptId::IsLocked, &keys, &[])
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Str("read".to_string()));
        let reply = store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(30_000), "r2".into(), "r2:write".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Nil);
    }

    #[tokio::test]
    async fn test_force_unlock_and_renew() {
        let store = MemoryStore::new();
        acquire(&store, "m", 30_000, "a").await;

        let reply = store
            .execute(
                ScriptId::Renew,
                &["m".to_string()],
                &[ScriptArg::Int(30_000), "a".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(true));

        let reply = store
            .execute(
                ScriptId::ForceUnlock,
                &["m".to_string(), "chan:m".to_string()],
                &[msg()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(true));
        assert!(!store.exists("m"));

        // Renewal of a vanished hold reports the loss.
        let reply = store
            .execute(
                ScriptId::Renew,
                &["m".to_string()],
                &[ScriptArg::Int(30_000), "a".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(false));

        // Force unlock of an absent key deletes nothing.
        let reply = store
            .execute(
                ScriptId::ForceUnlock,
                &["m".to_string(), "chan:m".to_string()],
                &[msg()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_renew_never_shrinks_rw_ttl() {
        let store = MemoryStore::new();
        let keys = vec!["rw".to_string()];

        // Long-lease reader first, short-lease reader second.
        store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(5_000), "r1".into(), "r1:write".into()],
            )
            .await
            .unwrap();
        store
            .execute(
                ScriptId::ReadAcquire,
                &keys,
                &[ScriptArg::Int(300), "r2".into(), "r2:write".into()],
            )
            .await
            .unwrap();

        // A renewal by the short holder must not pull the hash deadline
        // below r1's live marker.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let reply = store
            .execute(
                ScriptId::Renew,
                &["rw".to_string()],
                &[ScriptArg::Int(300), "r2".into()],
            )
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Bool(true));
        assert!(store.remaining_ttl("rw").unwrap() >= Duration::from_millis(4_800));
    }

    #[tokio::test]
    async fn test_is_locked_field_counts() {
        let store = MemoryStore::new();
        acquire(&store, "m", 30_000, "a").await;
        acquire(&store, "m", 30_000, "a").await;

        let reply = store
            .execute(ScriptId::IsLocked, &["m".to_string()], &["a".into()])
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Int(2));

        let reply = store
            .execute(ScriptId::IsLocked, &["m".to_string()], &["b".into()])
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Int(0));
    }

    #[tokio::test]
    async fn test_publish_counts_subscribers() {
        let store = MemoryStore::new();
        let _s1 = store.subscribe("c").await.unwrap();
        let _s2 = store.subscribe("c").await.unwrap();

        assert_eq!(store.publish("c", b"0").await.unwrap(), 2);

        store.unsubscribe("c").await.unwrap();
        assert_eq!(store.publish("c", b"0").await.unwrap(), 0);
    }
}
