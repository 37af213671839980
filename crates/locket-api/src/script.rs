//! Script identifiers, arguments, and replies
//!
//! Every multi-step check-and-mutate sequence in the lock protocol runs as a
//! single atomic script against the store. [`ScriptId`] names the fixed set of
//! scripts; the executor maps each id onto the backend's native atomicity
//! facility (a server-side Lua program on a Redis-style store, a single-writer
//! critical section for the in-process store). An executor must guarantee that
//! a script never interleaves with another script touching the same keys.

use serde::{Deserialize, Serialize};

/// Hash field holding the lock mode on a read/write lock key.
pub const MODE_FIELD: &str = "mode";
/// Mode value while a read/write lock is read-held.
pub const READ_MODE: &str = "read";
/// Mode value while a read/write lock is write-held.
pub const WRITE_MODE: &str = "write";
/// Suffix distinguishing a write-holder field from read-holder fields on the
/// same hash.
pub const WRITE_FIELD_SUFFIX: &str = ":write";
/// Infix of the per-unit lease marker keys
/// (`<lock key>:<holder field>:rwlock_timeout:<unit>`).
pub const RW_TIMEOUT_INFIX: &str = ":rwlock_timeout:";

/// Payload published on a wake channel when a lock becomes acquirable.
pub const UNLOCK_MESSAGE: &[u8] = b"0";

/// Channel prefix for mutex wake channels.
pub const LOCK_CHANNEL_PREFIX: &str = "locket_lock:";
/// Channel prefix for read/write lock wake channels. Read and write facades
/// of the same lock name share one channel.
pub const RWLOCK_CHANNEL_PREFIX: &str = "locket_rwlock:";

/// Wake channel name for a mutex.
pub fn lock_channel(name: &str) -> String {
    format!("{LOCK_CHANNEL_PREFIX}{name}")
}

/// Wake channel name for a read/write lock.
pub fn rwlock_channel(name: &str) -> String {
    format!("{RWLOCK_CHANNEL_PREFIX}{name}")
}

/// Hash field under which an owner's write hold is counted.
pub fn write_field(owner: &str) -> String {
    format!("{owner}{WRITE_FIELD_SUFFIX}")
}

/// Standalone marker key carrying the lease of one reentrant unit.
pub fn rw_timeout_key(key: &str, field: &str, unit: i64) -> String {
    format!("{key}:{field}{RW_TIMEOUT_INFIX}{unit}")
}

/// Identifies one of the fixed atomic scripts.
///
/// Key and argument conventions below use `KEYS[n]`/`ARGV[n]` positions the
/// way the store sees them. Replies are owner-centric for the release
/// scripts: `Bool(true)` means the releasing owner holds nothing afterwards
/// (the caller must cancel its watchdog), `Bool(false)` means the owner still
/// holds reentrant units, `Nil` means the caller was not a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptId {
    /// KEYS = `[lock]`, ARGV = `[lease_ms, field]`.
    ///
    /// Key absent: create hash `{field: 1}`, TTL = lease, reply `Nil`.
    /// Field present: increment, refresh TTL to lease, reply `Nil`.
    /// Otherwise reply `Int(pttl)` (`-1` when the key carries no TTL).
    MutexAcquire,
    /// KEYS = `[lock, channel]`, ARGV = `[unlock_msg, lease_ms, field]`.
    ///
    /// Key absent: publish `unlock_msg` (compensating wake for foreign
    /// waiters), reply `Bool(true)`. Field absent: reply `Nil`. Otherwise
    /// decrement; remainder > 0 refreshes TTL to lease and replies
    /// `Bool(false)`; remainder 0 deletes the field and, once no fields
    /// remain, deletes the key, publishes, and replies `Bool(true)`.
    MutexRelease,
    /// KEYS = `[lock]`, ARGV = `[lease_ms, read_field, write_field]`.
    ///
    /// Mode absent: set `mode=read`, `read_field=1`, create marker unit 1
    /// with TTL = lease, set key TTL, reply `Nil`. Mode `read`, or mode
    /// `write` with `write_field` held by the same owner: increment
    /// `read_field`, create a marker indexed by the post-increment count,
    /// raise the key TTL to at least lease, reply `Nil`. Otherwise reply
    /// `Int(pttl)`.
    ReadAcquire,
    /// KEYS = `[lock]`, ARGV = `[lease_ms, write_field]`.
    ///
    /// Mode absent: set `mode=write`, `write_field=1`, marker unit 1, key
    /// TTL = lease, reply `Nil`. Mode `write` with `write_field` present:
    /// increment, add marker, raise key TTL to at least lease, reply `Nil`.
    /// Otherwise reply `Int(pttl)`.
    WriteAcquire,
    /// KEYS = `[lock, channel]`, ARGV = `[unlock_msg, field]`.
    ///
    /// Mode absent: publish, reply `Bool(true)`. Field absent: reply `Nil`.
    /// Otherwise decrement, delete the unit's marker, and drop the field at
    /// zero. While holder fields remain: downgrade `mode` to `read` when the
    /// write field is gone, then recompute the key TTL as the maximum
    /// remaining marker TTL (never shrinking below a live holder's lease);
    /// when no marker is live and mode is `write` the TTL is left untouched.
    /// When no holder field remains (or none is within its lease in read
    /// mode) the key is deleted and `unlock_msg` published.
    RwRelease,
    /// KEYS = `[lock, channel]`, ARGV = `[unlock_msg]`.
    ///
    /// Deletes the key unconditionally, regardless of owner or reentrancy.
    /// Replies `Bool(true)` and publishes when a key was actually deleted,
    /// `Bool(false)` otherwise.
    ForceUnlock,
    /// KEYS = `[lock]`, ARGV = `[lease_ms, field]`.
    ///
    /// Resets the key TTL to lease and replies `Bool(true)` while the field
    /// still exists; replies `Bool(false)` once the hold is gone.
    Renew,
    /// KEYS = `[lock]`, ARGV = `[]` or `[field]`.
    ///
    /// With a field: reply `Int(count)` for that holder (0 when absent).
    /// Without: reply `Str(mode)` when a mode field is set, otherwise
    /// `Int(number of holder fields)` (0 when the key is absent).
    IsLocked,
}

impl ScriptId {
    /// Stable name used in logs and protocol errors.
    pub fn name(self) -> &'static str {
        match self {
            ScriptId::MutexAcquire => "mutex_acquire",
            ScriptId::MutexRelease => "mutex_release",
            ScriptId::ReadAcquire => "read_acquire",
            ScriptId::WriteAcquire => "write_acquire",
            ScriptId::RwRelease => "rw_release",
            ScriptId::ForceUnlock => "force_unlock",
            ScriptId::Renew => "renew",
            ScriptId::IsLocked => "is_locked",
        }
    }
}

/// A positional script argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    Int(i64),
    Str(String),
}

impl From<i64> for ScriptArg {
    fn from(v: i64) -> Self {
        ScriptArg::Int(v)
    }
}

impl From<&str> for ScriptArg {
    fn from(v: &str) -> Self {
        ScriptArg::Str(v.to_string())
    }
}

impl From<String> for ScriptArg {
    fn from(v: String) -> Self {
        ScriptArg::Str(v)
    }
}

/// Typed script result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    /// Absent reply; the acquire scripts use it to signal success.
    Nil,
    Int(i64),
    Bool(bool),
    Str(String),
}
