//! Client-side distributed lock engine over a TTL-capable key/value store.
//!
//! The store contributes three primitives: atomic script execution,
//! per-key TTLs, and pub/sub. Everything else is client-side:
//!
//! - [`LockClient`] mints lock handles bound to one store connection.
//! - [`LockEntry`] is a reentrant mutex; [`ReadWriteLockEntry`] adds a
//!   shared/exclusive pair over the same owner identity.
//! - [`LeaseWatchdog`] renews holds acquired without an explicit lease.
//! - [`WakeChannelRegistry`] multiplexes unlock notifications so blocked
//!   acquirers retry in FIFO order instead of polling.
//!
//! Store bindings implement [`locket_api::ScriptExecutor`] and
//! [`locket_api::PubSubTransport`]; the `locket-store` crate ships an
//! in-process implementation used throughout the tests here.

pub mod client;
pub mod config;
pub mod mutex;
pub mod owner;
mod raw;
pub mod rwlock;
pub mod wake;
pub mod watchdog;

pub use client::LockClient;
pub use config::LockConfig;
pub use mutex::LockEntry;
pub use owner::OwnerId;
pub use rwlock::{ReadLockEntry, ReadWriteLockEntry, WriteLockEntry};
pub use wake::{WakeChannelRegistry, WakeHandle};
pub use watchdog::LeaseWatchdog;
