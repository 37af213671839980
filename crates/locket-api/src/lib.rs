//! Locket API - Store-facing interfaces for the Locket lock engine
//!
//! This crate provides:
//! - The fixed atomic script contracts (`ScriptId` and its key/argument
//!   conventions)
//! - The `ScriptExecutor` trait implemented by store backends
//! - The `PubSubTransport` trait for best-effort wake notifications
//! - Key and channel naming shared by engine and backends
//! - The error taxonomy for lock operations

pub mod error;
pub mod executor;
pub mod pubsub;
pub mod script;

pub use error::{LockError, Result};
pub use executor::ScriptExecutor;
pub use pubsub::{MessageStream, PubSubTransport};
pub use script::{
    LOCK_CHANNEL_PREFIX, MODE_FIELD, READ_MODE, RW_TIMEOUT_INFIX, RWLOCK_CHANNEL_PREFIX,
    ScriptArg, ScriptId, ScriptReply, UNLOCK_MESSAGE, WRITE_FIELD_SUFFIX, WRITE_MODE,
    lock_channel, rw_timeout_key, rwlock_channel, write_field,
};
