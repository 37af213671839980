//! Locket Store - In-process reference backend for the Locket lock engine
//!
//! This crate provides:
//! - `MemoryStore`: a TTL-capable key/value store executing every lock
//!   script atomically in a single-writer critical section
//! - Best-effort in-process pub/sub with per-channel subscriber fan-out
//!
//! It stands in for a networked Redis-style store in tests and local
//! deployments; any backend implementing the `locket-api` traits with the
//! same script semantics is interchangeable.

pub mod memory;

pub use memory::MemoryStore;
