//! Read-through caching over the shared store.
//!
//! Two policies, both generic over the cached entity type:
//!
//! - **Null caching**: misses that also miss the database write a short-TTL
//!   empty sentinel, so repeated lookups of nonexistent ids stop reaching
//!   the database (penetration defense).
//! - **Logical expiry**: entries carry an application-level expiry and no
//!   store TTL. Expired reads return the stale value immediately while a
//!   single lock-guarded rebuild runs on a bounded background pool
//!   (stampede defense).

mod client;
mod config;
pub mod keys;

pub use client::{CacheClient, CacheError, TimedEntry};
pub use config::CacheConfig;
