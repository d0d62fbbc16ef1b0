//! Piazza: a local-services marketplace backend.
//!
//! The interesting part of this crate is the contention-critical core that
//! keeps a shared key-value store and Postgres consistent under load:
//!
//! - [`cache::CacheClient`] — read-through caching with null-marker and
//!   logical-expiry policies (penetration and stampede defense)
//! - [`infra::lock::DistributedLock`] — store-backed mutual exclusion with
//!   fencing-token release
//! - [`infra::ids::IdGenerator`] — store-backed monotonic id allocation
//! - [`application::flash_sale::FlashSaleService`] — the atomic admission
//!   gate for flash-sale orders
//! - [`application::worker::OrderWorker`] — the crash-recoverable stream
//!   consumer that persists admitted orders exactly once

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
