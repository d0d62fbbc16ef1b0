//! Store-backed mutual exclusion over a named resource.
//!
//! Acquisition is one conditional set-if-absent; release is the store's
//! atomic check-and-delete keyed on the holder token, so a slow holder can
//! never delete a lock that expired and was re-acquired by someone else.
//! The TTL is the liveness mechanism: a crashed holder's lock self-expires.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use uuid::Uuid;

use super::store::{SharedStore, StoreError};

const LOCK_PREFIX: &str = "lock:";

/// Process-wide token prefix, so tokens from different processes can never
/// collide even if per-instance ids somehow did.
static TOKEN_PREFIX: Lazy<String> = Lazy::new(|| Uuid::new_v4().simple().to_string());

pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
    key: String,
    token: String,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn SharedStore>, resource: impl AsRef<str>) -> Self {
        Self {
            store,
            key: format!("{LOCK_PREFIX}{}", resource.as_ref()),
            token: format!("{}-{}", &*TOKEN_PREFIX, Uuid::new_v4().simple()),
        }
    }

    /// Attempts to take the lock for `ttl`. A `false` return signals
    /// contention, not failure; callers decide whether to retry or bail.
    pub async fn try_acquire(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.store.set_if_absent(&self.key, &self.token, ttl).await
    }

    /// Releases the lock if this instance still holds it. Returns whether
    /// anything was released; a mismatched or expired token is a no-op.
    pub async fn release(&self) -> Result<bool, StoreError> {
        self.store.delete_if_equals(&self.key, &self.token).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
