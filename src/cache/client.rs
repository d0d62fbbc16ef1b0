//! Generic read-through cache client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::application::repos::RepoError;
use crate::infra::store::{SharedStore, StoreError};

use super::config::CacheConfig;
use super::keys::{entry_key, rebuild_lock_key};

const METRIC_CACHE_HIT: &str = "piazza_cache_hit_total";
const METRIC_CACHE_MISS: &str = "piazza_cache_miss_total";
const METRIC_CACHE_NULL_MARKER: &str = "piazza_cache_null_marker_total";
const METRIC_CACHE_STALE_SERVED: &str = "piazza_cache_stale_served_total";
const METRIC_CACHE_REBUILD: &str = "piazza_cache_rebuild_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cache codec failure for `{key}`: {source}")]
    Codec {
        key: String,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Source(#[from] RepoError),
}

/// A cached value wrapped with its application-level expiry.
///
/// The store-level TTL of such entries is infinite; staleness is decided
/// here, which is what lets readers keep answering from a stale entry while
/// one rebuild runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEntry<T> {
    pub data: T,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl<T> TimedEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: OffsetDateTime::now_utc() + ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.expires_at > OffsetDateTime::now_utc()
    }
}

/// Read-through cache over the shared store.
///
/// Cheap to clone; clones share the rebuild pool.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn SharedStore>,
    config: CacheConfig,
    rebuild_slots: Arc<Semaphore>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn SharedStore>, config: CacheConfig) -> Self {
        let rebuild_slots = Arc::new(Semaphore::new(config.rebuild_concurrency.max(1)));
        Self {
            store,
            config,
            rebuild_slots,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Read-through with null caching.
    ///
    /// A miss that also misses the source writes an empty sentinel with a
    /// short TTL, so repeated lookups of ids that exist nowhere stop
    /// reaching the source within the sentinel window.
    pub async fn get_with_null_caching<T, F, Fut>(
        &self,
        prefix: &str,
        id: u64,
        ttl: Duration,
        fallback: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<Option<T>, RepoError>>,
    {
        let key = entry_key(prefix, id);

        if let Some(raw) = self.store.get(&key).await? {
            if raw.is_empty() {
                counter!(METRIC_CACHE_NULL_MARKER).increment(1);
                return Ok(None);
            }
            counter!(METRIC_CACHE_HIT, "policy" => "null_caching").increment(1);
            return Ok(Some(decode(&key, &raw)?));
        }

        counter!(METRIC_CACHE_MISS, "policy" => "null_caching").increment(1);
        match fallback(id).await? {
            None => {
                self.store.set_with_ttl(&key, "", self.config.null_ttl).await?;
                Ok(None)
            }
            Some(value) => {
                self.store
                    .set_with_ttl(&key, &encode(&key, &value)?, ttl)
                    .await?;
                Ok(Some(value))
            }
        }
    }

    /// Read-through with logical expiry.
    ///
    /// An absent entry is a known gap and answers `None` without touching
    /// the source. An expired entry answers with the stale value right away
    /// and hands the repopulation to a background task; the caller never
    /// waits on it.
    pub async fn get_with_logical_expiry<T, F, Fut>(
        &self,
        prefix: &str,
        id: u64,
        ttl: Duration,
        fallback: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, RepoError>> + Send + 'static,
    {
        let key = entry_key(prefix, id);

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let entry: TimedEntry<T> = decode(&key, &raw)?;
        if entry.is_fresh() {
            counter!(METRIC_CACHE_HIT, "policy" => "logical_expiry").increment(1);
            return Ok(Some(entry.data));
        }

        counter!(METRIC_CACHE_STALE_SERVED).increment(1);
        self.spawn_rebuild::<T, F, Fut>(key, id, ttl, fallback);
        Ok(Some(entry.data))
    }

    /// Write-through population with a store-level TTL.
    pub async fn set<T: Serialize>(
        &self,
        prefix: &str,
        id: u64,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = entry_key(prefix, id);
        self.store
            .set_with_ttl(&key, &encode(&key, value)?, ttl)
            .await?;
        Ok(())
    }

    /// Population under the logical-expiry policy (no store-level TTL).
    pub async fn set_with_logical_expiry<T: Serialize>(
        &self,
        prefix: &str,
        id: u64,
        value: T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = entry_key(prefix, id);
        let entry = TimedEntry::new(value, ttl);
        self.store.set(&key, &encode(&key, &entry)?).await?;
        Ok(())
    }

    /// Write-through invalidation: the entry is deleted after the source of
    /// truth changed, so the next read repopulates.
    pub async fn invalidate(&self, prefix: &str, id: u64) -> Result<(), CacheError> {
        self.store.delete(&entry_key(prefix, id)).await?;
        Ok(())
    }

    /// Fire-and-forget rebuild of one expired entry.
    ///
    /// The task takes a pool slot, then races for the per-entry rebuild
    /// lock; losers exit, leaving exactly one rebuild in flight per key.
    fn spawn_rebuild<T, F, Fut>(&self, key: String, id: u64, ttl: Duration, fallback: F)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, RepoError>> + Send + 'static,
    {
        let client = self.clone();
        tokio::spawn(async move {
            let Ok(_slot) = client.rebuild_slots.clone().acquire_owned().await else {
                return;
            };

            let lock_key = rebuild_lock_key(&key);
            match client
                .store
                .set_if_absent(&lock_key, "1", client.config.rebuild_lock_ttl)
                .await
            {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    warn!(key = %key, error = %err, "Rebuild lock attempt failed");
                    return;
                }
            }

            if let Err(err) = client.rebuild_entry::<T, F, Fut>(&key, id, ttl, fallback).await {
                error!(key = %key, error = %err, "Cache rebuild failed");
            }

            if let Err(err) = client.store.delete(&lock_key).await {
                warn!(key = %lock_key, error = %err, "Failed to release rebuild lock");
            }
        });
    }

    async fn rebuild_entry<T, F, Fut>(
        &self,
        key: &str,
        id: u64,
        ttl: Duration,
        fallback: F,
    ) -> Result<(), CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<T>, RepoError>> + Send + 'static,
    {
        // Re-check freshness after winning the lock: the previous holder
        // may have rebuilt while this task raced for it.
        if let Some(raw) = self.store.get(key).await? {
            if let Ok(entry) = serde_json::from_str::<TimedEntry<T>>(&raw) {
                if entry.is_fresh() {
                    return Ok(());
                }
            }
        }

        match fallback(id).await? {
            Some(value) => {
                counter!(METRIC_CACHE_REBUILD).increment(1);
                let entry = TimedEntry::new(value, ttl);
                self.store.set(key, &encode(key, &entry)?).await?;
            }
            None => {
                // The entity vanished from the source; keeping the stale
                // entry would resurrect it forever.
                self.store.delete(key).await?;
            }
        }
        Ok(())
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|source| CacheError::Codec {
        key: key.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Codec {
        key: key.to_string(),
        source,
    })
}
