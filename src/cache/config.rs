//! Cache configuration.

use std::time::Duration;

const DEFAULT_SHOP_TTL_SECS: u64 = 30 * 60;
const DEFAULT_VOUCHER_LOGICAL_TTL_SECS: u64 = 20;
const DEFAULT_NULL_TTL_SECS: u64 = 2 * 60;
const DEFAULT_REBUILD_LOCK_TTL_SECS: u64 = 10;
const DEFAULT_REBUILD_CONCURRENCY: usize = 10;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Store-level TTL for null-cached shop entries.
    pub shop_ttl: Duration,
    /// Logical expiry horizon for voucher entries.
    pub voucher_logical_ttl: Duration,
    /// TTL of the empty "known absent" sentinel.
    pub null_ttl: Duration,
    /// TTL of the per-entry rebuild lock; bounds how long a crashed rebuild
    /// can suppress further rebuilds.
    pub rebuild_lock_ttl: Duration,
    /// Upper bound on concurrently running rebuild tasks.
    pub rebuild_concurrency: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shop_ttl: Duration::from_secs(DEFAULT_SHOP_TTL_SECS),
            voucher_logical_ttl: Duration::from_secs(DEFAULT_VOUCHER_LOGICAL_TTL_SECS),
            null_ttl: Duration::from_secs(DEFAULT_NULL_TTL_SECS),
            rebuild_lock_ttl: Duration::from_secs(DEFAULT_REBUILD_LOCK_TTL_SECS),
            rebuild_concurrency: DEFAULT_REBUILD_CONCURRENCY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            shop_ttl: Duration::from_secs(settings.shop_ttl_secs),
            voucher_logical_ttl: Duration::from_secs(settings.voucher_logical_ttl_secs),
            null_ttl: Duration::from_secs(settings.null_ttl_secs),
            rebuild_lock_ttl: Duration::from_secs(settings.rebuild_lock_ttl_secs),
            rebuild_concurrency: settings.rebuild_concurrency.get(),
        }
    }
}
