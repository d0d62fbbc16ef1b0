//! Key namespaces in the shared store.
//!
//! One prefix per concern; lock keys are prefixed distinctly from cache
//! entries so the namespaces can never collide.

/// Cached shop records.
pub const SHOP_CACHE_PREFIX: &str = "cache:shop:";
/// Cached flash-sale voucher records (logical-expiry wrapped).
pub const VOUCHER_CACHE_PREFIX: &str = "cache:voucher:";
/// Admission-gate stock counters, seeded at voucher publish time.
pub const STOCK_PREFIX: &str = "seckill:stock:";
/// Per-(voucher, user) duplicate-order markers written by the gate.
pub const ORDERED_MARKER_PREFIX: &str = "seckill:ordered:";

/// Durable stream carrying admitted order requests.
pub const ORDER_STREAM: &str = "stream:orders";
/// Consumer group the order worker reads under.
pub const ORDER_GROUP: &str = "g1";

pub fn entry_key(prefix: &str, id: u64) -> String {
    format!("{prefix}{id}")
}

/// Short-TTL lock guarding the rebuild of one cache entry.
pub fn rebuild_lock_key(entry_key: &str) -> String {
    format!("lock:{entry_key}")
}

pub fn stock_key(voucher_id: u64) -> String {
    format!("{STOCK_PREFIX}{voucher_id}")
}

pub fn ordered_marker_key(voucher_id: u64, user_id: u64) -> String {
    format!("{ORDERED_MARKER_PREFIX}{voucher_id}:{user_id}")
}

/// Per-user lock resource serializing order creation in the worker.
pub fn order_lock_resource(user_id: u64) -> String {
    format!("order:{user_id}")
}
