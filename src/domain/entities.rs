//! Persistent domain records.
//!
//! Records mirror their relational rows one-to-one; cross-record invariants
//! (stock non-negativity, one order per user and voucher) are enforced by
//! the repositories and the admission gate, not here.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A shop listed on the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopRecord {
    pub id: u64,
    pub name: String,
    pub address: String,
    /// Aggregate review score, tenths of a star.
    pub score: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A flash-sale voucher with bounded inventory.
///
/// `stock` is the relational source of truth; the shared store carries a
/// derived admission counter seeded at publish time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashSaleVoucherRecord {
    pub id: u64,
    pub shop_id: u64,
    pub title: String,
    pub stock: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub begin_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_time: OffsetDateTime,
}

/// A persisted flash-sale order. At most one per (user_id, voucher_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoucherOrderRecord {
    pub id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VoucherOrderRecord {
    pub fn new(id: u64, user_id: u64, voucher_id: u64) -> Self {
        Self {
            id,
            user_id,
            voucher_id,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
