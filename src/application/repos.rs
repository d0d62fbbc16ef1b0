//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::{FlashSaleVoucherRecord, ShopRecord, VoucherOrderRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[async_trait]
pub trait ShopsRepo: Send + Sync {
    async fn find_by_id(&self, id: u64) -> Result<Option<ShopRecord>, RepoError>;

    async fn update(&self, shop: &ShopRecord) -> Result<(), RepoError>;
}

#[async_trait]
pub trait VouchersRepo: Send + Sync {
    async fn find_by_id(&self, id: u64) -> Result<Option<FlashSaleVoucherRecord>, RepoError>;

    async fn insert(&self, voucher: &FlashSaleVoucherRecord) -> Result<(), RepoError>;

    /// Conditional decrement: `stock = stock - 1` only while `stock > 0`.
    /// Returns whether a row was decremented; the column can never go
    /// negative through this call.
    async fn decrement_stock(&self, voucher_id: u64) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait OrdersRepo: Send + Sync {
    async fn count_for_user_and_voucher(
        &self,
        user_id: u64,
        voucher_id: u64,
    ) -> Result<u64, RepoError>;

    /// Insert honoring the (user_id, voucher_id) unique constraint.
    /// Returns whether a row was inserted.
    async fn insert_if_absent(&self, order: &VoucherOrderRecord) -> Result<bool, RepoError>;
}
