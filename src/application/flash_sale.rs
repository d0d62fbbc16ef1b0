//! Flash-sale voucher publishing, reads, and the admission gate.

use std::sync::Arc;

use metrics::counter;
use tracing::info;

use crate::cache::{CacheClient, keys};
use crate::domain::entities::FlashSaleVoucherRecord;
use crate::domain::error::DomainError;
use crate::infra::ids::IdGenerator;
use crate::infra::store::{AdmissionCode, AdmissionCommand, SharedStore};

use super::context::RequestContext;
use super::error::AppError;
use super::repos::VouchersRepo;

const METRIC_ADMISSION: &str = "piazza_admission_total";
const ORDER_ID_KEY: &str = "order";

/// Synchronous answer of the admission gate. Non-OK outcomes are ordinary
/// values surfaced to the caller, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { order_id: u64 },
    OutOfStock,
    AlreadyOrdered,
}

#[derive(Clone)]
pub struct FlashSaleService {
    store: Arc<dyn SharedStore>,
    cache: CacheClient,
    ids: IdGenerator,
    vouchers: Arc<dyn VouchersRepo>,
}

impl FlashSaleService {
    pub fn new(
        store: Arc<dyn SharedStore>,
        cache: CacheClient,
        ids: IdGenerator,
        vouchers: Arc<dyn VouchersRepo>,
    ) -> Self {
        Self {
            store,
            cache,
            ids,
            vouchers,
        }
    }

    /// Persists a new flash-sale voucher, seeds its admission counter in the
    /// store, and pre-warms the read cache for the sale window.
    pub async fn publish_voucher(&self, voucher: FlashSaleVoucherRecord) -> Result<(), AppError> {
        if voucher.begin_time >= voucher.end_time {
            return Err(DomainError::validation("sale window is empty").into());
        }
        if voucher.stock < 0 {
            return Err(DomainError::validation("stock must be non-negative").into());
        }

        self.vouchers.insert(&voucher).await?;
        self.store
            .set(&keys::stock_key(voucher.id), &voucher.stock.to_string())
            .await?;

        let ttl = self.cache.config().voucher_logical_ttl;
        let voucher_id = voucher.id;
        self.cache
            .set_with_logical_expiry(keys::VOUCHER_CACHE_PREFIX, voucher_id, voucher, ttl)
            .await?;

        info!(voucher_id, "Flash-sale voucher published");
        Ok(())
    }

    /// Cached voucher lookup under the logical-expiry policy: the entry is
    /// hottest mid-sale, when a stampede onto the database would hurt most.
    pub async fn voucher_by_id(
        &self,
        id: u64,
    ) -> Result<Option<FlashSaleVoucherRecord>, AppError> {
        let vouchers = self.vouchers.clone();
        let ttl = self.cache.config().voucher_logical_ttl;
        let voucher = self
            .cache
            .get_with_logical_expiry(keys::VOUCHER_CACHE_PREFIX, id, ttl, move |id| async move {
                vouchers.find_by_id(id).await
            })
            .await?;
        Ok(voucher)
    }

    /// The eligibility gate: one atomic store round trip decides duplicate,
    /// sold-out, or admitted. On admission the order request is already in
    /// the durable stream and the caller gets the order id immediately; the
    /// worker materializes the relational order asynchronously.
    pub async fn place_order(
        &self,
        ctx: RequestContext,
        voucher_id: u64,
    ) -> Result<Admission, AppError> {
        let order_id = self.ids.next_id(ORDER_ID_KEY).await?;
        let command = AdmissionCommand {
            stock_key: keys::stock_key(voucher_id),
            marker_key: keys::ordered_marker_key(voucher_id, ctx.user_id),
            stream: keys::ORDER_STREAM.to_string(),
            order_id,
            user_id: ctx.user_id,
            voucher_id,
        };

        let admission = match self.store.admit(&command).await? {
            AdmissionCode::Admitted => {
                info!(order_id, voucher_id, user_id = ctx.user_id, "Order admitted");
                Admission::Admitted { order_id }
            }
            AdmissionCode::OutOfStock => Admission::OutOfStock,
            AdmissionCode::Duplicate => Admission::AlreadyOrdered,
        };

        let outcome = match admission {
            Admission::Admitted { .. } => "admitted",
            Admission::OutOfStock => "out_of_stock",
            Admission::AlreadyOrdered => "duplicate",
        };
        counter!(METRIC_ADMISSION, "outcome" => outcome).increment(1);

        Ok(admission)
    }
}
