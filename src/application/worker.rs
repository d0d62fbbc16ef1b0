//! The order queue worker.
//!
//! A single long-running consumer drains admitted order requests from the
//! durable stream and persists them. Per-user locking plus the relational
//! duplicate check make processing idempotent, which is what lets the
//! crash-recovery path simply replay the pending list: a redelivered
//! message whose order already committed is a safe no-op.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tracing::{error, info, warn};

use crate::cache::keys;
use crate::domain::entities::VoucherOrderRecord;
use crate::infra::lock::DistributedLock;
use crate::infra::store::{SharedStore, StoreError, StreamMessage};

use super::error::AppError;
use super::repos::{OrdersRepo, VouchersRepo};

const METRIC_ORDERS_PERSISTED: &str = "piazza_orders_persisted_total";
const METRIC_ORDER_DROPPED: &str = "piazza_order_dropped_total";
const METRIC_ORDER_HANDLE_MS: &str = "piazza_order_handle_ms";

const DEFAULT_BLOCK: Duration = Duration::from_secs(2);
/// Must exceed worst-case order-creation latency by a wide margin; a
/// critical section outliving this TTL is a configuration bug.
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(1200);
const PENDING_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Wire form of one gated order request, decoded from the stream's
/// `{id, userId, voucherId}` field map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest {
    pub id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
}

impl OrderRequest {
    pub fn from_message(message: &StreamMessage) -> Result<Self, AppError> {
        Ok(Self {
            id: parse_field(message, "id")?,
            user_id: parse_field(message, "userId")?,
            voucher_id: parse_field(message, "voucherId")?,
        })
    }
}

fn parse_field(message: &StreamMessage, name: &str) -> Result<u64, AppError> {
    message
        .field(name)
        .ok_or_else(|| AppError::Malformed(format!("field `{name}` missing in message {}", message.id)))?
        .parse()
        .map_err(|_| AppError::Malformed(format!("field `{name}` is not numeric in message {}", message.id)))
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream: String,
    pub group: String,
    pub consumer: String,
    /// Upper bound on one blocking stream read.
    pub block: Duration,
    /// TTL of the per-user order lock.
    pub lock_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream: keys::ORDER_STREAM.to_string(),
            group: keys::ORDER_GROUP.to_string(),
            consumer: "c1".to_string(),
            block: DEFAULT_BLOCK,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

impl From<&crate::config::WorkerSettings> for WorkerConfig {
    fn from(settings: &crate::config::WorkerSettings) -> Self {
        Self {
            stream: settings.stream.clone(),
            group: settings.group.clone(),
            consumer: settings.consumer.clone(),
            block: settings.block,
            lock_ttl: settings.lock_ttl,
        }
    }
}

pub struct OrderWorker {
    store: Arc<dyn SharedStore>,
    vouchers: Arc<dyn VouchersRepo>,
    orders: Arc<dyn OrdersRepo>,
    config: WorkerConfig,
}

impl OrderWorker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        vouchers: Arc<dyn VouchersRepo>,
        orders: Arc<dyn OrdersRepo>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            vouchers,
            orders,
            config,
        }
    }

    /// Creates the consumer group. Idempotent; call once before `run`.
    pub async fn prepare(&self) -> Result<(), StoreError> {
        self.store
            .create_group(&self.config.stream, &self.config.group)
            .await
    }

    /// Runs the consumer loop forever.
    ///
    /// A failed delivery switches to pending-list recovery and the loop
    /// resumes; nothing short of task cancellation stops the worker.
    pub async fn run(self) {
        info!(
            stream = %self.config.stream,
            group = %self.config.group,
            consumer = %self.config.consumer,
            "Order worker started"
        );
        loop {
            if let Err(err) = self.tick().await {
                error!(error = %err, "Order delivery failed, replaying pending list");
                self.drain_pending().await;
            }
        }
    }

    /// One blocking read plus processing of at most one message.
    async fn tick(&self) -> Result<(), AppError> {
        let Some(message) = self
            .store
            .read_new(
                &self.config.stream,
                &self.config.group,
                &self.config.consumer,
                self.config.block,
            )
            .await?
        else {
            return Ok(());
        };

        let request = OrderRequest::from_message(&message)?;
        self.handle(&request).await?;
        self.store
            .ack(&self.config.stream, &self.config.group, message.id)
            .await?;
        Ok(())
    }

    /// Replays the group's pending list oldest-first until it is empty.
    ///
    /// Redelivery can re-present an older message after newer ones already
    /// committed; the idempotent handler absorbs the reordering.
    pub async fn drain_pending(&self) {
        loop {
            let message = match self
                .store
                .read_pending(&self.config.stream, &self.config.group, &self.config.consumer)
                .await
            {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!("Pending list drained, resuming normal reads");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "Pending read failed, retrying");
                    tokio::time::sleep(PENDING_RETRY_DELAY).await;
                    continue;
                }
            };

            let outcome = async {
                let request = OrderRequest::from_message(&message)?;
                self.handle(&request).await?;
                self.store
                    .ack(&self.config.stream, &self.config.group, message.id)
                    .await?;
                Ok::<(), AppError>(())
            }
            .await;

            if let Err(err) = outcome {
                warn!(message_id = message.id, error = %err, "Pending delivery failed");
                tokio::time::sleep(PENDING_RETRY_DELAY).await;
            }
        }
    }

    /// Serializes order creation behind the per-user lock, releasing it on
    /// every path before the caller acknowledges.
    async fn handle(&self, request: &OrderRequest) -> Result<(), AppError> {
        let started = Instant::now();
        let lock = DistributedLock::new(
            self.store.clone(),
            keys::order_lock_resource(request.user_id),
        );

        if !lock.try_acquire(self.config.lock_ttl).await? {
            // Another holder is creating an order for this user right now;
            // the relational duplicate check makes dropping this delivery
            // safe.
            error!(
                user_id = request.user_id,
                order_id = request.id,
                "User order lock contended, dropping delivery"
            );
            counter!(METRIC_ORDER_DROPPED, "reason" => "lock_contended").increment(1);
            return Ok(());
        }

        let result = self.create_order(request).await;

        if let Err(err) = lock.release().await {
            warn!(user_id = request.user_id, error = %err, "Order lock release failed");
        }
        histogram!(METRIC_ORDER_HANDLE_MS).record(started.elapsed().as_secs_f64() * 1000.0);

        result
    }

    /// Idempotent order creation: duplicate double-check, conditional stock
    /// decrement, insert.
    async fn create_order(&self, request: &OrderRequest) -> Result<(), AppError> {
        let existing = self
            .orders
            .count_for_user_and_voucher(request.user_id, request.voucher_id)
            .await?;
        if existing > 0 {
            warn!(
                user_id = request.user_id,
                voucher_id = request.voucher_id,
                "Order already persisted, dropping redelivery"
            );
            counter!(METRIC_ORDER_DROPPED, "reason" => "duplicate").increment(1);
            return Ok(());
        }

        if !self.vouchers.decrement_stock(request.voucher_id).await? {
            // The gate admitted more requests than the ledger holds. The
            // two counters disagreeing is an invariant violation, not a
            // retryable condition.
            error!(
                voucher_id = request.voucher_id,
                order_id = request.id,
                "Relational stock exhausted for an admitted order"
            );
            counter!(METRIC_ORDER_DROPPED, "reason" => "stock_exhausted").increment(1);
            return Ok(());
        }

        let order = VoucherOrderRecord::new(request.id, request.user_id, request.voucher_id);
        if !self.orders.insert_if_absent(&order).await? {
            error!(
                user_id = request.user_id,
                voucher_id = request.voucher_id,
                "Unique-constraint insert lost a race the lock should have prevented"
            );
            counter!(METRIC_ORDER_DROPPED, "reason" => "insert_conflict").increment(1);
            return Ok(());
        }

        counter!(METRIC_ORDERS_PERSISTED).increment(1);
        info!(
            order_id = request.id,
            user_id = request.user_id,
            voucher_id = request.voucher_id,
            "Order persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_request_decodes_the_field_map() {
        let message = StreamMessage {
            id: 3,
            fields: vec![
                ("id".into(), "1001".into()),
                ("userId".into(), "42".into()),
                ("voucherId".into(), "7".into()),
            ],
        };

        let request = OrderRequest::from_message(&message).unwrap();
        assert_eq!(
            request,
            OrderRequest {
                id: 1001,
                user_id: 42,
                voucher_id: 7
            }
        );
    }

    #[test]
    fn missing_and_garbled_fields_are_malformed() {
        let missing = StreamMessage {
            id: 3,
            fields: vec![("id".into(), "1001".into())],
        };
        assert!(matches!(
            OrderRequest::from_message(&missing),
            Err(AppError::Malformed(_))
        ));

        let garbled = StreamMessage {
            id: 3,
            fields: vec![
                ("id".into(), "1001".into()),
                ("userId".into(), "forty-two".into()),
                ("voucherId".into(), "7".into()),
            ],
        };
        assert!(matches!(
            OrderRequest::from_message(&garbled),
            Err(AppError::Malformed(_))
        ));
    }
}
