//! Crash-recovery and idempotence of the order worker.

mod support;

use std::time::Duration;

use piazza::application::context::RequestContext;
use piazza::application::flash_sale::Admission;
use piazza::cache::keys;
use piazza::infra::lock::DistributedLock;
use piazza::infra::store::SharedStore;

use support::{Harness, voucher};

/// Claims the next stream entry without acknowledging it, as a worker that
/// crashed mid-processing would have.
async fn claim_without_ack(harness: &Harness) {
    harness
        .store
        .read_new(keys::ORDER_STREAM, keys::ORDER_GROUP, "c1", Duration::from_millis(100))
        .await
        .unwrap()
        .expect("a delivery to claim");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_crashed_delivery_is_replayed_from_the_pending_list() {
    let harness = Harness::new().await;
    harness
        .flash_sale
        .publish_voucher(voucher(7, 5))
        .await
        .unwrap();
    harness
        .flash_sale
        .place_order(RequestContext { user_id: 1 }, 7)
        .await
        .unwrap();

    // First worker incarnation dies between read and ack.
    claim_without_ack(&harness).await;
    assert!(harness.repos.orders().is_empty());

    // Recovery replays the pending list and lands the order exactly once.
    harness.worker().drain_pending().await;

    let orders = harness.repos.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].user_id, 1);
    assert_eq!(harness.repos.voucher_stock(7), Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_redelivered_message_is_a_safe_no_op() {
    let harness = Harness::new().await;
    harness
        .flash_sale
        .publish_voucher(voucher(7, 5))
        .await
        .unwrap();
    let outcome = harness
        .flash_sale
        .place_order(RequestContext { user_id: 1 }, 7)
        .await
        .unwrap();
    let Admission::Admitted { order_id } = outcome else {
        panic!("expected admission");
    };

    claim_without_ack(&harness).await;
    harness.worker().drain_pending().await;
    assert_eq!(harness.repos.orders().len(), 1);

    // The same logical message arrives a second time (redelivery after an
    // ack that never made it out).
    harness
        .store
        .stream_append(
            keys::ORDER_STREAM,
            vec![
                ("id".to_string(), order_id.to_string()),
                ("userId".to_string(), "1".to_string()),
                ("voucherId".to_string(), "7".to_string()),
            ],
        )
        .await
        .unwrap();
    claim_without_ack(&harness).await;
    harness.worker().drain_pending().await;

    // Still one order, stock decremented exactly once.
    assert_eq!(harness.repos.orders().len(), 1);
    assert_eq!(harness.repos.voucher_stock(7), Some(4));
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_order_redelivery_is_tolerated() {
    let harness = Harness::new().await;
    harness
        .flash_sale
        .publish_voucher(voucher(7, 5))
        .await
        .unwrap();

    for user_id in 1..=3 {
        harness
            .flash_sale
            .place_order(RequestContext { user_id }, 7)
            .await
            .unwrap();
    }

    // All three deliveries were claimed, none acknowledged.
    for _ in 0..3 {
        claim_without_ack(&harness).await;
    }

    harness.worker().drain_pending().await;

    assert_eq!(harness.repos.orders().len(), 3);
    assert_eq!(harness.repos.voucher_stock(7), Some(2));
}

#[tokio::test(flavor = "multi_thread")]
async fn a_contended_user_lock_drops_the_delivery() {
    let harness = Harness::new().await;
    harness
        .flash_sale
        .publish_voucher(voucher(7, 5))
        .await
        .unwrap();
    harness
        .flash_sale
        .place_order(RequestContext { user_id: 1 }, 7)
        .await
        .unwrap();

    // Someone else holds this user's order lock for the duration.
    let store: std::sync::Arc<dyn SharedStore> = harness.store.clone();
    let foreign = DistributedLock::new(store, keys::order_lock_resource(1));
    assert!(foreign.try_acquire(Duration::from_secs(60)).await.unwrap());

    claim_without_ack(&harness).await;
    harness.worker().drain_pending().await;

    // The delivery was dropped, not retried: no order, stock untouched.
    assert!(harness.repos.orders().is_empty());
    assert_eq!(harness.repos.voucher_stock(7), Some(5));
}
