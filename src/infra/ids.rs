//! Store-backed monotonic id allocation.
//!
//! Ids compose a coarse timestamp (seconds since a fixed epoch) in the high
//! bits with a store-incremented sequence in the low bits. The counter key
//! is scoped to the calendar day, so sequences rotate daily without an
//! explicit reset while the timestamp prefix keeps ids strictly increasing
//! across days and process restarts.

use std::sync::Arc;

use time::OffsetDateTime;

use super::store::{SharedStore, StoreError};

/// 2022-01-01T00:00:00Z.
const ID_EPOCH_SECS: i64 = 1_640_995_200;
const SEQUENCE_BITS: u32 = 32;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const COUNTER_PREFIX: &str = "icr:";

#[derive(Clone)]
pub struct IdGenerator {
    store: Arc<dyn SharedStore>,
}

impl IdGenerator {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Allocates the next id for `business_key`, unique across every
    /// process sharing the store.
    pub async fn next_id(&self, business_key: &str) -> Result<u64, StoreError> {
        let now = OffsetDateTime::now_utc();
        let timestamp = (now.unix_timestamp() - ID_EPOCH_SECS) as u64;

        let key = format!(
            "{COUNTER_PREFIX}{business_key}:{:04}:{:02}:{:02}",
            now.year(),
            u8::from(now.month()),
            now.day()
        );
        let sequence = self.store.increment(&key).await? as u64;

        Ok((timestamp << SEQUENCE_BITS) | (sequence & SEQUENCE_MASK))
    }
}
