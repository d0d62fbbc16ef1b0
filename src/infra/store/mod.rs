//! Shared-store collaborator contract.
//!
//! The marketplace core coordinates through a network key-value store that
//! offers TTL'd values, conditional writes, atomic counters, a durable
//! stream with consumer groups, and atomic multi-key procedures. The trait
//! below captures exactly that capability surface; any store with
//! equivalent conditional multi-key operations satisfies it. [`MemoryStore`]
//! is the in-process implementation used by single-node deployments and by
//! the test suite.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shared store unavailable: {0}")]
    Unavailable(String),
    #[error("value under `{key}` has the wrong shape: {detail}")]
    WrongType { key: String, detail: String },
    #[error("unknown consumer group `{group}` on stream `{stream}`")]
    UnknownGroup { stream: String, group: String },
}

impl StoreError {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::Unavailable(detail.into())
    }

    pub fn wrong_type(key: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::WrongType {
            key: key.into(),
            detail: detail.into(),
        }
    }

    pub fn unknown_group(stream: impl Into<String>, group: impl Into<String>) -> Self {
        Self::UnknownGroup {
            stream: stream.into(),
            group: group.into(),
        }
    }
}

/// Identifier of one durable stream entry, assigned at append time.
///
/// Ids are strictly increasing within a stream, so the oldest pending
/// delivery is always the one with the smallest id.
pub type MessageId = u64;

/// One delivered stream entry: an id plus the appended field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: MessageId,
    pub fields: Vec<(String, String)>,
}

impl StreamMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// One admission attempt against a flash-sale voucher.
///
/// The store executes the whole command as a single atomic procedure:
/// duplicate check, stock check and decrement, marker write, stream append.
/// Key names are owned by the caller so the store stays domain-agnostic.
#[derive(Debug, Clone)]
pub struct AdmissionCommand {
    /// Counter key holding the voucher's cached stock.
    pub stock_key: String,
    /// Marker key recording that this user already ordered this voucher.
    pub marker_key: String,
    /// Stream the order request is appended to on success.
    pub stream: String,
    pub order_id: u64,
    pub user_id: u64,
    pub voucher_id: u64,
}

impl AdmissionCommand {
    /// Field map appended to the stream when the command is admitted.
    pub fn stream_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".to_string(), self.order_id.to_string()),
            ("userId".to_string(), self.user_id.to_string()),
            ("voucherId".to_string(), self.voucher_id.to_string()),
        ]
    }
}

/// Outcome of the atomic admission procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionCode {
    Admitted,
    OutOfStock,
    Duplicate,
}

impl AdmissionCode {
    /// Wire code of the procedure: 0 = ok, 1 = out of stock, 2 = duplicate.
    pub fn as_code(self) -> i64 {
        match self {
            Self::Admitted => 0,
            Self::OutOfStock => 1,
            Self::Duplicate => 2,
        }
    }
}

#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Conditional create: stores `value` under `key` with `ttl` only when
    /// the key is currently absent. Returns whether this call created it.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomic check-and-delete: removes `key` only when the stored value
    /// equals `expected`. The fencing-token release primitive.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Atomically increments the integer under `key` (absent counts as 0)
    /// and returns the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Runs the admission procedure atomically with respect to every other
    /// store operation.
    async fn admit(&self, command: &AdmissionCommand) -> Result<AdmissionCode, StoreError>;

    /// Appends a field map to the durable stream, creating it on first use.
    async fn stream_append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<MessageId, StoreError>;

    /// Creates a consumer group positioned at the start of the stream.
    /// Idempotent.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StoreError>;

    /// Delivers the next never-delivered entry to `consumer`, blocking up
    /// to `block` when the stream is drained. A delivered entry joins the
    /// group's pending list until acknowledged.
    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<StreamMessage>, StoreError>;

    /// Re-delivers the oldest pending (delivered, unacknowledged) entry for
    /// `consumer`, or `None` when the pending list is empty.
    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<StreamMessage>, StoreError>;

    /// Acknowledges a delivered entry, removing it from the pending list.
    async fn ack(&self, stream: &str, group: &str, id: MessageId) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_codes_match_the_procedure_contract() {
        assert_eq!(AdmissionCode::Admitted.as_code(), 0);
        assert_eq!(AdmissionCode::OutOfStock.as_code(), 1);
        assert_eq!(AdmissionCode::Duplicate.as_code(), 2);
    }

    #[test]
    fn stream_fields_use_the_queue_message_schema() {
        let command = AdmissionCommand {
            stock_key: "seckill:stock:7".into(),
            marker_key: "seckill:ordered:7:42".into(),
            stream: "stream:orders".into(),
            order_id: 1001,
            user_id: 42,
            voucher_id: 7,
        };

        let fields = command.stream_fields();
        let message = StreamMessage { id: 1, fields };

        assert_eq!(message.field("id"), Some("1001"));
        assert_eq!(message.field("userId"), Some("42"));
        assert_eq!(message.field("voucherId"), Some("7"));
        assert_eq!(message.field("missing"), None);
    }
}
