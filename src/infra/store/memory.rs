//! In-process [`SharedStore`] implementation.
//!
//! Values and streams live behind two `RwLock`s; every compound operation
//! (conditional set, check-and-delete, admission) runs to completion while
//! holding the writer side, which is what makes it atomic with respect to
//! all concurrent callers. Expiry is lazy: an entry past its deadline is
//! treated as absent and removed on the next touch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::warn;

use super::{AdmissionCode, AdmissionCommand, MessageId, SharedStore, StoreError, StreamMessage};

const SOURCE: &str = "infra::store::memory";

struct ValueEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ValueEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

struct PendingDelivery {
    consumer: String,
    fields: Vec<(String, String)>,
    delivery_count: u32,
}

#[derive(Default)]
struct GroupState {
    /// Index of the next never-delivered entry in `StreamState::entries`.
    cursor: usize,
    pending: BTreeMap<MessageId, PendingDelivery>,
}

#[derive(Default)]
struct StreamState {
    last_id: MessageId,
    entries: Vec<(MessageId, Vec<(String, String)>)>,
    groups: HashMap<String, GroupState>,
}

/// Shared store backed by process memory.
///
/// Durability of the stream is scoped to the process: pending lists survive
/// worker task crashes and restarts within the process, which is the
/// recovery granularity the order worker relies on.
pub struct MemoryStore {
    values: RwLock<HashMap<String, ValueEntry>>,
    streams: RwLock<HashMap<String, StreamState>>,
    appended: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            appended: Notify::new(),
        }
    }

    fn read_values(&self, op: &'static str) -> RwLockReadGuard<'_, HashMap<String, ValueEntry>> {
        match self.values.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    target_module = SOURCE,
                    lock_kind = "rwlock.read",
                    result = "poisoned_recovered",
                    "Recovered from poisoned store lock"
                );
                poisoned.into_inner()
            }
        }
    }

    fn write_values(&self, op: &'static str) -> RwLockWriteGuard<'_, HashMap<String, ValueEntry>> {
        match self.values.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    target_module = SOURCE,
                    lock_kind = "rwlock.write",
                    result = "poisoned_recovered",
                    "Recovered from poisoned store lock"
                );
                poisoned.into_inner()
            }
        }
    }

    fn write_streams(&self, op: &'static str) -> RwLockWriteGuard<'_, HashMap<String, StreamState>> {
        match self.streams.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(
                    op,
                    target_module = SOURCE,
                    lock_kind = "rwlock.write",
                    result = "poisoned_recovered",
                    "Recovered from poisoned store lock"
                );
                poisoned.into_inner()
            }
        }
    }

    fn insert_value(
        values: &mut HashMap<String, ValueEntry>,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) {
        values.insert(
            key.to_string(),
            ValueEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
    }

    /// Looks up a live entry, removing it when its TTL has lapsed.
    fn live_value<'a>(
        values: &'a mut HashMap<String, ValueEntry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a ValueEntry> {
        if values.get(key).is_some_and(|entry| entry.is_expired(now)) {
            values.remove(key);
            return None;
        }
        values.get(key)
    }

    fn append_to_stream(
        streams: &mut HashMap<String, StreamState>,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> MessageId {
        let state = streams.entry(stream.to_string()).or_default();
        state.last_id += 1;
        let id = state.last_id;
        state.entries.push((id, fields));
        id
    }

    fn claim_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<StreamMessage>, StoreError> {
        let mut streams = self.write_streams("claim_new");
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::unknown_group(stream, group))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::unknown_group(stream, group))?;

        if group_state.cursor >= state.entries.len() {
            return Ok(None);
        }

        let (id, fields) = state.entries[group_state.cursor].clone();
        group_state.cursor += 1;
        group_state.pending.insert(
            id,
            PendingDelivery {
                consumer: consumer.to_string(),
                fields: fields.clone(),
                delivery_count: 1,
            },
        );

        Ok(Some(StreamMessage { id, fields }))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        {
            let values = self.read_values("get");
            match values.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Lapsed entry: upgrade to the writer side to collect it.
        let mut values = self.write_values("get.expire");
        Ok(Self::live_value(&mut values, key, now).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.write_values("set");
        Self::insert_value(&mut values, key, value, None);
        Ok(())
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut values = self.write_values("set_with_ttl");
        Self::insert_value(&mut values, key, value, Some(ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut values = self.write_values("set_if_absent");
        if Self::live_value(&mut values, key, now).is_some() {
            return Ok(false);
        }
        Self::insert_value(&mut values, key, value, Some(ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.write_values("delete");
        values.remove(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut values = self.write_values("delete_if_equals");
        let matches = Self::live_value(&mut values, key, now)
            .is_some_and(|entry| entry.value == expected);
        if matches {
            values.remove(key);
        }
        Ok(matches)
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut values = self.write_values("increment");
        let current = match Self::live_value(&mut values, key, now) {
            None => 0,
            Some(entry) => entry
                .value
                .parse::<i64>()
                .map_err(|err| StoreError::wrong_type(key, err.to_string()))?,
        };
        let next = current + 1;
        // Counters keep no TTL of their own; date-scoped keys rotate instead.
        Self::insert_value(&mut values, key, &next.to_string(), None);
        Ok(next)
    }

    async fn admit(&self, command: &AdmissionCommand) -> Result<AdmissionCode, StoreError> {
        let now = Instant::now();
        // Lock order: values before streams. `admit` is the only operation
        // holding both, so the ordering can never invert elsewhere.
        let mut values = self.write_values("admit");

        if Self::live_value(&mut values, &command.marker_key, now).is_some() {
            return Ok(AdmissionCode::Duplicate);
        }

        let stock = match Self::live_value(&mut values, &command.stock_key, now) {
            None => return Ok(AdmissionCode::OutOfStock),
            Some(entry) => entry
                .value
                .parse::<i64>()
                .map_err(|err| StoreError::wrong_type(command.stock_key.as_str(), err.to_string()))?,
        };
        if stock <= 0 {
            return Ok(AdmissionCode::OutOfStock);
        }

        Self::insert_value(&mut values, &command.stock_key, &(stock - 1).to_string(), None);
        Self::insert_value(&mut values, &command.marker_key, &command.order_id.to_string(), None);

        {
            let mut streams = self.write_streams("admit.append");
            Self::append_to_stream(&mut streams, &command.stream, command.stream_fields());
        }
        drop(values);
        self.appended.notify_waiters();

        Ok(AdmissionCode::Admitted)
    }

    async fn stream_append(
        &self,
        stream: &str,
        fields: Vec<(String, String)>,
    ) -> Result<MessageId, StoreError> {
        let id = {
            let mut streams = self.write_streams("stream_append");
            Self::append_to_stream(&mut streams, stream, fields)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut streams = self.write_streams("create_group");
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<StreamMessage>, StoreError> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking, so an append racing with
            // the check still wakes this reader.
            let notified = self.appended.notified();
            if let Some(message) = self.claim_new(stream, group, consumer)? {
                return Ok(Some(message));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn read_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<StreamMessage>, StoreError> {
        let mut streams = self.write_streams("read_pending");
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::unknown_group(stream, group))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::unknown_group(stream, group))?;

        // BTreeMap iteration order makes this the oldest delivery.
        let next = group_state
            .pending
            .iter_mut()
            .find(|(_, delivery)| delivery.consumer == consumer);

        Ok(next.map(|(id, delivery)| {
            delivery.delivery_count += 1;
            StreamMessage {
                id: *id,
                fields: delivery.fields.clone(),
            }
        }))
    }

    async fn ack(&self, stream: &str, group: &str, id: MessageId) -> Result<(), StoreError> {
        let mut streams = self.write_streams("ack");
        let state = streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::unknown_group(stream, group))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::unknown_group(stream, group))?;
        group_state.pending.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(order_id: u64, user_id: u64) -> AdmissionCommand {
        AdmissionCommand {
            stock_key: "seckill:stock:7".into(),
            marker_key: format!("seckill:ordered:7:{user_id}"),
            stream: "stream:orders".into(),
            order_id,
            user_id,
            voucher_id: 7,
        }
    }

    #[tokio::test]
    async fn values_round_trip_and_expire() {
        let store = MemoryStore::new();

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store
            .set_with_ttl("short", "x", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(store.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_if_absent_is_create_once() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent("lock:a", "t1", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:a", "t2", ttl).await.unwrap());
        assert_eq!(store.get("lock:a").await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn set_if_absent_succeeds_after_expiry() {
        let store = MemoryStore::new();

        assert!(
            store
                .set_if_absent("lock:a", "t1", Duration::from_millis(20))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(
            store
                .set_if_absent("lock:a", "t2", Duration::from_secs(10))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_if_equals_requires_matching_value() {
        let store = MemoryStore::new();
        store.set("lock:a", "token").await.unwrap();

        assert!(!store.delete_if_equals("lock:a", "other").await.unwrap());
        assert!(store.get("lock:a").await.unwrap().is_some());

        assert!(store.delete_if_equals("lock:a", "token").await.unwrap());
        assert!(store.get("lock:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increment_counts_from_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("icr:order:x").await.unwrap(), 1);
        assert_eq!(store.increment("icr:order:x").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_values() {
        let store = MemoryStore::new();
        store.set("k", "not-a-number").await.unwrap();
        assert!(matches!(
            store.increment("k").await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn admission_enforces_stock_and_dedup() {
        let store = MemoryStore::new();
        store.set("seckill:stock:7", "1").await.unwrap();
        store.create_group("stream:orders", "g1").await.unwrap();

        assert_eq!(
            store.admit(&command(1, 42)).await.unwrap(),
            AdmissionCode::Admitted
        );
        // Same user again: duplicate, stock untouched.
        assert_eq!(
            store.admit(&command(2, 42)).await.unwrap(),
            AdmissionCode::Duplicate
        );
        // Different user: stock is gone.
        assert_eq!(
            store.admit(&command(3, 43)).await.unwrap(),
            AdmissionCode::OutOfStock
        );
        assert_eq!(
            store.get("seckill:stock:7").await.unwrap().as_deref(),
            Some("0")
        );

        // Exactly one admitted order reached the stream.
        let message = store
            .read_new("stream:orders", "g1", "c1", Duration::from_millis(10))
            .await
            .unwrap()
            .expect("one message");
        assert_eq!(message.field("id"), Some("1"));
        assert!(
            store
                .read_new("stream:orders", "g1", "c1", Duration::from_millis(10))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_stock_key_reads_as_sold_out() {
        let store = MemoryStore::new();
        assert_eq!(
            store.admit(&command(1, 42)).await.unwrap(),
            AdmissionCode::OutOfStock
        );
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.create_group("s", "g").await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.read_new("s", "g", "c", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .stream_append("s", vec![("id".into(), "9".into())])
            .await
            .unwrap();

        let message = reader.await.unwrap().unwrap().expect("woken by append");
        assert_eq!(message.field("id"), Some("9"));
    }

    #[tokio::test]
    async fn unacknowledged_deliveries_replay_from_pending() {
        let store = MemoryStore::new();
        store.create_group("s", "g").await.unwrap();
        store
            .stream_append("s", vec![("id".into(), "1".into())])
            .await
            .unwrap();

        let first = store
            .read_new("s", "g", "c", Duration::from_millis(10))
            .await
            .unwrap()
            .expect("delivered");

        // Not acknowledged: the pending list re-presents it.
        let replay = store.read_pending("s", "g", "c").await.unwrap().expect("pending");
        assert_eq!(replay.id, first.id);

        store.ack("s", "g", first.id).await.unwrap();
        assert!(store.read_pending("s", "g", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reading_an_unknown_group_is_an_error() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read_new("s", "g", "c", Duration::ZERO).await,
            Err(StoreError::UnknownGroup { .. })
        ));
    }
}
