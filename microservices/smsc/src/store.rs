//! Persistence collaborator
//!
//! Durable storage for messages, operators, routes, and the delivery
//! queue, behind a trait so the service runs against PostgreSQL in
//! production and an in-memory store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tarn_core::{MessageId, MessageStatus, OperatorStatus, Priority, QueueEntryStatus};
use tarn_sigtran::EndpointConfig;

use crate::error::{Result, SmscError};

/// A message record; created exactly once per send attempt and never
/// deleted. Cancellation and failure are status transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub status: MessageStatus,
    pub operator_id: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A carrier route endpoint; administered externally, read by the core
/// as the unit of routing and capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub name: String,
    pub country_code: String,
    pub status: OperatorStatus,
    pub priority: i32,
    pub max_tps: u32,
    pub connection: EndpointConfig,
}

/// Prefix-to-operator binding with selection order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    pub operator_id: i64,
    pub priority: i32,
    pub cost: Decimal,
}

/// Durable handoff record between the accept path and the delivery
/// workers. Claims take a lease so a crashed worker's entry becomes
/// reclaimable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub message_id: MessageId,
    pub operator_id: i64,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    pub status: QueueEntryStatus,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Atomically create the message and its queue entry. Either both
    /// rows are written or neither is.
    async fn create_message_with_queue(&self, message: &Message, entry: &QueueEntry)
        -> Result<()>;

    async fn message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Compare-and-set status transition. Returns Ok(true) when the
    /// current status was in `from` and the update applied.
    async fn transition_message(
        &self,
        id: &MessageId,
        from: &[MessageStatus],
        to: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool>;

    /// Atomically delete the queue entry and mark the message cancelled,
    /// only while its status is still cancellable. Returns false for an
    /// unknown id or a message past the cancellable window.
    async fn cancel_message(&self, id: &MessageId) -> Result<bool>;

    /// Claim the next due queue entry (priority desc, scheduled_at asc),
    /// marking it in-flight with a lease.
    async fn claim_next_queued(
        &self,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> Result<Option<QueueEntry>>;

    /// Final delivery resolution: CAS the message status and delete the
    /// queue entry on success.
    async fn resolve_delivery(
        &self,
        id: &MessageId,
        from: &[MessageStatus],
        to: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool>;

    /// Return expired in-flight claims to pending and their messages
    /// from sending back to queued. Returns the requeued count.
    async fn requeue_expired_leases(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn operator(&self, id: i64) -> Result<Option<Operator>>;

    /// Insert or update an operator; returns its id.
    async fn upsert_operator(&self, operator: &Operator) -> Result<i64>;

    async fn routes_for_prefix(&self, prefix: &str) -> Result<Vec<Route>>;

    /// Distinct configured prefixes
    async fn route_prefixes(&self) -> Result<Vec<String>>;

    /// Replace the whole routing table
    async fn replace_routes(&self, routes: &[Route]) -> Result<()>;

    /// Messages created for the operator since `since`; the TPS window
    async fn recent_message_count(&self, operator_id: i64, since: DateTime<Utc>) -> Result<u32>;

    async fn is_healthy(&self) -> bool;
}

/// In-memory store. One lock over the whole state gives the same
/// both-or-nothing semantics the SQL transactions provide.
#[derive(Default)]
pub struct MemoryStore {
    inner: parking_lot::Mutex<MemoryInner>,
    // test hook for exercising the rollback contract
    fail_next_queue_insert: AtomicBool,
}

#[derive(Default)]
struct MemoryInner {
    messages: HashMap<String, Message>,
    queue: HashMap<String, QueueEntry>,
    operators: HashMap<i64, Operator>,
    routes: Vec<Route>,
    next_operator_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create_message_with_queue` fail between the
    /// message insert and the queue insert.
    pub fn fail_next_queue_insert(&self) {
        self.fail_next_queue_insert.store(true, Ordering::SeqCst);
    }

    /// Queue entry lookup, for assertions
    pub fn queue_entry(&self, id: &MessageId) -> Option<QueueEntry> {
        self.inner.lock().queue.get(id.as_str()).cloned()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }
}

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn create_message_with_queue(
        &self,
        message: &Message,
        entry: &QueueEntry,
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        if inner.messages.contains_key(message.message_id.as_str()) {
            return Err(SmscError::Transaction(format!(
                "duplicate message_id {}",
                message.message_id
            )));
        }

        inner
            .messages
            .insert(message.message_id.as_str().to_string(), message.clone());

        if self.fail_next_queue_insert.swap(false, Ordering::SeqCst) {
            // roll back the message insert before surfacing the failure
            inner.messages.remove(message.message_id.as_str());
            return Err(SmscError::Transaction("queue insert rejected".to_string()));
        }

        inner
            .queue
            .insert(entry.message_id.as_str().to_string(), entry.clone());
        Ok(())
    }

    async fn message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.inner.lock().messages.get(id.as_str()).cloned())
    }

    async fn transition_message(
        &self,
        id: &MessageId,
        from: &[MessageStatus],
        to: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(message) = inner.messages.get_mut(id.as_str()) else {
            return Ok(false);
        };

        if !from.contains(&message.status) {
            return Ok(false);
        }

        message.status = to;
        if let Some(error) = error {
            message.error_message = Some(error.to_string());
        }
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel_message(&self, id: &MessageId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(message) = inner.messages.get_mut(id.as_str()) else {
            return Ok(false);
        };

        if !message.status.is_cancellable() {
            return Ok(false);
        }

        message.status = MessageStatus::Cancelled;
        message.updated_at = Utc::now();
        inner.queue.remove(id.as_str());
        Ok(true)
    }

    async fn claim_next_queued(
        &self,
        now: DateTime<Utc>,
        lease: TimeDelta,
    ) -> Result<Option<QueueEntry>> {
        let mut inner = self.inner.lock();

        let key = inner
            .queue
            .values()
            .filter(|e| e.status == QueueEntryStatus::Pending && e.scheduled_at <= now)
            .min_by_key(|e| (Reverse(e.priority), e.scheduled_at))
            .map(|e| e.message_id.as_str().to_string());

        let Some(key) = key else {
            return Ok(None);
        };

        let entry = inner.queue.get_mut(&key).expect("claimed entry exists");
        entry.status = QueueEntryStatus::InFlight;
        entry.lease_expires_at = Some(now + lease);
        Ok(Some(entry.clone()))
    }

    async fn resolve_delivery(
        &self,
        id: &MessageId,
        from: &[MessageStatus],
        to: MessageStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(message) = inner.messages.get_mut(id.as_str()) else {
            return Ok(false);
        };

        if !from.contains(&message.status) {
            return Ok(false);
        }

        message.status = to;
        if let Some(error) = error {
            message.error_message = Some(error.to_string());
        }
        message.updated_at = Utc::now();
        inner.queue.remove(id.as_str());
        Ok(true)
    }

    async fn requeue_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock();
        let mut requeued = 0u64;

        let expired: Vec<String> = inner
            .queue
            .values()
            .filter(|e| {
                e.status == QueueEntryStatus::InFlight
                    && e.lease_expires_at.is_some_and(|at| at < now)
            })
            .map(|e| e.message_id.as_str().to_string())
            .collect();

        for key in expired {
            if let Some(entry) = inner.queue.get_mut(&key) {
                entry.status = QueueEntryStatus::Pending;
                entry.lease_expires_at = None;
            }
            if let Some(message) = inner.messages.get_mut(&key) {
                if message.status == MessageStatus::Sending {
                    message.status = MessageStatus::Queued;
                    message.updated_at = now;
                }
            }
            requeued += 1;
        }

        Ok(requeued)
    }

    async fn operator(&self, id: i64) -> Result<Option<Operator>> {
        Ok(self.inner.lock().operators.get(&id).cloned())
    }

    async fn upsert_operator(&self, operator: &Operator) -> Result<i64> {
        let mut inner = self.inner.lock();
        let id = if operator.id > 0 {
            operator.id
        } else {
            inner.next_operator_id += 1;
            inner.next_operator_id
        };
        let mut operator = operator.clone();
        operator.id = id;
        inner.operators.insert(id, operator);
        Ok(id)
    }

    async fn routes_for_prefix(&self, prefix: &str) -> Result<Vec<Route>> {
        Ok(self
            .inner
            .lock()
            .routes
            .iter()
            .filter(|r| r.prefix == prefix)
            .cloned()
            .collect())
    }

    async fn route_prefixes(&self) -> Result<Vec<String>> {
        let distinct: BTreeSet<String> = self
            .inner
            .lock()
            .routes
            .iter()
            .map(|r| r.prefix.clone())
            .collect();
        Ok(distinct.into_iter().collect())
    }

    async fn replace_routes(&self, routes: &[Route]) -> Result<()> {
        self.inner.lock().routes = routes.to_vec();
        Ok(())
    }

    async fn recent_message_count(&self, operator_id: i64, since: DateTime<Utc>) -> Result<u32> {
        Ok(self
            .inner
            .lock()
            .messages
            .values()
            .filter(|m| m.operator_id == operator_id && m.created_at >= since)
            .count() as u32)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &MessageId) -> Message {
        let now = Utc::now();
        Message {
            message_id: id.clone(),
            sender: "+15550001111".into(),
            recipient: "+19005551234".into(),
            content: "hello".into(),
            status: MessageStatus::Pending,
            operator_id: 1,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn entry(id: &MessageId, priority: u8, scheduled_at: DateTime<Utc>) -> QueueEntry {
        QueueEntry {
            message_id: id.clone(),
            operator_id: 1,
            priority: Priority::new(priority),
            scheduled_at,
            status: QueueEntryStatus::Pending,
            lease_expires_at: None,
        }
    }

    #[tokio::test]
    async fn rejected_queue_insert_rolls_back_the_message() {
        let store = MemoryStore::new();
        let id = MessageId::generate();
        store.fail_next_queue_insert();

        let err = store
            .create_message_with_queue(&message(&id), &entry(&id, 3, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, SmscError::Transaction(_)));

        // full rollback: the message must not be visible
        assert!(store.message(&id).await.unwrap().is_none());
        assert_eq!(store.queue_len(), 0);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let store = MemoryStore::new();
        let id = MessageId::generate();
        let now = Utc::now();

        store
            .create_message_with_queue(&message(&id), &entry(&id, 3, now))
            .await
            .unwrap();
        assert!(store
            .create_message_with_queue(&message(&id), &entry(&id, 3, now))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_schedule() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let low = MessageId::generate();
        let high_late = MessageId::generate();
        let high_early = MessageId::generate();

        for (id, prio, offset) in [
            (&low, 1, 0),
            (&high_late, 5, 2),
            (&high_early, 5, 1),
        ] {
            store
                .create_message_with_queue(
                    &message(id),
                    &entry(id, prio, now - TimeDelta::seconds(10 - offset)),
                )
                .await
                .unwrap();
        }

        let lease = TimeDelta::seconds(60);
        let first = store.claim_next_queued(now, lease).await.unwrap().unwrap();
        assert_eq!(first.message_id, high_early);
        let second = store.claim_next_queued(now, lease).await.unwrap().unwrap();
        assert_eq!(second.message_id, high_late);
        let third = store.claim_next_queued(now, lease).await.unwrap().unwrap();
        assert_eq!(third.message_id, low);
        assert!(store.claim_next_queued(now, lease).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn future_scheduled_entries_are_not_claimed() {
        let store = MemoryStore::new();
        let id = MessageId::generate();
        let now = Utc::now();

        store
            .create_message_with_queue(&message(&id), &entry(&id, 3, now + TimeDelta::seconds(60)))
            .await
            .unwrap();

        assert!(store
            .claim_next_queued(now, TimeDelta::seconds(60))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn expired_lease_is_requeued_and_message_restored() {
        let store = MemoryStore::new();
        let id = MessageId::generate();
        let now = Utc::now();

        store
            .create_message_with_queue(&message(&id), &entry(&id, 3, now))
            .await
            .unwrap();
        store
            .transition_message(&id, &[MessageStatus::Pending], MessageStatus::Queued, None)
            .await
            .unwrap();

        // worker claims and starts sending, then crashes
        store
            .claim_next_queued(now, TimeDelta::seconds(30))
            .await
            .unwrap()
            .unwrap();
        store
            .transition_message(&id, &[MessageStatus::Queued], MessageStatus::Sending, None)
            .await
            .unwrap();

        let later = now + TimeDelta::seconds(31);
        assert_eq!(store.requeue_expired_leases(later).await.unwrap(), 1);

        let msg = store.message(&id).await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Queued);
        let entry = store.queue_entry(&id).unwrap();
        assert_eq!(entry.status, QueueEntryStatus::Pending);

        // and it is claimable again
        assert!(store
            .claim_next_queued(later, TimeDelta::seconds(30))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn resolve_delivery_removes_entry_and_is_cas_guarded() {
        let store = MemoryStore::new();
        let id = MessageId::generate();
        let now = Utc::now();

        store
            .create_message_with_queue(&message(&id), &entry(&id, 3, now))
            .await
            .unwrap();

        // wrong source state: no-op
        assert!(!store
            .resolve_delivery(&id, &[MessageStatus::Sending], MessageStatus::Sent, None)
            .await
            .unwrap());

        for (from, to) in [
            (MessageStatus::Pending, MessageStatus::Queued),
            (MessageStatus::Queued, MessageStatus::Sending),
        ] {
            store.transition_message(&id, &[from], to, None).await.unwrap();
        }

        assert!(store
            .resolve_delivery(&id, &[MessageStatus::Sending], MessageStatus::Sent, None)
            .await
            .unwrap());
        assert_eq!(store.queue_len(), 0);
        assert_eq!(
            store.message(&id).await.unwrap().unwrap().status,
            MessageStatus::Sent
        );
    }
}
