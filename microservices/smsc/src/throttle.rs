//! Per-operator rate/capacity gate
//!
//! Admission is a pure function of recent send history: the count of an
//! operator's messages in the trailing one-second window, cached for at
//! most one second to bound query load. Accuracy is advisory, not a
//! hard SLA.

use chrono::{Duration as TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::TtlCache;
use crate::error::Result;
use crate::store::{GatewayStore, Operator};

pub struct CapacityGate {
    store: Arc<dyn GatewayStore>,
    counts: TtlCache<i64, u32>,
}

impl CapacityGate {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self {
            store,
            counts: TtlCache::new(Duration::from_secs(1)),
        }
    }

    /// Messages attributed to the operator in the trailing second,
    /// at most ~1s stale.
    pub async fn current_tps(&self, operator_id: i64) -> Result<u32> {
        if let Some(count) = self.counts.get(&operator_id) {
            return Ok(count);
        }

        let since = Utc::now() - TimeDelta::seconds(1);
        let count = self.store.recent_message_count(operator_id, since).await?;
        self.counts.insert(operator_id, count);
        Ok(count)
    }

    pub async fn has_capacity(&self, operator: &Operator) -> Result<bool> {
        let current = self.current_tps(operator.id).await?;
        let under = current < operator.max_tps;
        if !under {
            debug!(
                operator = %operator.name,
                current_tps = current,
                max_tps = operator.max_tps,
                "Operator at capacity"
            );
        }
        Ok(under)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use tarn_core::{MessageId, MessageStatus, OperatorStatus, Priority, QueueEntryStatus};
    use tarn_sigtran::EndpointConfig;

    fn operator(id: i64, max_tps: u32) -> Operator {
        Operator {
            id,
            name: format!("op-{}", id),
            country_code: "1".into(),
            status: OperatorStatus::Active,
            priority: 1,
            max_tps,
            connection: EndpointConfig::new("192.0.2.1", 2905),
        }
    }

    async fn seed_message(store: &MemoryStore, operator_id: i64) {
        let id = MessageId::generate();
        let now = Utc::now();
        store
            .create_message_with_queue(
                &crate::store::Message {
                    message_id: id.clone(),
                    sender: "+1555".into(),
                    recipient: "+1900".into(),
                    content: "x".into(),
                    status: MessageStatus::Pending,
                    operator_id,
                    error_message: None,
                    created_at: now,
                    updated_at: now,
                },
                &crate::store::QueueEntry {
                    message_id: id,
                    operator_id,
                    priority: Priority::default(),
                    scheduled_at: now,
                    status: QueueEntryStatus::Pending,
                    lease_expires_at: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn saturated_operator_has_no_capacity() {
        let store = Arc::new(MemoryStore::new());
        let gate = CapacityGate::new(store.clone());

        seed_message(&store, 1).await;
        seed_message(&store, 1).await;

        assert!(!gate.has_capacity(&operator(1, 2)).await.unwrap());
        assert_eq!(gate.current_tps(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn idle_operator_has_capacity() {
        let store = Arc::new(MemoryStore::new());
        let gate = CapacityGate::new(store.clone());
        assert!(gate.has_capacity(&operator(1, 1)).await.unwrap());
    }

    #[tokio::test]
    async fn counts_are_cached_within_the_window() {
        let store = Arc::new(MemoryStore::new());
        let gate = CapacityGate::new(store.clone());

        assert_eq!(gate.current_tps(1).await.unwrap(), 0);
        seed_message(&store, 1).await;
        // still the cached zero; the gate tolerates ~1s of staleness
        assert_eq!(gate.current_tps(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_tps_ceiling_always_saturated() {
        let store = Arc::new(MemoryStore::new());
        let gate = CapacityGate::new(store.clone());
        assert!(!gate.has_capacity(&operator(1, 0)).await.unwrap());
    }
}
