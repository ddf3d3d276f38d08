//! Message lifecycle & queue coordination
//!
//! The accept path routes, persists message + queue entry in one
//! transaction, and hands off to the delivery lane. Delivery runs on a
//! bounded worker pool that claims leased queue entries, re-validates
//! the operator, and resolves each message to sent or failed. A send
//! never waits for delivery.

use chrono::{Duration as TimeDelta, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tarn_core::{MessageId, MessageStatus, Priority, QueueEntryStatus};
use tarn_sigtran::SessionPool;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{Result, SmscError};
use crate::routing::RoutingEngine;
use crate::store::{GatewayStore, Message, QueueEntry};

/// Accept-path request shape
#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub sender: String,
    pub recipient: String,
    pub content: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// Per-item result of a bulk send
#[derive(Debug, Serialize)]
pub struct BulkSendOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    pub recipient: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Synchronous accept path: send, bulk, status, cancel
pub struct MessageService {
    store: Arc<dyn GatewayStore>,
    routing: Arc<RoutingEngine>,
    delivery: Arc<DeliveryPool>,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        routing: Arc<RoutingEngine>,
        delivery: Arc<DeliveryPool>,
    ) -> Self {
        Self {
            store,
            routing,
            delivery,
        }
    }

    /// Accept one message.
    ///
    /// Routing failures abort before anything is persisted. The message
    /// and its queue entry are created atomically, then the message is
    /// moved to queued and the delivery lane woken; delivery completion
    /// is never awaited here.
    #[instrument(skip(self, request), fields(recipient = %request.recipient))]
    pub async fn send(&self, request: SendRequest) -> Result<Message> {
        let operator = self.routing.find_route(&request.recipient).await?;

        let message_id = MessageId::generate();
        let now = Utc::now();
        let mut message = Message {
            message_id: message_id.clone(),
            sender: request.sender,
            recipient: request.recipient,
            content: request.content,
            status: MessageStatus::Pending,
            operator_id: operator.id,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        let entry = QueueEntry {
            message_id: message_id.clone(),
            operator_id: operator.id,
            priority: request.priority,
            scheduled_at: now,
            status: QueueEntryStatus::Pending,
            lease_expires_at: None,
        };

        self.store.create_message_with_queue(&message, &entry).await?;
        counter!("smsc_messages_accepted_total").increment(1);

        match self.hand_off(&message_id).await {
            Ok(()) => {
                message.status = MessageStatus::Queued;
                info!(message_id = %message_id, operator = %operator.name, "Message queued");
            }
            Err(e) => {
                // never leave a message in queued with no worker owning it
                warn!(message_id = %message_id, error = %e, "Delivery handoff failed");
                let _ = self
                    .store
                    .transition_message(
                        &message_id,
                        &[MessageStatus::Pending, MessageStatus::Queued],
                        MessageStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await;
            }
        }

        Ok(message)
    }

    /// Accept a batch; items succeed or fail independently and order is
    /// preserved. Batch size limits belong to the boundary layer.
    pub async fn send_bulk(&self, items: Vec<SendRequest>) -> Vec<BulkSendOutcome> {
        let mut results = Vec::with_capacity(items.len());

        for item in items {
            let recipient = item.recipient.clone();
            match self.send(item).await {
                Ok(message) => results.push(BulkSendOutcome {
                    message_id: Some(message.message_id),
                    recipient,
                    status: message.status.to_string(),
                    error: None,
                }),
                Err(e) => results.push(BulkSendOutcome {
                    message_id: None,
                    recipient,
                    status: "failed".to_string(),
                    error: Some(e.to_string()),
                }),
            }
        }

        results
    }

    pub async fn status(&self, id: &MessageId) -> Result<Option<Message>> {
        self.store.message(id).await
    }

    /// Cancel a message still in its cancellable window. Racing the
    /// delivery worker is allowed; the loser observes `false`.
    pub async fn cancel(&self, id: &MessageId) -> Result<bool> {
        let cancelled = self.store.cancel_message(id).await?;
        if cancelled {
            counter!("smsc_messages_cancelled_total").increment(1);
            info!(message_id = %id, "Message cancelled");
        }
        Ok(cancelled)
    }

    /// Delivery-report confirmation: sent -> delivered
    pub async fn confirm_delivery(&self, id: &MessageId) -> Result<bool> {
        self.store
            .transition_message(id, &[MessageStatus::Sent], MessageStatus::Delivered, None)
            .await
    }

    async fn hand_off(&self, id: &MessageId) -> Result<()> {
        let moved = self
            .store
            .transition_message(id, &[MessageStatus::Pending], MessageStatus::Queued, None)
            .await?;
        if !moved {
            return Err(SmscError::Dispatch("message left the pending state".into()));
        }
        self.delivery.wake();
        Ok(())
    }
}

/// Delivery pool tuning
#[derive(Debug, Clone)]
pub struct DeliveryPoolConfig {
    pub workers: usize,
    /// Idle workers re-poll the queue at this interval (scheduled and
    /// requeued entries have no wake signal)
    pub poll_interval: Duration,
    /// Claim lease; an entry whose worker dies becomes reclaimable
    /// after this long
    pub lease: Duration,
    pub janitor_interval: Duration,
}

impl Default for DeliveryPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(60),
            janitor_interval: Duration::from_secs(30),
        }
    }
}

/// Bounded worker pool consuming the durable queue (the "sms" lane)
pub struct DeliveryPool {
    store: Arc<dyn GatewayStore>,
    sessions: Arc<SessionPool>,
    config: DeliveryPoolConfig,
    notify: Notify,
    running: AtomicBool,
    started: AtomicBool,
}

impl DeliveryPool {
    pub fn new(
        store: Arc<dyn GatewayStore>,
        sessions: Arc<SessionPool>,
        config: DeliveryPoolConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sessions,
            config,
            notify: Notify::new(),
            running: AtomicBool::new(true),
            started: AtomicBool::new(false),
        })
    }

    /// Wake one idle worker; called after a successful handoff
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Spawn the workers and the lease janitor
    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(workers = self.config.workers, "Starting delivery pool");

        for worker in 0..self.config.workers {
            let pool = self.clone();
            tokio::spawn(pool.worker_loop(worker));
        }

        tokio::spawn(self.janitor_loop());
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "Delivery worker started");

        while self.running.load(Ordering::SeqCst) {
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker, error = %e, "Delivery worker error");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        debug!(worker, "Delivery worker stopped");
    }

    /// Claim and process one queue entry; Ok(false) when the queue is
    /// empty.
    async fn process_next(&self) -> Result<bool> {
        let lease = TimeDelta::milliseconds(self.config.lease.as_millis() as i64);
        let Some(entry) = self.store.claim_next_queued(Utc::now(), lease).await? else {
            return Ok(false);
        };

        let Some(message) = self.store.message(&entry.message_id).await? else {
            // cannot happen given the atomic create; surface loudly
            error!(message_id = %entry.message_id, "Queue entry without message");
            return Ok(true);
        };

        self.process(message).await;
        Ok(true)
    }

    async fn process(&self, message: Message) {
        let id = message.message_id.clone();

        // the operator may have changed since routing
        let operator = match self.store.operator(message.operator_id).await {
            Ok(Some(op)) if op.status.is_active() => op,
            Ok(_) => {
                self.fail(&id, "operator not available").await;
                return;
            }
            Err(e) => {
                self.fail(&id, &format!("operator lookup failed: {}", e)).await;
                return;
            }
        };

        // a racing cancel wins here and this claim becomes a no-op
        match self
            .store
            .transition_message(&id, &[MessageStatus::Queued], MessageStatus::Sending, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(message_id = %id, "Message no longer queued, dropping claim");
                return;
            }
            Err(e) => {
                error!(message_id = %id, error = %e, "Transition to sending failed");
                return;
            }
        }

        match self
            .sessions
            .deliver(&message.sender, &message.recipient, &message.content, &operator.connection)
            .await
        {
            Ok(receipt) => {
                let _ = self
                    .store
                    .resolve_delivery(&id, &[MessageStatus::Sending], MessageStatus::Sent, None)
                    .await;
                counter!("smsc_messages_sent_total").increment(1);
                info!(
                    message_id = %id,
                    operator = %operator.name,
                    message_reference = receipt.message_reference,
                    "Message sent"
                );
            }
            Err(e) => self.fail(&id, &e.to_string()).await,
        }
    }

    /// Record a delivery failure on the message and drop its entry
    async fn fail(&self, id: &MessageId, error: &str) {
        counter!("smsc_messages_failed_total").increment(1);
        warn!(message_id = %id, error, "Delivery failed");
        let _ = self
            .store
            .resolve_delivery(
                id,
                &[MessageStatus::Queued, MessageStatus::Sending],
                MessageStatus::Failed,
                Some(error),
            )
            .await;
    }

    /// Returns expired claims to the queue so a crashed worker's
    /// messages are retried instead of stranded in `sending`.
    async fn janitor_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(self.config.janitor_interval).await;

            match self.store.requeue_expired_leases(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => {
                    warn!(requeued = n, "Requeued expired delivery leases");
                    self.notify.notify_waiters();
                }
                Err(e) => error!(error = %e, "Lease requeue failed"),
            }
        }
    }
}
