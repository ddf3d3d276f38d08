//! SMSC Gateway Microservice
//!
//! Accepts outbound messages, selects a carrier route by destination
//! prefix, enforces per-operator throughput limits, persists message +
//! queue entry transactionally, and delivers over the SIGTRAN stack.
//!
//! Capabilities:
//! - Longest-prefix routing with priority/cost candidate ordering
//! - Per-operator TPS admission control
//! - Durable queue with leased claims and crash requeue
//! - MAP SMS-SUBMIT delivery with pooled operator sessions

pub mod api;
pub mod cache;
pub mod error;
pub mod lifecycle;
pub mod pg;
pub mod routing;
pub mod store;
pub mod throttle;

pub use error::{Result, SmscError};
pub use lifecycle::{BulkSendOutcome, DeliveryPool, DeliveryPoolConfig, MessageService, SendRequest};
pub use routing::RoutingEngine;
pub use store::{GatewayStore, MemoryStore, Message, Operator, QueueEntry, Route};
pub use throttle::CapacityGate;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tarn_core::{DependencyStatus, HealthStatus, ReadinessStatus, TarnError, TarnService};
use tarn_sigtran::SessionPool;
use tracing::{info, warn};

use crate::pg::PgStore;

#[derive(Debug, Clone)]
pub struct SmscConfig {
    pub http_bind_address: String,
    /// Unset means the in-memory store (development/test only)
    pub database_url: Option<String>,
    pub db_pool_size: usize,
    pub delivery_workers: usize,
    pub delivery_lease_secs: u64,
}

impl SmscConfig {
    pub fn from_env() -> Self {
        Self {
            http_bind_address: std::env::var("HTTP_BIND")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL").ok(),
            db_pool_size: std::env::var("DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            delivery_workers: std::env::var("DELIVERY_WORKERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4),
            delivery_lease_secs: std::env::var("DELIVERY_LEASE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
        }
    }
}

/// SMSC gateway service wiring
pub struct SmscService {
    config: SmscConfig,
    store: Arc<dyn GatewayStore>,
    service: Arc<MessageService>,
    routing: Arc<RoutingEngine>,
    gate: Arc<CapacityGate>,
    delivery: Arc<DeliveryPool>,
    start_time: std::time::Instant,
}

impl SmscService {
    pub async fn new() -> tarn_core::Result<Self> {
        let config = SmscConfig::from_env();

        let store: Arc<dyn GatewayStore> = match &config.database_url {
            Some(url) => {
                let pg = PgStore::connect(url, config.db_pool_size)
                    .await
                    .map_err(|e| TarnError::Database(e.to_string()))?;
                Arc::new(pg)
            }
            None => {
                warn!("DATABASE_URL not set, using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let gate = Arc::new(CapacityGate::new(store.clone()));
        let routing = Arc::new(RoutingEngine::new(store.clone(), gate.clone()));
        let sessions = Arc::new(SessionPool::with_tcp_defaults());
        let delivery = DeliveryPool::new(
            store.clone(),
            sessions,
            DeliveryPoolConfig {
                workers: config.delivery_workers,
                lease: Duration::from_secs(config.delivery_lease_secs),
                ..Default::default()
            },
        );
        let service = Arc::new(MessageService::new(
            store.clone(),
            routing.clone(),
            delivery.clone(),
        ));

        info!(
            workers = config.delivery_workers,
            lease_secs = config.delivery_lease_secs,
            "SMSC gateway initialized"
        );

        Ok(Self {
            config,
            store,
            service,
            routing,
            gate,
            delivery,
            start_time: std::time::Instant::now(),
        })
    }
}

#[async_trait]
impl TarnService for SmscService {
    fn service_id(&self) -> &'static str {
        "smsc"
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus {
            healthy: true,
            service_id: self.service_id().to_string(),
            version: self.version().to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    async fn ready(&self) -> ReadinessStatus {
        let store_available = self.store.is_healthy().await;
        ReadinessStatus {
            ready: store_available,
            dependencies: vec![DependencyStatus {
                name: "store".to_string(),
                available: store_available,
                latency_ms: None,
            }],
        }
    }

    async fn shutdown(&self) -> tarn_core::Result<()> {
        info!("Shutting down SMSC gateway");
        self.delivery.stop();
        Ok(())
    }

    async fn start(&self) -> tarn_core::Result<()> {
        self.delivery.clone().start();

        let app = api::router(api::AppState {
            service: self.service.clone(),
            routing: self.routing.clone(),
            store: self.store.clone(),
            gate: self.gate.clone(),
        });

        info!(addr = %self.config.http_bind_address, "Accept API listening");
        let listener = tokio::net::TcpListener::bind(&self.config.http_bind_address).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
