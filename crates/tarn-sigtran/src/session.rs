//! Per-endpoint session pool
//!
//! One reusable protocol session per `host:port` endpoint. All bring-up
//! and delivery for an endpoint runs under that endpoint's lock, so a
//! session carries at most one outstanding delivery and two workers can
//! never re-establish the same endpoint concurrently.

use crate::config::EndpointConfig;
use crate::errors::SigtranError;
use crate::m3ua::M3uaEndpoint;
use crate::map::{self, DerivedImsiResolver, ImsiResolver};
use crate::sccp::{GlobalTitle, SccpAddress, SccpMessage};
use crate::sctp::{Connector, SctpAssociation, TcpConnector};
use crate::types::{ProtocolClass, SmRpDa, SmRpOa};
use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Result of an acknowledged submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// TP-MR used on the wire, for correlation
    pub message_reference: u8,
}

/// Pool tuning knobs
#[derive(Debug, Clone)]
pub struct SessionPoolConfig {
    /// Sessions idle beyond this are discarded outright
    pub max_session_age: Duration,
    /// Sessions idle beyond this are heartbeat-validated before reuse
    pub heartbeat_after: Duration,
    /// Bound on each ASPUP/ASPAC/BEAT exchange
    pub handshake_timeout: Duration,
}

impl Default for SessionPoolConfig {
    fn default() -> Self {
        Self {
            max_session_age: Duration::from_secs(300),
            heartbeat_after: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

struct PooledSession {
    m3ua: M3uaEndpoint,
    local_addr: SccpAddress,
    remote_addr: SccpAddress,
    last_used: parking_lot::Mutex<Instant>,
}

impl PooledSession {
    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

/// Shared pool of operator endpoint sessions
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ImsiResolver>,
    config: SessionPoolConfig,
    sessions: DashMap<String, Arc<PooledSession>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionPool {
    pub fn new(
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn ImsiResolver>,
        config: SessionPoolConfig,
    ) -> Self {
        Self {
            connector,
            resolver,
            config,
            sessions: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// TCP transport, derived IMSI lookup, default tuning
    pub fn with_tcp_defaults() -> Self {
        Self::new(
            Arc::new(TcpConnector::default()),
            Arc::new(DerivedImsiResolver::default()),
            SessionPoolConfig::default(),
        )
    }

    /// Deliver one SMS-SUBMIT to the operator endpoint.
    ///
    /// Establishes or revalidates the endpoint session, then encodes and
    /// submits the message and blocks for the acknowledgment. Failures
    /// come back as `Connection`, `Heartbeat`, or `Delivery` errors; an
    /// unacknowledged submission does not invalidate the session.
    #[instrument(skip(self, content), fields(endpoint = %endpoint.endpoint_key()))]
    pub async fn deliver(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
        endpoint: &EndpointConfig,
    ) -> Result<DeliveryReceipt, SigtranError> {
        endpoint.validate()?;

        let key = endpoint.endpoint_key();
        let lock = self.endpoint_lock(&key);
        let _guard = lock.lock().await;

        let session = self.validated_session(&key, endpoint).await?;
        let receipt = self.submit(&session, sender, recipient, content, endpoint).await?;
        session.touch();

        Ok(receipt)
    }

    /// Drop a cached session; the next delivery re-establishes it
    pub fn invalidate(&self, endpoint_key: &str) {
        if self.sessions.remove(endpoint_key).is_some() {
            debug!(endpoint = endpoint_key, "Session invalidated");
        }
    }

    /// Number of currently cached sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn endpoint_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Return a usable session for the endpoint, reusing the cached one
    /// when it passes the staleness and heartbeat checks.
    async fn validated_session(
        &self,
        key: &str,
        endpoint: &EndpointConfig,
    ) -> Result<Arc<PooledSession>, SigtranError> {
        if let Some(existing) = self.sessions.get(key).map(|e| e.value().clone()) {
            let idle = existing.idle_for();

            if idle > self.config.max_session_age {
                debug!(endpoint = key, idle_secs = idle.as_secs(), "Session exceeded max age");
                self.sessions.remove(key);
            } else if idle <= self.config.heartbeat_after {
                return Ok(existing);
            } else {
                match existing.m3ua.beat().await {
                    Ok(()) => {
                        debug!(endpoint = key, "Cached session validated");
                        return Ok(existing);
                    }
                    Err(e) => {
                        let failure = SigtranError::Heartbeat(e.to_string());
                        warn!(endpoint = key, error = %failure, "Discarding cached session");
                        counter!("sigtran_heartbeat_failures_total").increment(1);
                        self.sessions.remove(key);
                    }
                }
            }
        }

        let session = Arc::new(self.establish(key, endpoint).await?);
        self.sessions.insert(key.to_string(), session.clone());
        Ok(session)
    }

    /// Fresh bring-up: connect, ASPUP/ASPUP_ACK, ASPAC/ASPAC_ACK, then
    /// attach the SCCP addressing context.
    async fn establish(
        &self,
        key: &str,
        endpoint: &EndpointConfig,
    ) -> Result<PooledSession, SigtranError> {
        info!(endpoint = key, "Establishing operator session");

        let transport = self
            .connector
            .connect(&endpoint.host, endpoint.port)
            .await
            .map_err(|e| SigtranError::Connection(format!("association to {} failed: {}", key, e)))?;

        let sctp = Arc::new(SctpAssociation::new(transport, key.to_string()));
        let m3ua = M3uaEndpoint::new(sctp, endpoint.m3ua.clone(), self.config.handshake_timeout);

        m3ua.asp_up()
            .await
            .map_err(|e| SigtranError::Connection(format!("ASPUP exchange failed: {}", e)))?;
        m3ua.asp_active()
            .await
            .map_err(|e| SigtranError::Connection(format!("ASPAC exchange failed: {}", e)))?;

        let local_addr = SccpAddress::from_gt(
            GlobalTitle::e164(&endpoint.sccp.local_gt),
            Some(endpoint.sccp.local_ssn),
        );
        let remote_addr = SccpAddress::from_gt(
            GlobalTitle::e164(&endpoint.sccp.remote_gt),
            Some(endpoint.sccp.remote_ssn),
        );

        counter!("sigtran_sessions_established_total").increment(1);
        info!(endpoint = key, "Operator session established");

        Ok(PooledSession {
            m3ua,
            local_addr,
            remote_addr,
            last_used: parking_lot::Mutex::new(Instant::now()),
        })
    }

    /// Encode and submit one message over an established session
    async fn submit(
        &self,
        session: &PooledSession,
        sender: &str,
        recipient: &str,
        content: &str,
        endpoint: &EndpointConfig,
    ) -> Result<DeliveryReceipt, SigtranError> {
        let (dcs, udl, user_data) = map::encode_user_data(content)?;
        let message_reference: u8 = rand::random();

        let tpdu = map::encode_submit_tpdu(
            message_reference,
            recipient,
            dcs,
            endpoint.map.validity_period,
            udl,
            &user_data,
        );

        let imsi = self.resolver.resolve(recipient).await?;
        let param = map::encode_mo_forward_sm(
            &SmRpDa::Imsi(imsi),
            &SmRpOa::Msisdn(sender.to_string()),
            &tpdu,
        );

        let udt = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: session.remote_addr.clone(),
            calling_party: session.local_addr.clone(),
            data: Bytes::from(param),
        };

        session
            .m3ua
            .send_data(&udt.encode())
            .await
            .map_err(|e| SigtranError::Delivery(format!("submit write failed: {}", e)))?;

        let ack_timeout = Duration::from_millis(endpoint.map.operation_timeout_ms);
        let protocol_data = timeout(ack_timeout, session.m3ua.recv_data())
            .await
            .map_err(|_| SigtranError::Delivery("acknowledgment timeout".to_string()))?
            .map_err(|e| SigtranError::Delivery(format!("acknowledgment read failed: {}", e)))?;

        let reply = SccpMessage::decode(&protocol_data.data)
            .map_err(|e| SigtranError::Delivery(format!("malformed acknowledgment: {}", e)))?;

        map::decode_forward_sm_ack(reply.payload())
            .map_err(|e| SigtranError::Delivery(format!("submission rejected: {}", e)))?;

        debug!(message_reference, "SMS-SUBMIT acknowledged");
        Ok(DeliveryReceipt { message_reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{PeerBehavior, ScriptedConnector};

    fn endpoint(timeout_ms: u64) -> EndpointConfig {
        let mut cfg = EndpointConfig::new("192.0.2.10", 2905);
        cfg.sccp.local_gt = "15550000000".into();
        cfg.sccp.remote_gt = "19005550000".into();
        cfg.map.service_centre_address = "15550000000".into();
        cfg.map.operation_timeout_ms = timeout_ms;
        cfg
    }

    fn pool(connector: Arc<ScriptedConnector>, config: SessionPoolConfig) -> SessionPool {
        SessionPool::new(
            connector,
            Arc::new(DerivedImsiResolver::default()),
            config,
        )
    }

    #[tokio::test]
    async fn deliver_establishes_then_reuses_session() {
        let connector = Arc::new(ScriptedConnector::compliant());
        let pool = pool(connector.clone(), SessionPoolConfig::default());
        let ep = endpoint(1000);

        let first = pool.deliver("+15550001111", "+19005551234", "hello", &ep).await;
        let second = pool.deliver("+15550001111", "+19005555678", "again", &ep).await;

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(pool.session_count(), 1);
    }

    #[tokio::test]
    async fn handshake_rejection_is_a_connection_error() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            PeerBehavior::RejectAspUp,
            PeerBehavior::RejectAspUp,
        ]));
        let pool = pool(connector.clone(), SessionPoolConfig::default());
        let ep = endpoint(1000);

        for _ in 0..2 {
            match pool.deliver("+15550001111", "+19005551234", "hi", &ep).await {
                Err(SigtranError::Connection(msg)) => assert!(msg.contains("ASPUP")),
                other => panic!("expected connection error, got {:?}", other.map(|r| r.message_reference)),
            }
        }

        // nothing was cached, each attempt re-dialed
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(pool.session_count(), 0);
    }

    #[tokio::test]
    async fn refused_association_is_a_connection_error() {
        let connector = Arc::new(ScriptedConnector::new(vec![PeerBehavior::RefuseConnection]));
        let pool = pool(connector.clone(), SessionPoolConfig::default());

        match pool.deliver("+15550001111", "+19005551234", "hi", &endpoint(1000)).await {
            Err(SigtranError::Connection(_)) => {}
            other => panic!("expected connection error, got {:?}", other.map(|r| r.message_reference)),
        }
    }

    #[tokio::test]
    async fn ack_timeout_is_delivery_failure_and_keeps_session() {
        let connector = Arc::new(ScriptedConnector::new(vec![PeerBehavior::SilentOnSubmit]));
        let pool = pool(connector.clone(), SessionPoolConfig::default());
        let ep = endpoint(50);

        match pool.deliver("+15550001111", "+19005551234", "hi", &ep).await {
            Err(SigtranError::Delivery(msg)) => assert!(msg.contains("timeout")),
            other => panic!("expected delivery error, got {:?}", other.map(|r| r.message_reference)),
        }

        // a second attempt reuses the cached session rather than redialing
        let _ = pool.deliver("+15550001111", "+19005551234", "hi", &ep).await;
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(pool.session_count(), 1);
    }

    #[tokio::test]
    async fn rejected_submission_surfaces_operator_error() {
        let connector = Arc::new(ScriptedConnector::new(vec![PeerBehavior::RejectSubmit]));
        let pool = pool(connector.clone(), SessionPoolConfig::default());

        match pool.deliver("+15550001111", "+19005551234", "hi", &endpoint(1000)).await {
            Err(SigtranError::Delivery(msg)) => assert!(msg.contains("rejected")),
            other => panic!("expected delivery error, got {:?}", other.map(|r| r.message_reference)),
        }
    }

    #[tokio::test]
    async fn stale_session_triggers_fresh_bring_up() {
        let connector = Arc::new(ScriptedConnector::compliant());
        let config = SessionPoolConfig {
            max_session_age: Duration::ZERO,
            ..Default::default()
        };
        let pool = pool(connector.clone(), config);
        let ep = endpoint(1000);

        assert!(pool.deliver("+15550001111", "+19005551234", "a", &ep).await.is_ok());
        assert!(pool.deliver("+15550001111", "+19005551234", "b", &ep).await.is_ok());

        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn heartbeat_failure_forces_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            PeerBehavior::SilentOnBeat,
            PeerBehavior::Compliant,
        ]));
        let config = SessionPoolConfig {
            heartbeat_after: Duration::ZERO,
            handshake_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let pool = pool(connector.clone(), config);
        let ep = endpoint(1000);

        // first delivery brings the session up without a heartbeat
        assert!(pool.deliver("+15550001111", "+19005551234", "a", &ep).await.is_ok());

        // second delivery heartbeats the idle session, times out, and
        // re-establishes against the compliant peer
        assert!(pool.deliver("+15550001111", "+19005551234", "b", &ep).await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn healthy_idle_session_passes_heartbeat() {
        let connector = Arc::new(ScriptedConnector::compliant());
        let config = SessionPoolConfig {
            heartbeat_after: Duration::ZERO,
            ..Default::default()
        };
        let pool = pool(connector.clone(), config);
        let ep = endpoint(1000);

        assert!(pool.deliver("+15550001111", "+19005551234", "a", &ep).await.is_ok());
        assert!(pool.deliver("+15550001111", "+19005551234", "b", &ep).await.is_ok());

        // heartbeat succeeded, so no reconnect happened
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn invalid_endpoint_config_fails_before_dialing() {
        let connector = Arc::new(ScriptedConnector::compliant());
        let pool = pool(connector.clone(), SessionPoolConfig::default());

        let mut ep = endpoint(1000);
        ep.sccp.remote_gt.clear();

        match pool.deliver("+15550001111", "+19005551234", "hi", &ep).await {
            Err(SigtranError::Config(_)) => {}
            other => panic!("expected config error, got {:?}", other.map(|r| r.message_reference)),
        }
        assert_eq!(connector.connect_count(), 0);
    }
}
