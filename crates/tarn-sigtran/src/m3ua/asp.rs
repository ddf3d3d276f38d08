//! M3UA ASP (Application Server Process) State Machine

use super::messages::{M3uaMessage, ProtocolData};
use super::codec;
use crate::config::M3uaParams;
use crate::errors::M3uaError;
use crate::sctp::SctpAssociation;
use bytes::Bytes;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

/// ASP state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspState {
    Down,
    Inactive,
    Active,
}

/// Client-side M3UA endpoint over one association
pub struct M3uaEndpoint {
    sctp: Arc<SctpAssociation>,
    state: RwLock<AspState>,
    params: M3uaParams,
    exchange_timeout: Duration,
    beat_counter: AtomicU32,
}

impl M3uaEndpoint {
    pub fn new(sctp: Arc<SctpAssociation>, params: M3uaParams, exchange_timeout: Duration) -> Self {
        Self {
            sctp,
            state: RwLock::new(AspState::Down),
            params,
            exchange_timeout,
            beat_counter: AtomicU32::new(1),
        }
    }

    pub async fn state(&self) -> AspState {
        *self.state.read().await
    }

    /// Bring the ASP up: ASPUP, require ASPUP_ACK
    #[instrument(skip(self))]
    pub async fn asp_up(&self) -> Result<(), M3uaError> {
        let current = *self.state.read().await;
        if current != AspState::Down {
            return Err(M3uaError::AspStateError(format!(
                "cannot ASPUP from state {:?}",
                current
            )));
        }

        info!(peer = %self.sctp.peer(), "Sending ASPUP");

        let msg = M3uaMessage::AspUp {
            asp_identifier: None,
            info_string: Some("tarn-sigtran".to_string()),
        };
        self.send_message(&msg).await?;

        match self.recv_expected("ASPUP_ACK").await? {
            M3uaMessage::AspUpAck { .. } => {
                info!("Received ASPUP_ACK");
                *self.state.write().await = AspState::Inactive;
                Ok(())
            }
            M3uaMessage::Error { error_code, .. } => Err(M3uaError::ProtocolError(error_code)),
            other => Err(M3uaError::InvalidMessage(format!(
                "expected ASPUP_ACK, got {}",
                other.name()
            ))),
        }
    }

    /// Activate the ASP: ASPAC, require ASPAC_ACK
    #[instrument(skip(self))]
    pub async fn asp_active(&self) -> Result<(), M3uaError> {
        let current = *self.state.read().await;
        if current != AspState::Inactive {
            return Err(M3uaError::AspStateError(format!(
                "cannot ASPAC from state {:?}",
                current
            )));
        }

        info!(peer = %self.sctp.peer(), "Sending ASPAC");

        let msg = M3uaMessage::AspActive {
            traffic_mode_type: Some(self.params.traffic_mode),
            routing_context: self.params.routing_context.map(|rc| vec![rc]),
            info_string: None,
        };
        self.send_message(&msg).await?;

        match self.recv_expected("ASPAC_ACK").await? {
            M3uaMessage::AspActiveAck { .. } => {
                info!("Received ASPAC_ACK");
                *self.state.write().await = AspState::Active;
                Ok(())
            }
            M3uaMessage::Error { error_code, .. } => Err(M3uaError::ProtocolError(error_code)),
            other => Err(M3uaError::InvalidMessage(format!(
                "expected ASPAC_ACK, got {}",
                other.name()
            ))),
        }
    }

    /// Bring the ASP down
    #[instrument(skip(self))]
    pub async fn asp_down(&self) -> Result<(), M3uaError> {
        info!(peer = %self.sctp.peer(), "Sending ASPDN");

        let msg = M3uaMessage::AspDown { info_string: None };
        self.send_message(&msg).await?;

        // Peer ack is best-effort; the state goes down either way.
        let _ = self.recv_expected("ASPDN_ACK").await;
        *self.state.write().await = AspState::Down;
        Ok(())
    }

    /// Exchange BEAT / BEAT_ACK to validate a cached session
    #[instrument(skip(self))]
    pub async fn beat(&self) -> Result<(), M3uaError> {
        let token = self.beat_counter.fetch_add(1, Ordering::Relaxed);
        let data = token.to_be_bytes().to_vec();

        debug!(token, "Sending BEAT");
        self.send_message(&M3uaMessage::Beat { data: data.clone() })
            .await?;

        match self.recv_expected("BEAT_ACK").await? {
            M3uaMessage::BeatAck { data: echoed } if echoed == data => {
                debug!(token, "Received BEAT_ACK");
                Ok(())
            }
            M3uaMessage::BeatAck { .. } => Err(M3uaError::InvalidMessage(
                "BEAT_ACK data mismatch".to_string(),
            )),
            other => Err(M3uaError::InvalidMessage(format!(
                "expected BEAT_ACK, got {}",
                other.name()
            ))),
        }
    }

    /// Send MTP3 user data (an SCCP payload)
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub async fn send_data(&self, data: &[u8]) -> Result<(), M3uaError> {
        let current = *self.state.read().await;
        if current != AspState::Active {
            return Err(M3uaError::AspStateError(format!(
                "cannot send data in state {:?}",
                current
            )));
        }

        let protocol_data = ProtocolData {
            opc: self.params.local_point_code,
            dpc: self.params.remote_point_code,
            si: crate::SI_SCCP,
            ni: self.params.network_indicator,
            mp: 0,
            sls: 0,
            data: Bytes::copy_from_slice(data),
        };

        let msg = M3uaMessage::Data {
            network_appearance: self.params.network_appearance,
            routing_context: self.params.routing_context,
            protocol_data,
            correlation_id: None,
        };

        self.send_message(&msg).await
    }

    /// Receive MTP3 user data, answering heartbeats along the way
    pub async fn recv_data(&self) -> Result<ProtocolData, M3uaError> {
        loop {
            let msg = self.recv_message().await?;

            match msg {
                M3uaMessage::Data { protocol_data, .. } => {
                    debug!(
                        opc = protocol_data.opc,
                        dpc = protocol_data.dpc,
                        len = protocol_data.data.len(),
                        "Received DATA"
                    );
                    return Ok(protocol_data);
                }
                M3uaMessage::Beat { data } => {
                    let _ = self.send_message(&M3uaMessage::BeatAck { data }).await;
                }
                M3uaMessage::Error { error_code, .. } => {
                    return Err(M3uaError::ProtocolError(error_code));
                }
                other => {
                    debug!(message = other.name(), "Ignoring message");
                }
            }
        }
    }

    async fn recv_expected(&self, what: &str) -> Result<M3uaMessage, M3uaError> {
        timeout(self.exchange_timeout, self.recv_message())
            .await
            .map_err(|_| M3uaError::Timeout(what.to_string()))?
    }

    async fn send_message(&self, msg: &M3uaMessage) -> Result<(), M3uaError> {
        let encoded = codec::encode_message(msg);
        self.sctp.send(0, &encoded).await?;
        Ok(())
    }

    async fn recv_message(&self) -> Result<M3uaMessage, M3uaError> {
        let (_, data) = self.sctp.recv().await?;
        codec::decode_message(&data)
    }
}
