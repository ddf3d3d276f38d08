//! SCTP Association Management

use super::Transport;
use crate::errors::SctpError;
use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Association state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationState {
    Established,
    ShutdownPending,
    Closed,
}

/// A single association with one peer
///
/// The connector hands over an already-connected transport, so a fresh
/// association starts in `Established`. Send and receive are serialized
/// by the callers above this layer (one outstanding delivery per
/// session); the internal mutex only guards the transport handle.
pub struct SctpAssociation {
    transport: Mutex<Box<dyn Transport>>,
    state: RwLock<AssociationState>,
    peer: String,
}

impl SctpAssociation {
    pub fn new(transport: Box<dyn Transport>, peer: impl Into<String>) -> Self {
        Self {
            transport: Mutex::new(transport),
            state: RwLock::new(AssociationState::Established),
            peer: peer.into(),
        }
    }

    /// Send data on a stream
    pub async fn send(&self, stream_id: u16, data: &[u8]) -> Result<(), SctpError> {
        self.ensure_established().await?;

        let mut transport = self.transport.lock().await;
        transport
            .send_frame(stream_id, data)
            .await
            .map_err(|e| SctpError::SendFailed(e.to_string()))
    }

    /// Receive data; returns (stream_id, payload)
    pub async fn recv(&self) -> Result<(u16, Bytes), SctpError> {
        self.ensure_established().await?;

        let mut transport = self.transport.lock().await;
        transport
            .recv_frame()
            .await
            .map_err(|e| SctpError::ReceiveFailed(e.to_string()))
    }

    /// Close the association gracefully
    pub async fn close(&self) -> Result<(), SctpError> {
        info!(peer = %self.peer, "Closing association");
        *self.state.write().await = AssociationState::ShutdownPending;

        let mut transport = self.transport.lock().await;
        transport.shutdown().await.map_err(SctpError::Io)?;

        *self.state.write().await = AssociationState::Closed;
        debug!(peer = %self.peer, "Association closed");
        Ok(())
    }

    pub async fn state(&self) -> AssociationState {
        *self.state.read().await
    }

    pub async fn is_established(&self) -> bool {
        *self.state.read().await == AssociationState::Established
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn ensure_established(&self) -> Result<(), SctpError> {
        let state = *self.state.read().await;
        if state != AssociationState::Established {
            return Err(SctpError::InvalidState {
                expected: "Established".to_string(),
                actual: format!("{:?}", state),
            });
        }
        Ok(())
    }
}
