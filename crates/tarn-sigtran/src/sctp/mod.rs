//! SCTP transport layer
//!
//! The association rides on a pluggable [`Transport`] so the stack runs
//! over kernel SCTP, the TCP fallback framing below, or an in-memory
//! peer in tests. Frames preserve message boundaries and a stream id.

mod association;

pub use association::{AssociationState, SctpAssociation};

use crate::errors::SctpError;
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Payload Protocol Identifier for M3UA
pub const PPID_M3UA: u32 = 3;

/// Upper bound on a single frame; M3UA messages are far smaller
const MAX_FRAME_LEN: usize = 65536;

/// Reliable, ordered, message-framed transport to one peer
#[async_trait]
pub trait Transport: Send {
    async fn send_frame(&mut self, stream_id: u16, payload: &[u8]) -> std::io::Result<()>;

    /// Returns (stream_id, payload)
    async fn recv_frame(&mut self) -> std::io::Result<(u16, Bytes)>;

    async fn shutdown(&mut self) -> std::io::Result<()>;
}

/// Dials new transports; injected into the session pool
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, SctpError>;
}

/// TCP connector (SCTP-over-TCP for environments without kernel SCTP)
pub struct TcpConnector {
    pub connect_timeout: Duration,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn Transport>, SctpError> {
        let addr = format!("{}:{}", host, port);
        info!(peer = %addr, "Connecting transport association");

        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| SctpError::AssociationFailed(format!("connect timeout to {}", addr)))?
            .map_err(|e| {
                error!(peer = %addr, "Failed to connect: {}", e);
                SctpError::AssociationFailed(e.to_string())
            })?;

        Ok(Box::new(TcpTransport { stream }))
    }
}

/// Framed TCP transport
///
/// Frame format: `[4-byte length][2-byte stream id][4-byte PPID][payload]`
/// where length covers everything after the length field.
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send_frame(&mut self, stream_id: u16, payload: &[u8]) -> std::io::Result<()> {
        let frame_len = 2 + 4 + payload.len();
        let mut frame = BytesMut::with_capacity(4 + frame_len);
        frame.put_u32(frame_len as u32);
        frame.put_u16(stream_id);
        frame.put_u32(PPID_M3UA);
        frame.put_slice(payload);

        self.stream.write_all(&frame).await?;
        debug!(len = payload.len(), stream_id, "Frame sent");
        Ok(())
    }

    async fn recv_frame(&mut self) -> std::io::Result<(u16, Bytes)> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let frame_len = u32::from_be_bytes(len_buf) as usize;

        if !(6..=MAX_FRAME_LEN).contains(&frame_len) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("bad frame length {}", frame_len),
            ));
        }

        let mut frame = vec![0u8; frame_len];
        self.stream.read_exact(&mut frame).await?;

        let mut buf = Bytes::from(frame);
        let stream_id = buf.get_u16();
        let _ppid = buf.get_u32();

        debug!(len = buf.len(), stream_id, "Frame received");
        Ok((stream_id, buf))
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}
