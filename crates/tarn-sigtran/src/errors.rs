//! Error types for the SIGTRAN stack
//!
//! Every stage of a delivery (bring-up, heartbeat, encode, write,
//! ack-wait) fails with an identifiable error; the session pool converts
//! lower-level faults into the `Connection`/`Heartbeat`/`Delivery`
//! variants that callers record against messages.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, SigtranError>;

/// Top-level SIGTRAN error
#[derive(Debug, Error)]
pub enum SigtranError {
    #[error("SCTP error: {0}")]
    Sctp(#[from] SctpError),

    #[error("M3UA error: {0}")]
    M3ua(#[from] M3uaError),

    #[error("SCCP error: {0}")]
    Sccp(#[from] SccpError),

    #[error("MAP error: {0}")]
    Map(#[from] MapError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Heartbeat failed: {0}")]
    Heartbeat(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// SCTP layer errors
#[derive(Debug, Error)]
pub enum SctpError {
    #[error("Association failed: {0}")]
    AssociationFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// M3UA layer errors
#[derive(Debug, Error)]
pub enum M3uaError {
    #[error("ASP state error: {0}")]
    AspStateError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Protocol error code {0}")]
    ProtocolError(u32),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("SCTP error: {0}")]
    Sctp(#[from] SctpError),
}

/// SCCP layer errors
#[derive(Debug, Error)]
pub enum SccpError {
    #[error("Address error: {0}")]
    AddressError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("M3UA error: {0}")]
    M3ua(#[from] M3uaError),
}

/// MAP layer errors
#[derive(Debug, Error)]
pub enum MapError {
    #[error("Operation error code {code}")]
    OperationError { code: i32 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Subscriber lookup failed: {0}")]
    SubscriberLookup(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

/// Encoding errors
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Unsupported DCS: 0x{0:02X}")]
    UnsupportedDcs(u8),

    #[error("Message too long: {0} septets")]
    MessageTooLong(usize),

    #[error("Buffer too short")]
    BufferTooShort,

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
