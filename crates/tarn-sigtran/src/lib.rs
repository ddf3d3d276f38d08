//! # Tarn SIGTRAN Delivery Stack
//!
//! SS7-over-IP protocol stack used by the SMSC gateway to hand messages
//! to carrier signaling endpoints:
//!
//! - **SCTP** - framed transport association (pluggable connector)
//! - **M3UA** - MTP3 User Adaptation layer with the ASP state machine
//! - **SCCP** - Signaling Connection Control Part (connectionless UDT)
//! - **MAP**  - Mobile Application Part (SMS-SUBMIT submission)
//!
//! The [`SessionPool`] owns one reusable session per operator endpoint,
//! performs the ASPUP/ASPAC bring-up, validates cached sessions with
//! BEAT/BEAT_ACK heartbeats, and delivers one MAP operation per call.
//!
//! ## Example
//! ```rust,ignore
//! use tarn_sigtran::{EndpointConfig, SessionPool};
//!
//! let pool = SessionPool::with_tcp_defaults();
//! let endpoint = EndpointConfig::new("10.0.0.5", 2905);
//! let receipt = pool.deliver("+15550001111", "+19005551234", "hello", &endpoint).await?;
//! ```

pub mod config;
pub mod errors;
pub mod m3ua;
pub mod map;
pub mod sccp;
pub mod sctp;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testkit;

// Re-exports
pub use config::{EndpointConfig, M3uaParams, MapParams, SccpParams};
pub use errors::{Result, SigtranError};
pub use session::{DeliveryReceipt, SessionPool, SessionPoolConfig};
pub use types::*;

// Protocol layer exports
pub use m3ua::{AspState, M3uaEndpoint};
pub use map::{DerivedImsiResolver, ImsiResolver};
pub use sccp::{GlobalTitle, SccpAddress, SccpMessage};
pub use sctp::{Connector, SctpAssociation, TcpConnector, Transport};

/// Default SCTP port for M3UA
pub const DEFAULT_M3UA_PORT: u16 = 2905;

/// Service Indicator for SCCP
pub const SI_SCCP: u8 = 3;

/// Subsystem Numbers
pub mod ssn {
    pub const HLR: u8 = 6;
    pub const VLR: u8 = 7;
    pub const MSC: u8 = 8;
    pub const SMSC: u8 = 8;
}
