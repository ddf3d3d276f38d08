//! M3UA Message Types

use crate::types::TrafficModeType;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// M3UA message subset for a client-side ASP
#[derive(Debug, Clone)]
pub enum M3uaMessage {
    // ASP State Maintenance (ASPSM)
    AspUp {
        asp_identifier: Option<u32>,
        info_string: Option<String>,
    },
    AspUpAck {
        info_string: Option<String>,
    },
    AspDown {
        info_string: Option<String>,
    },
    AspDownAck {
        info_string: Option<String>,
    },
    Beat {
        data: Vec<u8>,
    },
    BeatAck {
        data: Vec<u8>,
    },

    // ASP Traffic Maintenance (ASPTM)
    AspActive {
        traffic_mode_type: Option<TrafficModeType>,
        routing_context: Option<Vec<u32>>,
        info_string: Option<String>,
    },
    AspActiveAck {
        traffic_mode_type: Option<TrafficModeType>,
        routing_context: Option<Vec<u32>>,
        info_string: Option<String>,
    },

    // Transfer
    Data {
        network_appearance: Option<u32>,
        routing_context: Option<u32>,
        protocol_data: ProtocolData,
        correlation_id: Option<u32>,
    },

    // Management
    Error {
        error_code: u32,
        diagnostic_info: Option<Vec<u8>>,
    },
}

/// Protocol Data parameter (MTP3 user data)
#[derive(Debug, Clone)]
pub struct ProtocolData {
    /// Originating Point Code
    pub opc: u32,
    /// Destination Point Code
    pub dpc: u32,
    /// Service Indicator (SCCP = 3)
    pub si: u8,
    /// Network Indicator
    pub ni: u8,
    /// Message Priority
    pub mp: u8,
    /// Signaling Link Selection
    pub sls: u8,
    /// User data (SCCP message)
    pub data: Bytes,
}

impl ProtocolData {
    /// Create protocol data carrying an SCCP payload
    pub fn sccp(opc: u32, dpc: u32, ni: u8, data: Bytes) -> Self {
        Self {
            opc,
            dpc,
            si: crate::SI_SCCP,
            ni,
            mp: 0,
            sls: 0,
            data,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(12 + self.data.len());
        buf.put_u32(self.opc);
        buf.put_u32(self.dpc);
        buf.put_u8(self.si);
        buf.put_u8(self.ni);
        buf.put_u8(self.mp);
        buf.put_u8(self.sls);
        buf.put_slice(&self.data);
        buf
    }

    pub fn decode(mut data: Bytes) -> Option<Self> {
        if data.remaining() < 12 {
            return None;
        }

        Some(Self {
            opc: data.get_u32(),
            dpc: data.get_u32(),
            si: data.get_u8(),
            ni: data.get_u8(),
            mp: data.get_u8(),
            sls: data.get_u8(),
            data,
        })
    }
}

impl M3uaMessage {
    /// Message class octet
    pub fn class(&self) -> u8 {
        match self {
            Self::Error { .. } => 0,
            Self::Data { .. } => 1,
            Self::AspUp { .. }
            | Self::AspUpAck { .. }
            | Self::AspDown { .. }
            | Self::AspDownAck { .. }
            | Self::Beat { .. }
            | Self::BeatAck { .. } => 3,
            Self::AspActive { .. } | Self::AspActiveAck { .. } => 4,
        }
    }

    /// Message type octet within the class
    pub fn message_type(&self) -> u8 {
        match self {
            Self::Error { .. } => 0,
            Self::Data { .. } => 1,
            Self::AspUp { .. } => 1,
            Self::AspDown { .. } => 2,
            Self::Beat { .. } => 3,
            Self::AspUpAck { .. } => 4,
            Self::AspDownAck { .. } => 5,
            Self::BeatAck { .. } => 6,
            Self::AspActive { .. } => 1,
            Self::AspActiveAck { .. } => 3,
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::AspUp { .. } => "ASPUP",
            Self::AspUpAck { .. } => "ASPUP_ACK",
            Self::AspDown { .. } => "ASPDN",
            Self::AspDownAck { .. } => "ASPDN_ACK",
            Self::Beat { .. } => "BEAT",
            Self::BeatAck { .. } => "BEAT_ACK",
            Self::AspActive { .. } => "ASPAC",
            Self::AspActiveAck { .. } => "ASPAC_ACK",
            Self::Data { .. } => "DATA",
            Self::Error { .. } => "ERR",
        }
    }
}
