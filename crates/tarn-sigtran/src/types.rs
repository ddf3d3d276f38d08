//! Common types used across the SIGTRAN stack

use serde::{Deserialize, Serialize};

/// Traffic Mode Type for M3UA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficModeType {
    Override,
    Loadshare,
    Broadcast,
}

impl TrafficModeType {
    pub fn wire_value(&self) -> u32 {
        match self {
            Self::Override => 1,
            Self::Loadshare => 2,
            Self::Broadcast => 3,
        }
    }

    pub fn from_wire(v: u32) -> Option<Self> {
        match v {
            1 => Some(Self::Override),
            2 => Some(Self::Loadshare),
            3 => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// Protocol Class for SCCP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolClass {
    pub class: u8,
    pub return_on_error: bool,
}

impl ProtocolClass {
    pub const CLASS_0: Self = Self { class: 0, return_on_error: false };
    pub const CLASS_1: Self = Self { class: 1, return_on_error: false };

    pub fn encode(&self) -> u8 {
        (self.class & 0x0F) | if self.return_on_error { 0x80 } else { 0 }
    }

    pub fn decode(v: u8) -> Self {
        Self {
            class: v & 0x0F,
            return_on_error: (v & 0x80) != 0,
        }
    }
}

/// SM-RP-DA (destination address of the MAP forward operation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SmRpDa {
    Imsi(String),
    ServiceCentreAddress(String),
}

/// SM-RP-OA (originating address of the MAP forward operation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SmRpOa {
    Msisdn(String),
    ServiceCentreAddress(String),
}
