//! Per-endpoint protocol configuration
//!
//! Operators carry one [`EndpointConfig`] each; it is the typed form of
//! the connection parameters the session pool consumes. Validation
//! happens at the boundary so missing or malformed parameters fail
//! before any socket is opened rather than at encode time.

use crate::errors::SigtranError;
use crate::types::TrafficModeType;
use serde::{Deserialize, Serialize};

/// Complete per-endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Remote signaling gateway host
    pub host: String,
    /// Remote signaling gateway port
    pub port: u16,
    #[serde(default)]
    pub m3ua: M3uaParams,
    #[serde(default)]
    pub sccp: SccpParams,
    #[serde(default)]
    pub map: MapParams,
}

/// M3UA association parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct M3uaParams {
    /// Local (originating) point code
    pub local_point_code: u32,
    /// Remote (destination) point code
    pub remote_point_code: u32,
    /// Network indicator (2 = national)
    pub network_indicator: u8,
    /// Routing context, when the SG requires one
    pub routing_context: Option<u32>,
    /// Network appearance, when the SG requires one
    pub network_appearance: Option<u32>,
    pub traffic_mode: TrafficModeType,
}

/// SCCP addressing context attached to an established association
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SccpParams {
    /// Local global title digits (this gateway)
    pub local_gt: String,
    /// Remote global title digits (the operator endpoint)
    pub remote_gt: String,
    /// Local subsystem number (8 = SMSC)
    pub local_ssn: u8,
    /// Remote subsystem number
    pub remote_ssn: u8,
}

/// MAP operation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapParams {
    /// Service centre address presented in the forward operation
    pub service_centre_address: String,
    /// TP-VP relative validity period (0x47 = 24 hours)
    pub validity_period: u8,
    /// Submission acknowledgment timeout
    pub operation_timeout_ms: u64,
}

impl Default for M3uaParams {
    fn default() -> Self {
        Self {
            local_point_code: 1001,
            remote_point_code: 2001,
            network_indicator: 2,
            routing_context: None,
            network_appearance: None,
            traffic_mode: TrafficModeType::Override,
        }
    }
}

impl Default for SccpParams {
    fn default() -> Self {
        Self {
            local_gt: String::new(),
            remote_gt: String::new(),
            local_ssn: crate::ssn::SMSC,
            remote_ssn: crate::ssn::MSC,
        }
    }
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            service_centre_address: String::new(),
            validity_period: 0x47,
            operation_timeout_ms: 5000,
        }
    }
}

impl EndpointConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            m3ua: M3uaParams::default(),
            sccp: SccpParams::default(),
            map: MapParams::default(),
        }
    }

    /// Pool key for this endpoint; sessions are shared per `host:port`
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), SigtranError> {
        if self.host.is_empty() {
            return Err(SigtranError::Config("endpoint host is empty".into()));
        }
        if self.port == 0 {
            return Err(SigtranError::Config("endpoint port is zero".into()));
        }
        for (name, gt) in [("local_gt", &self.sccp.local_gt), ("remote_gt", &self.sccp.remote_gt)] {
            if gt.is_empty() {
                return Err(SigtranError::Config(format!("{} is empty", name)));
            }
            if !gt.chars().all(|c| c.is_ascii_digit()) {
                return Err(SigtranError::Config(format!("{} contains non-digits", name)));
            }
        }
        if self.sccp.local_ssn == 0 || self.sccp.remote_ssn == 0 {
            return Err(SigtranError::Config("subsystem number is zero".into()));
        }
        if self.map.operation_timeout_ms == 0 {
            return Err(SigtranError::Config("operation timeout is zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> EndpointConfig {
        let mut cfg = EndpointConfig::new("192.0.2.10", 2905);
        cfg.sccp.local_gt = "15550000000".into();
        cfg.sccp.remote_gt = "19005550000".into();
        cfg
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_missing_global_title() {
        let mut cfg = valid();
        cfg.sccp.remote_gt.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_digit_global_title() {
        let mut cfg = valid();
        cfg.sccp.local_gt = "+1555".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let cfg = valid();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EndpointConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.endpoint_key(), cfg.endpoint_key());
        assert_eq!(back.m3ua.local_point_code, cfg.m3ua.local_point_code);
    }

    #[test]
    fn defaults_fill_omitted_sections() {
        let cfg: EndpointConfig =
            serde_json::from_str(r#"{"host":"192.0.2.1","port":2905}"#).unwrap();
        assert_eq!(cfg.map.validity_period, 0x47);
        assert_eq!(cfg.m3ua.network_indicator, 2);
    }
}
