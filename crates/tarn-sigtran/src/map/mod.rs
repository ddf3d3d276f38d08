//! MAP (Mobile Application Part) Layer
//!
//! SMS submission subset: SMS-SUBMIT TPDU construction, mo-forwardSM
//! parameter encoding, and acknowledgment decoding.

mod encoding;
mod sms;

pub use encoding::{decode_gsm7, encode_gsm7, encode_ucs2, encode_user_data, DCS_GSM7, DCS_UCS2};
pub use sms::{
    decode_forward_sm_ack, encode_forward_sm_ack, encode_forward_sm_error, encode_mo_forward_sm,
    encode_submit_tpdu,
};

use crate::errors::MapError;
use async_trait::async_trait;

/// MAP operation codes
pub mod operation {
    pub const MT_FORWARD_SHORT_MESSAGE: i32 = 44;
    pub const SEND_ROUTING_INFO_FOR_SM: i32 = 45;
    pub const MO_FORWARD_SHORT_MESSAGE: i32 = 46;
}

/// Resolves a destination MSISDN to an IMSI for the forward operation.
///
/// Real deployments back this with an HLR SRI-SM query; the default
/// implementation derives a placeholder from the MSISDN digits.
#[async_trait]
pub trait ImsiResolver: Send + Sync {
    async fn resolve(&self, msisdn: &str) -> Result<String, MapError>;
}

/// Placeholder resolver: MCC/MNC prefix + zero-padded MSISDN tail.
pub struct DerivedImsiResolver {
    mcc_mnc: String,
}

impl DerivedImsiResolver {
    pub fn new(mcc_mnc: impl Into<String>) -> Self {
        Self { mcc_mnc: mcc_mnc.into() }
    }
}

impl Default for DerivedImsiResolver {
    fn default() -> Self {
        // test network MCC/MNC
        Self::new("00101")
    }
}

#[async_trait]
impl ImsiResolver for DerivedImsiResolver {
    async fn resolve(&self, msisdn: &str) -> Result<String, MapError> {
        let digits: String = msisdn.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(MapError::SubscriberLookup(format!(
                "no digits in msisdn {:?}",
                msisdn
            )));
        }

        // IMSI is 15 digits: MCC/MNC then the MSISDN tail, zero padded
        let msin_len = 15 - self.mcc_mnc.len();
        let tail: String = digits
            .chars()
            .rev()
            .take(msin_len)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        Ok(format!("{}{:0>width$}", self.mcc_mnc, tail, width = msin_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn derived_imsi_is_fifteen_digits() {
        let resolver = DerivedImsiResolver::default();
        let imsi = resolver.resolve("+19005551234").await.unwrap();
        assert_eq!(imsi.len(), 15);
        assert!(imsi.starts_with("00101"));
        assert!(imsi.ends_with("9005551234"));
    }

    #[tokio::test]
    async fn rejects_digitless_msisdn() {
        let resolver = DerivedImsiResolver::default();
        assert!(resolver.resolve("++").await.is_err());
    }
}
