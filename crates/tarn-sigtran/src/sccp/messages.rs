//! SCCP Message Types (connectionless subset)

use super::address::SccpAddress;
use crate::errors::SccpError;
use crate::types::ProtocolClass;
use bytes::{BufMut, Bytes, BytesMut};

const MSG_UDT: u8 = 0x09;

/// SCCP message
#[derive(Debug, Clone)]
pub enum SccpMessage {
    /// Unitdata (connectionless)
    Udt {
        protocol_class: ProtocolClass,
        called_party: SccpAddress,
        calling_party: SccpAddress,
        data: Bytes,
    },
}

impl SccpMessage {
    pub fn encode(&self) -> BytesMut {
        match self {
            Self::Udt { protocol_class, called_party, calling_party, data } => {
                let called = called_party.encode();
                let calling = calling_party.encode();

                let mut buf = BytesMut::with_capacity(5 + 3 + called.len() + calling.len() + data.len());
                buf.put_u8(MSG_UDT);
                buf.put_u8(protocol_class.encode());

                // Q.713 pointers: offset from the pointer octet to the
                // parameter's length octet.
                let ptr_called = 3u8;
                let ptr_calling = 3 + called.len() as u8;
                let ptr_data = 3 + called.len() as u8 + calling.len() as u8;
                buf.put_u8(ptr_called);
                buf.put_u8(ptr_calling);
                buf.put_u8(ptr_data);

                buf.put_u8(called.len() as u8);
                buf.put_slice(&called);

                buf.put_u8(calling.len() as u8);
                buf.put_slice(&calling);

                buf.put_u8(data.len() as u8);
                buf.put_slice(data);

                buf
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, SccpError> {
        if data.len() < 5 {
            return Err(SccpError::InvalidMessage("message too short".to_string()));
        }

        match data[0] {
            MSG_UDT => {
                let protocol_class = ProtocolClass::decode(data[1]);

                let called = read_pointed_field(data, 2)?;
                let calling = read_pointed_field(data, 3)?;
                let payload = read_pointed_field(data, 4)?;

                let called_party = SccpAddress::decode(Bytes::copy_from_slice(called))
                    .ok_or_else(|| SccpError::AddressError("bad called party".to_string()))?;
                let calling_party = SccpAddress::decode(Bytes::copy_from_slice(calling))
                    .ok_or_else(|| SccpError::AddressError("bad calling party".to_string()))?;

                Ok(Self::Udt {
                    protocol_class,
                    called_party,
                    calling_party,
                    data: Bytes::copy_from_slice(payload),
                })
            }
            other => Err(SccpError::InvalidMessage(format!(
                "unsupported message type 0x{:02X}",
                other
            ))),
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            Self::Udt { data, .. } => data,
        }
    }
}

/// Resolve a Q.713 pointer at `ptr_offset` to its length-prefixed field
fn read_pointed_field(data: &[u8], ptr_offset: usize) -> Result<&[u8], SccpError> {
    let ptr = data[ptr_offset] as usize;
    let len_offset = ptr_offset + ptr;
    let len = *data
        .get(len_offset)
        .ok_or_else(|| SccpError::InvalidMessage("pointer out of range".to_string()))?
        as usize;
    let start = len_offset + 1;
    data.get(start..start + len)
        .ok_or_else(|| SccpError::InvalidMessage("field out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sccp::GlobalTitle;

    #[test]
    fn udt_round_trip() {
        let msg = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: SccpAddress::from_gt(GlobalTitle::e164("19005550000"), Some(8)),
            calling_party: SccpAddress::from_gt(GlobalTitle::e164("15550000000"), Some(8)),
            data: Bytes::from_static(b"map-payload"),
        };

        let encoded = msg.encode();
        let SccpMessage::Udt { called_party, calling_party, data, .. } =
            SccpMessage::decode(&encoded).unwrap();

        assert_eq!(
            called_party.global_title.unwrap().digits,
            "19005550000"
        );
        assert_eq!(
            calling_party.global_title.unwrap().digits,
            "15550000000"
        );
        assert_eq!(&data[..], b"map-payload");
    }

    #[test]
    fn rejects_unsupported_type() {
        let err = SccpMessage::decode(&[0x01, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, SccpError::InvalidMessage(_)));
    }

    #[test]
    fn rejects_truncated_udt() {
        let msg = SccpMessage::Udt {
            protocol_class: ProtocolClass::CLASS_0,
            called_party: SccpAddress::from_gt(GlobalTitle::e164("1900555"), Some(8)),
            calling_party: SccpAddress::from_gt(GlobalTitle::e164("1555000"), Some(8)),
            data: Bytes::from_static(b"xyz"),
        };
        let encoded = msg.encode();
        assert!(SccpMessage::decode(&encoded[..encoded.len() - 2]).is_err());
    }
}
