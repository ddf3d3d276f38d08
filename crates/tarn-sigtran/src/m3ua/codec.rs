//! M3UA Message Encoding/Decoding

use super::messages::{M3uaMessage, ProtocolData};
use super::ParameterTag;
use crate::errors::M3uaError;
use crate::types::TrafficModeType;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// M3UA protocol version
const M3UA_VERSION: u8 = 1;

/// Encode an M3UA message to wire format
pub fn encode_message(msg: &M3uaMessage) -> BytesMut {
    let mut params = BytesMut::new();

    match msg {
        M3uaMessage::AspUp { asp_identifier, info_string } => {
            if let Some(id) = asp_identifier {
                encode_parameter(&mut params, ParameterTag::AspIdentifier, &id.to_be_bytes());
            }
            if let Some(info) = info_string {
                encode_parameter(&mut params, ParameterTag::InfoString, info.as_bytes());
            }
        }
        M3uaMessage::AspUpAck { info_string }
        | M3uaMessage::AspDown { info_string }
        | M3uaMessage::AspDownAck { info_string } => {
            if let Some(info) = info_string {
                encode_parameter(&mut params, ParameterTag::InfoString, info.as_bytes());
            }
        }
        M3uaMessage::Beat { data } | M3uaMessage::BeatAck { data } => {
            encode_parameter(&mut params, ParameterTag::HeartbeatData, data);
        }
        M3uaMessage::AspActive { traffic_mode_type, routing_context, info_string }
        | M3uaMessage::AspActiveAck { traffic_mode_type, routing_context, info_string } => {
            if let Some(mode) = traffic_mode_type {
                encode_parameter(
                    &mut params,
                    ParameterTag::TrafficModeType,
                    &mode.wire_value().to_be_bytes(),
                );
            }
            if let Some(rc) = routing_context {
                let rc_bytes: Vec<u8> = rc.iter().flat_map(|v| v.to_be_bytes()).collect();
                encode_parameter(&mut params, ParameterTag::RoutingContext, &rc_bytes);
            }
            if let Some(info) = info_string {
                encode_parameter(&mut params, ParameterTag::InfoString, info.as_bytes());
            }
        }
        M3uaMessage::Data { network_appearance, routing_context, protocol_data, correlation_id } => {
            if let Some(na) = network_appearance {
                encode_parameter(&mut params, ParameterTag::NetworkAppearance, &na.to_be_bytes());
            }
            if let Some(rc) = routing_context {
                encode_parameter(&mut params, ParameterTag::RoutingContext, &rc.to_be_bytes());
            }

            let pd_encoded = protocol_data.encode();
            encode_parameter(&mut params, ParameterTag::ProtocolData, &pd_encoded);

            if let Some(cid) = correlation_id {
                encode_parameter(&mut params, ParameterTag::CorrelationId, &cid.to_be_bytes());
            }
        }
        M3uaMessage::Error { error_code, diagnostic_info } => {
            encode_parameter(&mut params, ParameterTag::ErrorCode, &error_code.to_be_bytes());
            if let Some(diag) = diagnostic_info {
                encode_parameter(&mut params, ParameterTag::DiagnosticInfo, diag);
            }
        }
    }

    // Common header: version, reserved, class, type, length
    let length = 8 + params.len() as u32;
    let mut buf = BytesMut::with_capacity(length as usize);
    buf.put_u8(M3UA_VERSION);
    buf.put_u8(0);
    buf.put_u8(msg.class());
    buf.put_u8(msg.message_type());
    buf.put_u32(length);
    buf.put_slice(&params);

    buf
}

/// Encode a TLV parameter, padded to a 4-byte boundary
fn encode_parameter(buf: &mut BytesMut, tag: ParameterTag, value: &[u8]) {
    let length = 4 + value.len() as u16;
    buf.put_u16(tag as u16);
    buf.put_u16(length);
    buf.put_slice(value);

    let padding = (4 - (value.len() % 4)) % 4;
    for _ in 0..padding {
        buf.put_u8(0);
    }
}

/// Decode an M3UA message from wire format
pub fn decode_message(data: &[u8]) -> Result<M3uaMessage, M3uaError> {
    if data.len() < 8 {
        return Err(M3uaError::InvalidMessage("message too short".to_string()));
    }

    let mut buf = Bytes::copy_from_slice(data);

    let version = buf.get_u8();
    if version != M3UA_VERSION {
        return Err(M3uaError::InvalidMessage(format!("invalid version: {}", version)));
    }

    let _reserved = buf.get_u8();
    let msg_class = buf.get_u8();
    let msg_type = buf.get_u8();
    let length = buf.get_u32() as usize;

    if data.len() < length {
        return Err(M3uaError::InvalidMessage("incomplete message".to_string()));
    }

    let params = parse_parameters(&buf);

    match (msg_class, msg_type) {
        (3, 1) => Ok(M3uaMessage::AspUp {
            asp_identifier: get_u32_param(&params, ParameterTag::AspIdentifier),
            info_string: get_string_param(&params, ParameterTag::InfoString),
        }),
        (3, 2) => Ok(M3uaMessage::AspDown {
            info_string: get_string_param(&params, ParameterTag::InfoString),
        }),
        (3, 3) => Ok(M3uaMessage::Beat {
            data: params.get(&(ParameterTag::HeartbeatData as u16)).cloned().unwrap_or_default(),
        }),
        (3, 4) => Ok(M3uaMessage::AspUpAck {
            info_string: get_string_param(&params, ParameterTag::InfoString),
        }),
        (3, 5) => Ok(M3uaMessage::AspDownAck {
            info_string: get_string_param(&params, ParameterTag::InfoString),
        }),
        (3, 6) => Ok(M3uaMessage::BeatAck {
            data: params.get(&(ParameterTag::HeartbeatData as u16)).cloned().unwrap_or_default(),
        }),
        (4, 1) => Ok(M3uaMessage::AspActive {
            traffic_mode_type: get_traffic_mode(&params),
            routing_context: get_routing_contexts(&params),
            info_string: get_string_param(&params, ParameterTag::InfoString),
        }),
        (4, 3) => Ok(M3uaMessage::AspActiveAck {
            traffic_mode_type: get_traffic_mode(&params),
            routing_context: get_routing_contexts(&params),
            info_string: get_string_param(&params, ParameterTag::InfoString),
        }),
        (1, 1) => {
            let pd_bytes = params
                .get(&(ParameterTag::ProtocolData as u16))
                .ok_or_else(|| M3uaError::InvalidMessage("missing protocol data".to_string()))?;
            let protocol_data = ProtocolData::decode(Bytes::copy_from_slice(pd_bytes))
                .ok_or_else(|| M3uaError::InvalidMessage("invalid protocol data".to_string()))?;

            Ok(M3uaMessage::Data {
                network_appearance: get_u32_param(&params, ParameterTag::NetworkAppearance),
                routing_context: get_u32_param(&params, ParameterTag::RoutingContext),
                protocol_data,
                correlation_id: get_u32_param(&params, ParameterTag::CorrelationId),
            })
        }
        (0, 0) => Ok(M3uaMessage::Error {
            error_code: get_u32_param(&params, ParameterTag::ErrorCode).unwrap_or(0),
            diagnostic_info: params.get(&(ParameterTag::DiagnosticInfo as u16)).cloned(),
        }),
        _ => Err(M3uaError::InvalidMessage(format!(
            "unknown message: class={}, type={}",
            msg_class, msg_type
        ))),
    }
}

/// Parse TLV parameters into a tag map
fn parse_parameters(buf: &Bytes) -> HashMap<u16, Vec<u8>> {
    let mut params = HashMap::new();
    let mut cursor = buf.clone();

    while cursor.remaining() >= 4 {
        let tag = cursor.get_u16();
        let length = cursor.get_u16() as usize;

        if length < 4 || cursor.remaining() < length - 4 {
            break;
        }

        let value_len = length - 4;
        let value = cursor.copy_to_bytes(value_len).to_vec();
        params.insert(tag, value);

        let padding = (4 - (value_len % 4)) % 4;
        if cursor.remaining() >= padding {
            cursor.advance(padding);
        }
    }

    params
}

fn get_string_param(params: &HashMap<u16, Vec<u8>>, tag: ParameterTag) -> Option<String> {
    params
        .get(&(tag as u16))
        .and_then(|v| String::from_utf8(v.clone()).ok())
}

fn get_u32_param(params: &HashMap<u16, Vec<u8>>, tag: ParameterTag) -> Option<u32> {
    params
        .get(&(tag as u16))
        .filter(|v| v.len() >= 4)
        .map(|v| u32::from_be_bytes([v[0], v[1], v[2], v[3]]))
}

fn get_routing_contexts(params: &HashMap<u16, Vec<u8>>) -> Option<Vec<u32>> {
    params.get(&(ParameterTag::RoutingContext as u16)).map(|v| {
        v.chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    })
}

fn get_traffic_mode(params: &HashMap<u16, Vec<u8>>) -> Option<TrafficModeType> {
    get_u32_param(params, ParameterTag::TrafficModeType).and_then(TrafficModeType::from_wire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asp_up_round_trip() {
        let msg = M3uaMessage::AspUp {
            asp_identifier: Some(7),
            info_string: Some("tarn-sigtran".to_string()),
        };
        let encoded = encode_message(&msg);
        match decode_message(&encoded).unwrap() {
            M3uaMessage::AspUp { asp_identifier, info_string } => {
                assert_eq!(asp_identifier, Some(7));
                assert_eq!(info_string.as_deref(), Some("tarn-sigtran"));
            }
            other => panic!("decoded wrong message: {:?}", other),
        }
    }

    #[test]
    fn beat_echoes_data() {
        let msg = M3uaMessage::Beat { data: vec![0xDE, 0xAD, 0xBE] };
        let encoded = encode_message(&msg);
        match decode_message(&encoded).unwrap() {
            M3uaMessage::Beat { data } => assert_eq!(data, vec![0xDE, 0xAD, 0xBE]),
            other => panic!("decoded wrong message: {:?}", other),
        }
    }

    #[test]
    fn data_round_trip_preserves_protocol_data() {
        let msg = M3uaMessage::Data {
            network_appearance: None,
            routing_context: Some(100),
            protocol_data: ProtocolData::sccp(1001, 2001, 2, Bytes::from_static(b"\x09payload")),
            correlation_id: None,
        };
        let encoded = encode_message(&msg);
        match decode_message(&encoded).unwrap() {
            M3uaMessage::Data { routing_context, protocol_data, .. } => {
                assert_eq!(routing_context, Some(100));
                assert_eq!(protocol_data.opc, 1001);
                assert_eq!(protocol_data.dpc, 2001);
                assert_eq!(protocol_data.si, 3);
                assert_eq!(&protocol_data.data[..], b"\x09payload");
            }
            other => panic!("decoded wrong message: {:?}", other),
        }
    }

    #[test]
    fn asp_active_carries_traffic_mode_and_context() {
        let msg = M3uaMessage::AspActive {
            traffic_mode_type: Some(TrafficModeType::Override),
            routing_context: Some(vec![5, 6]),
            info_string: None,
        };
        let encoded = encode_message(&msg);
        match decode_message(&encoded).unwrap() {
            M3uaMessage::AspActive { traffic_mode_type, routing_context, .. } => {
                assert_eq!(traffic_mode_type, Some(TrafficModeType::Override));
                assert_eq!(routing_context, Some(vec![5, 6]));
            }
            other => panic!("decoded wrong message: {:?}", other),
        }
    }

    #[test]
    fn rejects_short_and_unknown_messages() {
        assert!(decode_message(&[1, 0, 3]).is_err());

        let mut unknown = encode_message(&M3uaMessage::AspUp {
            asp_identifier: None,
            info_string: None,
        });
        unknown[2] = 9; // unknown class
        assert!(decode_message(&unknown).is_err());
    }
}
