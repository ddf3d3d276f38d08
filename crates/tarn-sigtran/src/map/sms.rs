//! MAP SMS operation encoding

use crate::errors::MapError;
use crate::types::{SmRpDa, SmRpOa};
use bytes::{BufMut, BytesMut};

/// TCAP component tags carried in the acknowledgment payload
const TAG_RETURN_RESULT: u8 = 0xA2;
const TAG_RETURN_ERROR: u8 = 0xA3;

/// Build an SMS-SUBMIT TPDU (3GPP TS 23.040).
///
/// `user_data` must already be packed for `dcs`; `user_data_len` is the
/// TP-UDL in the unit the scheme requires (septets for GSM7, octets for
/// UCS2).
pub fn encode_submit_tpdu(
    message_reference: u8,
    destination: &str,
    dcs: u8,
    validity_period: u8,
    user_data_len: u8,
    user_data: &[u8],
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16 + user_data.len());

    // MTI = SMS-SUBMIT, VPF = relative format
    buf.put_u8(0x11);
    buf.put_u8(message_reference);

    // TP-DA: digit count, TON/NPI (international E.164), TBCD digits
    let digits: Vec<u8> = destination
        .chars()
        .filter(|c| c.is_ascii_digit())
        .map(|c| c.to_digit(10).unwrap() as u8)
        .collect();
    buf.put_u8(digits.len() as u8);
    buf.put_u8(0x91);
    buf.put_slice(&pack_tbcd_digits(&digits));

    // TP-PID
    buf.put_u8(0x00);
    // TP-DCS
    buf.put_u8(dcs);
    // TP-VP (relative)
    buf.put_u8(validity_period);
    // TP-UDL + TP-UD
    buf.put_u8(user_data_len);
    buf.put_slice(user_data);

    buf.to_vec()
}

/// Encode the mo-forwardSM invoke parameter
pub fn encode_mo_forward_sm(sm_rp_da: &SmRpDa, sm_rp_oa: &SmRpOa, sm_rp_ui: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(64 + sm_rp_ui.len());

    buf.put_u8(0x30); // SEQUENCE
    let len_pos = buf.len();
    buf.put_u8(0x00); // length placeholder

    encode_sm_rp_da(&mut buf, sm_rp_da, 0xA0);
    encode_sm_rp_oa(&mut buf, sm_rp_oa, 0xA1);

    // SM-RP-UI [2] SignalInfo
    buf.put_u8(0x82);
    buf.put_u8(sm_rp_ui.len() as u8);
    buf.put_slice(sm_rp_ui);

    let len = buf.len() - len_pos - 1;
    buf[len_pos] = len as u8;

    buf.to_vec()
}

/// Positive forward-SM acknowledgment (used by peers and tests)
pub fn encode_forward_sm_ack() -> Vec<u8> {
    vec![TAG_RETURN_RESULT, 0x00]
}

/// Negative forward-SM acknowledgment carrying an error code
pub fn encode_forward_sm_error(code: u8) -> Vec<u8> {
    vec![TAG_RETURN_ERROR, 0x01, code]
}

/// Decode the acknowledgment to a forward-SM invoke
pub fn decode_forward_sm_ack(data: &[u8]) -> Result<(), MapError> {
    match data.first() {
        Some(&TAG_RETURN_RESULT) => Ok(()),
        Some(&TAG_RETURN_ERROR) => {
            let code = data.get(2).copied().unwrap_or(0) as i32;
            Err(MapError::OperationError { code })
        }
        Some(other) => Err(MapError::InvalidResponse(format!(
            "unexpected component tag 0x{:02X}",
            other
        ))),
        None => Err(MapError::InvalidResponse("empty acknowledgment".to_string())),
    }
}

fn encode_sm_rp_da(buf: &mut BytesMut, da: &SmRpDa, tag: u8) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_u8(0x00);

    match da {
        SmRpDa::Imsi(imsi) => {
            let bcd = encode_tbcd(imsi);
            buf.put_u8(0x80);
            buf.put_u8(bcd.len() as u8);
            buf.put_slice(&bcd);
        }
        SmRpDa::ServiceCentreAddress(addr) => {
            let bcd = encode_tbcd(addr);
            buf.put_u8(0x82);
            buf.put_u8(bcd.len() as u8);
            buf.put_slice(&bcd);
        }
    }

    let len = buf.len() - len_pos - 1;
    buf[len_pos] = len as u8;
}

fn encode_sm_rp_oa(buf: &mut BytesMut, oa: &SmRpOa, tag: u8) {
    buf.put_u8(tag);
    let len_pos = buf.len();
    buf.put_u8(0x00);

    match oa {
        SmRpOa::Msisdn(msisdn) => {
            let bcd = encode_tbcd(msisdn);
            buf.put_u8(0x82);
            buf.put_u8(bcd.len() as u8);
            buf.put_slice(&bcd);
        }
        SmRpOa::ServiceCentreAddress(addr) => {
            let bcd = encode_tbcd(addr);
            buf.put_u8(0x84);
            buf.put_u8(bcd.len() as u8);
            buf.put_slice(&bcd);
        }
    }

    let len = buf.len() - len_pos - 1;
    buf[len_pos] = len as u8;
}

/// Encode an address to TBCD with a leading TON/NPI octet
pub fn encode_tbcd(number: &str) -> Vec<u8> {
    let digits: Vec<u8> = number
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '*' || *c == '#')
        .map(|c| match c {
            '*' => 0x0A,
            '#' => 0x0B,
            d => d.to_digit(10).unwrap() as u8,
        })
        .collect();

    // TON/NPI: international, E.164
    let mut result = vec![0x91];
    result.extend(pack_tbcd_digits(&digits));
    result
}

/// Decode TBCD digits, skipping a leading TON/NPI octet when present
pub fn decode_tbcd(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let start = if data[0] & 0x80 != 0 { 1 } else { 0 };
    let mut result = String::new();

    for &byte in &data[start..] {
        for nibble in [byte & 0x0F, (byte >> 4) & 0x0F] {
            match nibble {
                0..=9 => result.push(char::from_digit(nibble as u32, 10).unwrap()),
                0x0A => result.push('*'),
                0x0B => result.push('#'),
                _ => {}
            }
        }
    }

    result
}

fn pack_tbcd_digits(digits: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity((digits.len() + 1) / 2);
    for chunk in digits.chunks(2) {
        let byte = if chunk.len() == 2 {
            chunk[0] | (chunk[1] << 4)
        } else {
            chunk[0] | 0xF0
        };
        result.push(byte);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tbcd_encoding() {
        let encoded = encode_tbcd("1234567890");
        assert_eq!(encoded[0], 0x91); // TON/NPI
        assert_eq!(encoded[1], 0x21); // 1, 2
        assert_eq!(encoded[2], 0x43); // 3, 4
    }

    #[test]
    fn tbcd_round_trip_with_odd_length() {
        let encoded = encode_tbcd("12345");
        assert_eq!(decode_tbcd(&encoded), "12345");
    }

    #[test]
    fn submit_tpdu_layout() {
        let tpdu = encode_submit_tpdu(0x42, "+19005551234", 0x00, 0x47, 3, &[0x01, 0x02, 0x03]);

        assert_eq!(tpdu[0], 0x11); // SMS-SUBMIT, relative VPF
        assert_eq!(tpdu[1], 0x42); // TP-MR
        assert_eq!(tpdu[2], 11); // 11 destination digits
        assert_eq!(tpdu[3], 0x91); // international E.164

        // after 6 TBCD octets: PID, DCS, VP, UDL, UD
        let tail = &tpdu[4 + 6..];
        assert_eq!(tail, &[0x00, 0x00, 0x47, 3, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn mo_forward_sm_wraps_tpdu() {
        let tpdu = vec![0xAA; 10];
        let param = encode_mo_forward_sm(
            &SmRpDa::Imsi("001010000000001".into()),
            &SmRpOa::Msisdn("15550001111".into()),
            &tpdu,
        );

        assert_eq!(param[0], 0x30); // SEQUENCE
        assert_eq!(param[1] as usize, param.len() - 2);
        // the TPDU rides at the tail of the parameter
        assert_eq!(&param[param.len() - 10..], &tpdu[..]);
    }

    #[test]
    fn ack_decoding_distinguishes_outcomes() {
        assert!(decode_forward_sm_ack(&encode_forward_sm_ack()).is_ok());

        match decode_forward_sm_ack(&encode_forward_sm_error(34)) {
            Err(MapError::OperationError { code }) => assert_eq!(code, 34),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(decode_forward_sm_ack(&[]).is_err());
        assert!(decode_forward_sm_ack(&[0x55]).is_err());
    }
}
