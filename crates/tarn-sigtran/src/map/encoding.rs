//! GSM 7-bit and UCS2 user data encoding

use crate::errors::EncodingError;

/// Data coding scheme: GSM 7-bit default alphabet
pub const DCS_GSM7: u8 = 0x00;
/// Data coding scheme: UCS2
pub const DCS_UCS2: u8 = 0x08;

/// Maximum septets in a single un-concatenated SMS
const MAX_SEPTETS: usize = 160;
/// Maximum UCS2 octets in a single SMS
const MAX_UCS2_OCTETS: usize = 140;

/// GSM 7-bit default alphabet
const GSM7_BASIC: &[char] = &[
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\x1b', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

/// GSM 7-bit extension table (after ESC)
const GSM7_EXTENSION: &[(u8, char)] = &[
    (0x0A, '\x0C'),
    (0x14, '^'),
    (0x28, '{'),
    (0x29, '}'),
    (0x2F, '\\'),
    (0x3C, '['),
    (0x3D, '~'),
    (0x3E, ']'),
    (0x40, '|'),
    (0x65, '€'),
];

/// Pick a coding scheme for the content and encode it.
///
/// Returns (dcs, tp-udl, packed user data). GSM 7-bit when the content
/// fits the default alphabet, UCS2 otherwise.
pub fn encode_user_data(text: &str) -> Result<(u8, u8, Vec<u8>), EncodingError> {
    match gsm7_septets(text) {
        Some(septets) => {
            if septets.len() > MAX_SEPTETS {
                return Err(EncodingError::MessageTooLong(septets.len()));
            }
            let packed = pack_gsm7(&septets);
            Ok((DCS_GSM7, septets.len() as u8, packed))
        }
        None => {
            let encoded = encode_ucs2(text);
            if encoded.len() > MAX_UCS2_OCTETS {
                return Err(EncodingError::MessageTooLong(encoded.len()));
            }
            Ok((DCS_UCS2, encoded.len() as u8, encoded))
        }
    }
}

/// Encode to packed GSM 7-bit; fails if a character has no GSM encoding
pub fn encode_gsm7(text: &str) -> Result<Vec<u8>, EncodingError> {
    let septets = gsm7_septets(text)
        .ok_or_else(|| EncodingError::UnsupportedDcs(DCS_GSM7))?;
    Ok(pack_gsm7(&septets))
}

fn gsm7_septets(text: &str) -> Option<Vec<u8>> {
    let mut septets = Vec::with_capacity(text.len());

    for ch in text.chars() {
        if let Some(pos) = GSM7_BASIC.iter().position(|&c| c == ch) {
            septets.push(pos as u8);
        } else if let Some(&(code, _)) = GSM7_EXTENSION.iter().find(|&&(_, c)| c == ch) {
            septets.push(0x1B);
            septets.push(code);
        } else {
            return None;
        }
    }

    Some(septets)
}

/// Decode from packed GSM 7-bit
pub fn decode_gsm7(data: &[u8]) -> String {
    let septets = unpack_gsm7(data);
    let mut result = String::new();
    let mut escape = false;

    for &septet in &septets {
        if escape {
            escape = false;
            if let Some(&(_, ch)) = GSM7_EXTENSION.iter().find(|&&(c, _)| c == septet) {
                result.push(ch);
            }
        } else if septet == 0x1B {
            escape = true;
        } else if (septet as usize) < GSM7_BASIC.len() {
            result.push(GSM7_BASIC[septet as usize]);
        }
    }

    result
}

/// Pack 7-bit values into octets
fn pack_gsm7(septets: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut bits_pending = 0u16;
    let mut pending_bits = 0u8;

    for &septet in septets {
        bits_pending |= (septet as u16) << pending_bits;
        pending_bits += 7;

        while pending_bits >= 8 {
            result.push((bits_pending & 0xFF) as u8);
            bits_pending >>= 8;
            pending_bits -= 8;
        }
    }

    if pending_bits > 0 {
        result.push((bits_pending & 0xFF) as u8);
    }

    result
}

/// Unpack octets into 7-bit values
fn unpack_gsm7(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut bits_pending = 0u16;
    let mut pending_bits = 0u8;

    for &byte in data {
        bits_pending |= (byte as u16) << pending_bits;
        pending_bits += 8;

        while pending_bits >= 7 {
            result.push((bits_pending & 0x7F) as u8);
            bits_pending >>= 7;
            pending_bits -= 7;
        }
    }

    result
}

/// Encode to UCS2 (big-endian UTF-16)
pub fn encode_ucs2(text: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(text.len() * 2);
    for unit in text.encode_utf16() {
        result.push((unit >> 8) as u8);
        result.push((unit & 0xFF) as u8);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gsm7_round_trip() {
        let text = "Balance: 100 NGN [ok]";
        let encoded = encode_gsm7(text).unwrap();
        assert_eq!(decode_gsm7(&encoded), text);
    }

    #[test]
    fn seven_bit_packing_is_dense() {
        // 8 septets pack into 7 octets
        let encoded = encode_gsm7("hellosms").unwrap();
        assert_eq!(encoded.len(), 7);
    }

    #[test]
    fn user_data_prefers_gsm7() {
        let (dcs, udl, _) = encode_user_data("plain text").unwrap();
        assert_eq!(dcs, DCS_GSM7);
        assert_eq!(udl, 10);
    }

    #[test]
    fn user_data_falls_back_to_ucs2() {
        let (dcs, udl, data) = encode_user_data("héllo 世界").unwrap();
        assert_eq!(dcs, DCS_UCS2);
        assert_eq!(udl as usize, data.len());
        assert_eq!(data.len() % 2, 0);
    }

    #[test]
    fn oversized_content_is_rejected() {
        let text = "a".repeat(161);
        assert!(matches!(
            encode_user_data(&text),
            Err(EncodingError::MessageTooLong(_))
        ));
    }
}
