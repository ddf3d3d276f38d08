//! SCCP Addressing

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Global Title, GTI 0100 form (translation type + numbering plan +
/// encoding scheme + nature of address; the common ITU shape)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalTitle {
    pub translation_type: u8,
    pub numbering_plan: u8,
    pub encoding_scheme: u8,
    pub nature_of_address: u8,
    pub digits: String,
}

impl GlobalTitle {
    /// E.164 international global title
    pub fn e164(digits: &str) -> Self {
        Self {
            translation_type: 0,
            numbering_plan: 1,
            encoding_scheme: if digits.len() % 2 == 0 { 2 } else { 1 },
            nature_of_address: 4,
            digits: digits.to_string(),
        }
    }

    pub const GTI: u8 = 4;

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.translation_type);
        buf.put_u8((self.encoding_scheme & 0x0F) | ((self.numbering_plan & 0x0F) << 4));
        buf.put_u8(self.nature_of_address & 0x7F);
        buf.put_slice(&encode_bcd_digits(&self.digits));
        buf
    }

    pub fn decode(mut data: Bytes) -> Option<Self> {
        if data.remaining() < 3 {
            return None;
        }
        let tt = data.get_u8();
        let np_es = data.get_u8();
        let noa = data.get_u8();
        Some(Self {
            translation_type: tt,
            numbering_plan: (np_es >> 4) & 0x0F,
            encoding_scheme: np_es & 0x0F,
            nature_of_address: noa & 0x7F,
            digits: decode_bcd_digits(&data),
        })
    }
}

/// Address indicator octet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressIndicator {
    /// Route on GT (true) or on SSN/PC
    pub routing_indicator: bool,
    /// Global Title Indicator (0 = none, 4 = full GT)
    pub gti: u8,
    pub ssn_indicator: bool,
    pub pc_indicator: bool,
}

impl AddressIndicator {
    pub fn encode(&self) -> u8 {
        let mut ai = 0u8;
        if self.routing_indicator {
            ai |= 0x40;
        }
        ai |= (self.gti & 0x0F) << 2;
        if self.ssn_indicator {
            ai |= 0x02;
        }
        if self.pc_indicator {
            ai |= 0x01;
        }
        ai
    }

    pub fn decode(v: u8) -> Self {
        Self {
            routing_indicator: (v & 0x40) != 0,
            gti: (v >> 2) & 0x0F,
            ssn_indicator: (v & 0x02) != 0,
            pc_indicator: (v & 0x01) != 0,
        }
    }
}

/// SCCP party address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SccpAddress {
    pub address_indicator: AddressIndicator,
    pub global_title: Option<GlobalTitle>,
    pub point_code: Option<u32>,
    pub subsystem_number: Option<u8>,
}

impl SccpAddress {
    /// Address routed on SSN + point code
    pub fn from_ssn_pc(ssn: u8, pc: u32) -> Self {
        Self {
            address_indicator: AddressIndicator {
                routing_indicator: false,
                gti: 0,
                ssn_indicator: true,
                pc_indicator: true,
            },
            global_title: None,
            point_code: Some(pc),
            subsystem_number: Some(ssn),
        }
    }

    /// Address routed on global title
    pub fn from_gt(gt: GlobalTitle, ssn: Option<u8>) -> Self {
        Self {
            address_indicator: AddressIndicator {
                routing_indicator: true,
                gti: GlobalTitle::GTI,
                ssn_indicator: ssn.is_some(),
                pc_indicator: false,
            },
            global_title: Some(gt),
            point_code: None,
            subsystem_number: ssn,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.address_indicator.encode());

        if self.address_indicator.pc_indicator {
            // ITU format: 14-bit PC in 2 bytes
            buf.put_u16_le(self.point_code.unwrap_or(0) as u16);
        }

        if self.address_indicator.ssn_indicator {
            buf.put_u8(self.subsystem_number.unwrap_or(0));
        }

        if self.address_indicator.gti > 0 {
            if let Some(ref gt) = self.global_title {
                buf.put_slice(&gt.encode());
            }
        }

        buf
    }

    pub fn decode(mut data: Bytes) -> Option<Self> {
        if data.remaining() < 1 {
            return None;
        }

        let ai = AddressIndicator::decode(data.get_u8());

        let point_code = if ai.pc_indicator {
            if data.remaining() < 2 {
                return None;
            }
            Some(data.get_u16_le() as u32)
        } else {
            None
        };

        let subsystem_number = if ai.ssn_indicator {
            if data.remaining() < 1 {
                return None;
            }
            Some(data.get_u8())
        } else {
            None
        };

        let global_title = if ai.gti == GlobalTitle::GTI {
            Some(GlobalTitle::decode(data)?)
        } else {
            None
        };

        Some(Self {
            address_indicator: ai,
            global_title,
            point_code,
            subsystem_number,
        })
    }
}

/// Pack digits into BCD, low nibble first, 0xF filler for odd counts
fn encode_bcd_digits(digits: &str) -> Vec<u8> {
    let values: Vec<u8> = digits
        .chars()
        .filter_map(|c| c.to_digit(10).map(|d| d as u8))
        .collect();

    let mut result = Vec::with_capacity((values.len() + 1) / 2);
    for chunk in values.chunks(2) {
        let byte = if chunk.len() == 2 {
            chunk[0] | (chunk[1] << 4)
        } else {
            chunk[0] | 0xF0
        };
        result.push(byte);
    }

    result
}

fn decode_bcd_digits(data: &Bytes) -> String {
    let mut result = String::new();
    for &byte in data.iter() {
        let low = byte & 0x0F;
        let high = (byte >> 4) & 0x0F;
        if low < 10 {
            result.push(char::from_digit(low as u32, 10).unwrap());
        }
        if high < 10 {
            result.push(char::from_digit(high as u32, 10).unwrap());
        }
    }
    result
}
