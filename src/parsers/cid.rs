//! Cryptogram Information Data (tag `9F27`) decoding.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum AcType {
    Aac = 0b00,
    Tc = 0b01,
    Arqc = 0b10,
    Rfu = 0b11,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cid {
    pub ac_type: AcType,
    pub advice: bool,
    pub reason: u8,
}

impl Cid {
    /// Decodes a single CID byte: top 2 bits select the AC type, bit 6
    /// (0x40) is the advice flag, bottom 3 bits are a reason code.
    pub fn decode(byte: u8) -> Self {
        let ac_type = match byte >> 6 {
            0b00 => AcType::Aac,
            0b01 => AcType::Tc,
            0b10 => AcType::Arqc,
            _ => AcType::Rfu,
        };
        Self {
            ac_type,
            advice: byte & 0b0000_1000 != 0,
            reason: byte & 0b0000_0111,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arqc_no_advice() {
        let cid = Cid::decode(0x80); // 1000_0000
        assert_eq!(cid.ac_type, AcType::Arqc);
        assert!(!cid.advice);
    }

    #[test]
    fn tc_with_advice() {
        let cid = Cid::decode(0b0101_1011);
        assert_eq!(cid.ac_type, AcType::Tc);
        assert!(cid.advice);
        assert_eq!(cid.reason, 0b011);
    }
}
