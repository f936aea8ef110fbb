//! Cardholder Verification Method list (tag `8E`).

use num_enum::{IntoPrimitive, TryFromPrimitive};
use scroll::{Pread, BE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CvmMethod {
    Fail = 0x00,
    PlaintextPin = 0x01,
    EncipheredPinOnline = 0x02,
    PlaintextPinAndSignature = 0x03,
    EncipheredPinOffline = 0x04,
    EncipheredPinAndSignature = 0x05,
    Signature = 0x1E,
    NoCvm = 0x1F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CvRule {
    pub method: Option<CvmMethod>,
    pub raw_method: u8,
    pub condition: u8,
    /// Bit 7 of the method byte: apply the next rule if this one fails.
    pub continue_on_fail: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CvmList {
    pub amount_x: u32,
    pub amount_y: u32,
    pub rules: Vec<CvRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvmError {
    TooShort,
    BadRuleCount,
}

/// Parses a CVM list: a 16-byte header (two 32-bit big-endian amounts is 8
/// bytes, but EMV's header reserves 16 with the upper bytes normally zero;
/// we read exactly the 8 amount bytes the spec defines) followed by 2-byte
/// rules.
pub fn parse(data: &[u8]) -> Result<CvmList, CvmError> {
    if data.len() < 8 {
        return Err(CvmError::TooShort);
    }
    let mut offset = 0usize;
    let amount_x: u32 = data.pread_with(offset, BE).map_err(|_| CvmError::TooShort)?;
    offset += 4;
    let amount_y: u32 = data.pread_with(offset, BE).map_err(|_| CvmError::TooShort)?;
    offset += 4;

    let rule_bytes = &data[offset..];
    if rule_bytes.len() % 2 != 0 {
        return Err(CvmError::BadRuleCount);
    }
    let rules = rule_bytes
        .chunks_exact(2)
        .map(|chunk| {
            let raw_method = chunk[0] & 0x7F;
            CvRule {
                method: CvmMethod::try_from(raw_method).ok(),
                raw_method,
                condition: chunk[1],
                continue_on_fail: chunk[0] & 0x80 != 0,
            }
        })
        .collect();

    Ok(CvmList {
        amount_x,
        amount_y,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_rule() {
        // amount_x=0, amount_y=0, one rule: signature, condition always.
        let data = [0, 0, 0, 0, 0, 0, 0, 0, 0x1E, 0x03];
        let list = parse(&data).unwrap();
        assert_eq!(list.amount_x, 0);
        assert_eq!(list.rules.len(), 1);
        assert_eq!(list.rules[0].method, Some(CvmMethod::Signature));
        assert!(!list.rules[0].continue_on_fail);
    }

    #[test]
    fn continue_on_fail_bit() {
        let data = [0, 0, 0, 0, 0, 0, 0, 0, 0x82, 0x00]; // enciphered PIN online + continue
        let list = parse(&data).unwrap();
        assert!(list.rules[0].continue_on_fail);
        assert_eq!(list.rules[0].method, Some(CvmMethod::EncipheredPinOnline));
    }

    #[test]
    fn too_short_rejected() {
        assert_eq!(parse(&[0; 4]).unwrap_err(), CvmError::TooShort);
    }

    #[test]
    fn odd_rule_bytes_rejected() {
        let mut data = vec![0u8; 8];
        data.push(0x01);
        assert_eq!(parse(&data).unwrap_err(), CvmError::BadRuleCount);
    }
}
