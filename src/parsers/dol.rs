//! Data Object List parsing and encoding: PDOL, CDOL1/2, DDOL.
//!
//! A DOL is a sequence of `(tag, length)` pairs with no value bytes of its
//! own; it tells the reader (terminal) what to supply, concatenated in
//! order, in response to GPO/GENERATE AC/INTERNAL AUTHENTICATE.

use crate::ber::IResult;
use nom::bytes::complete::take;
use nom::number::complete::be_u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DolEntry {
    pub tag: [u8; 2],
    pub tag_len: usize,
    pub length: u8,
}

impl DolEntry {
    pub fn tag_hex(&self) -> String {
        hex::encode_upper(&self.tag[..self.tag_len])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DolError {
    TruncatedTag,
}

fn take_dol_tag(data: &[u8]) -> IResult<[u8; 2]> {
    let (rest, first) = be_u8(data)?;
    if first & 0b0001_1111 != 0b0001_1111 {
        Ok((rest, [first, 0]))
    } else {
        let (rest2, second) = take(1usize)(rest)?;
        Ok((rest2, [first, second[0]]))
    }
}

/// Parses a DOL: repeatedly reads a BER tag then a single length byte.
/// Stops cleanly at exhaustion; a trailing tag with no length byte is
/// ignored rather than treated as an error, per spec.
pub fn parse(mut data: &[u8]) -> Result<Vec<DolEntry>, DolError> {
    let mut entries = Vec::new();
    while !data.is_empty() {
        let tag_len = if data[0] & 0b0001_1111 != 0b0001_1111 { 1 } else { 2 };
        let (rest, tag) = match take_dol_tag(data) {
            Ok(v) => v,
            Err(_) => break,
        };
        if rest.is_empty() {
            break; // trailing tag with no length: ignored
        }
        let length = rest[0];
        entries.push(DolEntry {
            tag,
            tag_len,
            length,
        });
        data = &rest[1..];
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_tag() {
        let entries = parse(&[0x9A, 0x03]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag_hex(), "9A");
        assert_eq!(entries[0].length, 3);
    }

    #[test]
    fn two_byte_tag() {
        let entries = parse(&[0x9F, 0x37, 0x04]).unwrap();
        assert_eq!(entries[0].tag_hex(), "9F37");
        assert_eq!(entries[0].length, 4);
    }

    #[test]
    fn multiple_entries_pdol() {
        // 9F38 03 -> PDOL requesting 9F37 (4 bytes).
        let entries = parse(&[0x9F, 0x37, 0x04]).unwrap();
        assert_eq!(entries[0].length, 4);
    }

    #[test]
    fn trailing_tag_without_length_ignored() {
        let entries = parse(&[0x9A, 0x03, 0x9C]).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn empty_dol_is_empty() {
        assert!(parse(&[]).unwrap().is_empty());
    }
}
