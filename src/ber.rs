//! ISO/IEC 7816-4 flavoured BER-TLV (Tag-Length-Value) codec.
//!
//! This is the EMV Book 3, Annex B dialect of BER: tags are hex-addressed
//! rather than namespaced, lengths never exceed what fits in a `usize`, and
//! indefinite length is a historical wart rather than a feature anyone
//! relies on. The codec never blocks and never panics on malformed input —
//! structural problems are collected into [`ParseResult::errors`] and the
//! caller decides what to do with a partial result.

use byteorder::{BigEndian, ByteOrder};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use std::collections::BTreeMap;

use crate::tags::is_template_candidate;

pub type IResult<'a, T> = nom::IResult<&'a [u8], T>;

const MAX_DEPTH: usize = 10;
const MAX_TAG_BYTES: usize = 4;

/// A single decoded BER-TLV node, either a leaf value or a template holding
/// further nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Primitive { tag: Vec<u8>, value: Vec<u8> },
    Constructed { tag: Vec<u8>, children: Vec<Node> },
}

impl Node {
    pub fn tag(&self) -> &[u8] {
        match self {
            Node::Primitive { tag, .. } => tag,
            Node::Constructed { tag, .. } => tag,
        }
    }

    pub fn tag_hex(&self) -> String {
        hex::encode_upper(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    TruncatedTag,
    TagTooLong,
    TruncatedLength,
    LengthOfLengthTooLarge(u8),
    IndefiniteLengthNotAllowed,
    LengthExceedsContainer { declared: usize, available: usize },
    RecursionDepthExceeded,
}

impl std::fmt::Display for TlvError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlvError::TruncatedTag => write!(f, "truncated tag field"),
            TlvError::TagTooLong => write!(f, "tag field longer than 4 bytes"),
            TlvError::TruncatedLength => write!(f, "truncated length field"),
            TlvError::LengthOfLengthTooLarge(n) => {
                write!(f, "long-form length-of-length byte 0x{n:02X} exceeds 0x84")
            }
            TlvError::IndefiniteLengthNotAllowed => {
                write!(f, "indefinite length (0x80) used outside a template")
            }
            TlvError::LengthExceedsContainer {
                declared,
                available,
            } => write!(
                f,
                "declared length {declared} exceeds {available} bytes remaining in container"
            ),
            TlvError::RecursionDepthExceeded => write!(f, "template nesting exceeds 10 levels"),
        }
    }
}

/// Result of a [`parse`] call: a flattened primitive tag map, the node
/// tree, and the structural errors/warnings encountered along the way.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub nodes: Vec<Node>,
    pub tags: BTreeMap<String, Vec<u8>>,
    pub errors: Vec<TlvError>,
    pub warnings: Vec<String>,
    pub known_count: usize,
    pub unknown_count: usize,
    pub max_depth: usize,
}

/// Parses a tag. If bits 1-5 of the first byte are all set, this is a
/// multi-byte tag, continuing until (and including) the first subsequent
/// byte without bit 8 set, capped at [`MAX_TAG_BYTES`] total bytes.
fn take_tag(data: &[u8]) -> IResult<&[u8]> {
    let (rest, short) = take(1usize)(data)?;
    if short[0] & 0b0001_1111 != 0b0001_1111 {
        return Ok((rest, short));
    }
    let mut tag_len = 2usize;
    for b in rest.iter().take(MAX_TAG_BYTES - 1) {
        if b & (1 << 7) != 0 {
            tag_len += 1;
        } else {
            break;
        }
    }
    if tag_len > MAX_TAG_BYTES {
        return Err(nom::Err::Error(nom::error::Error::new(
            data,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    take(tag_len)(data)
}

/// The outcome of parsing a length field: either a concrete byte count, or
/// the BER indefinite-length marker (`0x80`), which in the ISO 7816/EMV
/// subset means "consume the rest of the enclosing container".
enum Len {
    Definite(usize),
    Indefinite,
}

fn take_len(data_: &[u8]) -> IResult<Len> {
    let (data, lenlen) = be_u8(data_)?;
    if lenlen <= 127 {
        Ok((data, Len::Definite(lenlen as usize)))
    } else if lenlen == 0x80 {
        Ok((data, Len::Indefinite))
    } else {
        let lensize = (lenlen & 0b0111_1111) as usize;
        if lensize > 4 {
            Err(nom::Err::Error(nom::error::Error::new(
                data_,
                nom::error::ErrorKind::TooLarge,
            )))
        } else if data.len() < lensize {
            Err(nom::Err::Incomplete(nom::Needed::new(lensize - data.len())))
        } else {
            Ok((
                &data[lensize..],
                Len::Definite(BigEndian::read_uint(data, lensize) as usize),
            ))
        }
    }
}

/// Parses the next `(tag, value)` pair out of a BER-TLV blob, for callers
/// that want to walk a known-good structure by hand.
pub fn parse_next(data: &[u8]) -> IResult<(&[u8], &[u8])> {
    let (data, tag) = take_tag(data)?;
    let (data, len) = take_len(data)?;
    match len {
        Len::Definite(len) => {
            let (data, val) = take(len)(data)?;
            Ok((data, (tag, val)))
        }
        Len::Indefinite => Ok((&[], (tag, data))),
    }
}

/// Iterates top-level `(tag, value)` pairs in `data`, stopping (without
/// error) at the first malformed entry.
pub fn iter(data: &[u8]) -> impl Iterator<Item = Result<(&[u8], &[u8]), TlvError>> {
    struct Iter<'a>(&'a [u8]);
    impl<'a> Iterator for Iter<'a> {
        type Item = Result<(&'a [u8], &'a [u8]), TlvError>;
        fn next(&mut self) -> Option<Self::Item> {
            if self.0.is_empty() {
                return None;
            }
            match parse_next(self.0) {
                Ok((rest, pair)) => {
                    self.0 = rest;
                    Some(Ok(pair))
                }
                Err(_) => {
                    self.0 = &[];
                    Some(Err(TlvError::TruncatedTag))
                }
            }
        }
    }
    Iter(data)
}

/// Recursively decodes `data` into a [`ParseResult`], validating tag
/// catalogue membership when `validate` is set (unknown tags become
/// warnings, never errors).
pub fn parse(data: &[u8], validate: bool) -> ParseResult {
    let mut result = ParseResult::default();
    parse_into(data, 0, &mut result, validate);
    result
}

fn parse_into(mut data: &[u8], depth: usize, result: &mut ParseResult, validate: bool) -> Vec<Node> {
    if depth > result.max_depth {
        result.max_depth = depth;
    }
    if depth >= MAX_DEPTH {
        result.errors.push(TlvError::RecursionDepthExceeded);
        return Vec::new();
    }

    let mut nodes = Vec::new();
    while !data.is_empty() {
        let tag_res = take_tag(data);
        let (rest, tag) = match tag_res {
            Ok(v) => v,
            Err(_) => {
                result.errors.push(TlvError::TagTooLong);
                break;
            }
        };

        let len_res = take_len(rest);
        let (rest, len) = match len_res {
            Ok(v) => v,
            Err(nom::Err::Incomplete(_)) => {
                result.errors.push(TlvError::TruncatedLength);
                break;
            }
            Err(_) => {
                result.errors.push(TlvError::LengthOfLengthTooLarge(
                    *rest.first().unwrap_or(&0),
                ));
                break;
            }
        };

        let (container_rest, value, consumed_all): (&[u8], &[u8], bool) = match len {
            Len::Definite(len) => {
                if len > rest.len() {
                    result.errors.push(TlvError::LengthExceedsContainer {
                        declared: len,
                        available: rest.len(),
                    });
                    break;
                }
                (&rest[len..], &rest[..len], false)
            }
            Len::Indefinite => (&[], rest, true),
        };

        let tag_hex = hex::encode_upper(tag);
        let known = crate::tags::lookup(&tag_hex).is_some();
        if known {
            result.known_count += 1;
        } else {
            result.unknown_count += 1;
            if validate {
                result
                    .warnings
                    .push(format!("unknown tag during validated parse: {tag_hex}"));
            }
        }

        let node = if is_template_candidate(&tag_hex, tag, value) {
            let children = parse_into(value, depth + 1, result, validate);
            Node::Constructed {
                tag: tag.to_vec(),
                children,
            }
        } else {
            result.tags.insert(tag_hex, value.to_vec());
            Node::Primitive {
                tag: tag.to_vec(),
                value: value.to_vec(),
            }
        };
        nodes.push(node);

        data = container_rest;
        if consumed_all {
            break;
        }
    }
    nodes
}

/// Re-encodes a node tree. Lengths are always emitted in the shortest legal
/// BER form; this is the structural inverse of [`parse`] for a tree the
/// caller assembled (or that round-trips a [`parse`] result).
pub fn encode(node: &Node) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(node, &mut out);
    out
}

fn encode_into(node: &Node, out: &mut Vec<u8>) {
    let (tag, value) = match node {
        Node::Primitive { tag, value } => (tag, value.clone()),
        Node::Constructed { tag, children } => {
            let mut body = Vec::new();
            for child in children {
                encode_into(child, &mut body);
            }
            (tag, body)
        }
    };
    out.extend_from_slice(tag);
    encode_len(value.len(), out);
    out.extend_from_slice(&value);
}

fn encode_len(len: usize, out: &mut Vec<u8>) {
    if len <= 127 {
        out.push(len as u8);
    } else {
        let bytes_needed = ((usize::BITS - len.leading_zeros() + 7) / 8) as usize;
        out.push(0x80 | bytes_needed as u8);
        for i in (0..bytes_needed).rev() {
            out.push((len >> (8 * i)) as u8);
        }
    }
}

/// Does this tag represent a constructed value? Determined purely by bit 6
/// of the first tag byte, independent of the always-primitive override
/// list used by [`is_template_candidate`].
pub fn is_constructed(tag: &[u8]) -> bool {
    tag.first().unwrap_or(&0) & (1 << 5) != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_constructed_0x6f() {
        assert!(is_constructed(&[0x6F])); // FCI Template.
    }
    #[test]
    fn test_is_constructed_0x84() {
        assert!(!is_constructed(&[0x84])); // DF Name.
    }

    #[test]
    fn test_take_tag_multibyte() {
        let (rest, tag) = take_tag(&[0x9F, 0x38, 0x03]).expect("tag");
        assert_eq!(tag, &[0x9F, 0x38]);
        assert_eq!(rest, &[0x03]);
    }

    #[test]
    fn test_take_tag_too_long_rejected() {
        // 5-byte tag: 1F followed by four continuation bytes all with bit 8 set.
        let data = [0x1F, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        assert!(take_tag(&data).is_err());
    }

    #[test]
    fn test_take_length_long_form_0x84_accepted() {
        let (rest, len) = take_len(&[0x84, 0x00, 0x00, 0x01, 0x00, 0xED]).expect("len");
        assert!(matches!(len, Len::Definite(256)));
        assert_eq!(rest, &[0xED]);
    }

    #[test]
    fn test_take_length_0x85_rejected() {
        assert!(take_len(&[0x85, 0, 0, 0, 0, 0, 0xED]).is_err());
    }

    #[test]
    fn test_take_length_indefinite_accepted() {
        let (_, len) = take_len(&[0x80, 0xED]).expect("len");
        assert!(matches!(len, Len::Indefinite));
    }

    #[test]
    fn test_parse_select_ppse_response() {
        // SELECT PPSE response for a card offering Visa as its sole AID.
        let data = hex::decode(
            "6F29840E325041592E5359532E4444463031A517BF0C1461124F07A0000000031010500456495341870101",
        )
        .unwrap();
        let result = parse(&data, true);
        assert_eq!(result.tags.get("84").unwrap(), b"2PAY.SYS.DDF01");
        assert_eq!(
            result.tags.get("4F").unwrap(),
            &hex::decode("A0000000031010").unwrap()
        );
    }

    #[test]
    fn test_parse_length_overrun_is_recorded_not_raised() {
        let data = [0x5A, 0x05, 0x01, 0x02]; // declares 5 bytes, only 2 present
        let result = parse(&data, false);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0],
            TlvError::LengthExceedsContainer { .. }
        ));
    }

    #[test]
    fn test_encode_round_trip_primitive() {
        let node = Node::Primitive {
            tag: vec![0x5A],
            value: vec![0x47, 0x61, 0x74],
        };
        let bytes = encode(&node);
        assert_eq!(bytes, vec![0x5A, 0x03, 0x47, 0x61, 0x74]);
    }

    #[test]
    fn test_encode_round_trip_constructed() {
        let node = Node::Constructed {
            tag: vec![0x70],
            children: vec![Node::Primitive {
                tag: vec![0x9F, 0x02],
                value: vec![0x00; 6],
            }],
        };
        let bytes = encode(&node);
        let reparsed = parse(&bytes, false);
        assert!(reparsed.tags.contains_key("9F02"));
    }

    #[test]
    fn test_always_primitive_override_82_aip() {
        // 0x82 (AIP) is constructed-bit-clear but also on the always-primitive
        // override list; a 2-byte value should never be treated as a template.
        let data = [0x82, 0x02, 0x38, 0x00];
        let result = parse(&data, false);
        assert_eq!(result.tags.get("82").unwrap(), &vec![0x38, 0x00]);
    }
}
