//! ISO/IEC 7816-4 command/response APDU types and EMV command builders.
//!
//! Mirrors the teacher's hand-rolled `core/apdu.rs` + `cmd.rs` split rather
//! than the external `apdu` crate (see DESIGN.md for why): a plain
//! `Request`/`Response` pair with case-aware encoding.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length. `Some(0)` means Le=0x00 (256 bytes,
    /// "give me everything"); `None` means no Le byte at all (Case 1/3).
    pub le: Option<u8>,
}

impl Request {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: data.into(),
            le: None,
        }
    }

    pub fn expect(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Encodes the command exactly as it goes on the wire: `CLA INS P1 P2
    /// [Lc data] [Le]`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.data.len());
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(le);
        } else if self.data.is_empty() {
            // Case 2 without an explicit Le: callers that build commands by
            // hand (select, read record, get data, generate ac) always set
            // an explicit Le via `expect`; this branch only fires for
            // Case-1 commands, which correctly emit nothing further.
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u8, pub u8);

impl Status {
    pub const OK: Status = Status(0x90, 0x00);

    pub fn word(&self) -> u16 {
        ((self.0 as u16) << 8) | self.1 as u16
    }

    pub fn is_success(&self) -> bool {
        *self == Self::OK
    }

    /// `61XX`: more response data available via GET RESPONSE.
    pub fn more_data_available(&self) -> Option<u8> {
        (self.0 == 0x61).then_some(self.1)
    }

    /// `6CXX`: wrong Le, retry with Le=XX.
    pub fn retry_with_le(&self) -> Option<u8> {
        (self.0 == 0x6C).then_some(self.1)
    }

    /// A human mnemonic for logging, covering the status words the
    /// transaction engine treats specially.
    pub fn mnemonic(&self) -> &'static str {
        match (self.0, self.1) {
            (0x90, 0x00) => "OK",
            (0x61, _) => "MORE_DATA_AVAILABLE",
            (0x62, 0x83) => "FILE_DEACTIVATED",
            (0x62, 0x84) => "BAD_FCI",
            (0x6A, 0x81) => "NOT_SUPPORTED",
            (0x6A, 0x82) => "FILE_NOT_FOUND",
            (0x6A, 0x83) => "RECORD_NOT_FOUND",
            (0x6A, 0x86) => "INCORRECT_P1P2",
            (0x6A, 0x88) => "DATA_NOT_FOUND",
            (0x6C, _) => "WRONG_LE",
            (0x6D, 0x00) => "INSTRUCTION_NOT_SUPPORTED",
            (0x6E, 0x00) => "CLASS_NOT_SUPPORTED",
            (0xFF, 0xFF) => "TRANSPORT_FAILURE",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X} ({})", self.0, self.1, self.mnemonic())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    pub status: Status,
}

impl Response {
    pub fn from_wire(mut raw: Vec<u8>) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let sw2 = raw.pop().unwrap();
        let sw1 = raw.pop().unwrap();
        Some(Self {
            data: raw,
            status: Status(sw1, sw2),
        })
    }

    pub fn failed() -> Self {
        Self {
            data: Vec::new(),
            status: Status(0xFF, 0xFF),
        }
    }
}

pub const PPSE_NAME: &[u8] = b"2PAY.SYS.DDF01";
pub const PSE_NAME: &[u8] = b"1PAY.SYS.DDF01";

/// `SELECT` by DF name (PPSE, PSE, or an AID).
pub fn select_by_name(name: &[u8]) -> Request {
    Request::new(0x00, 0xA4, 0x04, 0x00, name.to_vec()).expect(0x00)
}

/// `GET PROCESSING OPTIONS`. If `pdol_data` is non-empty it's wrapped as
/// `83 LL data`; otherwise the minimal Case-2 form is sent.
pub fn gpo(pdol_data: &[u8]) -> Request {
    let mut cmd_data = Vec::with_capacity(pdol_data.len() + 2);
    cmd_data.push(0x83);
    cmd_data.push(pdol_data.len() as u8);
    cmd_data.extend_from_slice(pdol_data);
    Request::new(0x80, 0xA8, 0x00, 0x00, cmd_data).expect(0x00)
}

/// `READ RECORD(sfi, record)`; P2 = `(sfi << 3) | 4`.
pub fn read_record(sfi: u8, record: u8) -> Request {
    Request::new(0x00, 0xB2, record, (sfi << 3) | 0b100, Vec::new()).expect(0x00)
}

/// `GET DATA(tag)`, tag given as its two-byte hex form.
pub fn get_data(tag_hi: u8, tag_lo: u8) -> Request {
    Request::new(0x80, 0xCA, tag_hi, tag_lo, Vec::new()).expect(0x00)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceControl {
    Aac,
    Tc,
    Arqc,
}

impl ReferenceControl {
    pub fn p1(self) -> u8 {
        match self {
            ReferenceControl::Aac => 0x00,
            ReferenceControl::Tc => 0x40,
            ReferenceControl::Arqc => 0x80,
        }
    }
}

/// `GENERATE AC`. `cdol_data` may be empty, in which case the Case-1 form
/// `80 AE <p1> 00 00` is sent.
pub fn generate_ac(reference_control: ReferenceControl, cdol_data: &[u8]) -> Request {
    if cdol_data.is_empty() {
        Request::new(0x80, 0xAE, reference_control.p1(), 0x00, Vec::new()).expect(0x00)
    } else {
        Request::new(0x80, 0xAE, reference_control.p1(), 0x00, cdol_data.to_vec()).expect(0x00)
    }
}

/// `GET RESPONSE`, used to pull the remainder of a `61XX` chained reply.
pub fn get_response(le: u8) -> Request {
    Request::new(0x00, 0xC0, 0x00, 0x00, Vec::new()).expect(le)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_encodes_case4() {
        let req = select_by_name(b"1PAY.SYS.DDF01");
        let bytes = req.encode();
        assert_eq!(bytes[0..4], [0x00, 0xA4, 0x04, 0x00]);
        assert_eq!(bytes[4], 14);
        assert_eq!(&bytes[5..19], b"1PAY.SYS.DDF01");
        assert_eq!(bytes[19], 0x00);
    }

    #[test]
    fn gpo_minimal_when_pdol_empty() {
        let req = gpo(&[]);
        assert_eq!(req.encode(), vec![0x80, 0xA8, 0x00, 0x00, 0x02, 0x83, 0x00, 0x00]);
    }

    #[test]
    fn read_record_p2_packs_sfi() {
        let req = read_record(1, 1);
        assert_eq!(req.p1, 1);
        assert_eq!(req.p2, 0b0000_1100);
    }

    #[test]
    fn generate_ac_case1_when_no_cdol() {
        let req = generate_ac(ReferenceControl::Arqc, &[]);
        assert_eq!(req.encode(), vec![0x80, 0xAE, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn status_mnemonics() {
        assert_eq!(Status(0x90, 0x00).mnemonic(), "OK");
        assert_eq!(Status(0x6A, 0x83).mnemonic(), "RECORD_NOT_FOUND");
    }

    #[test]
    fn response_from_wire_splits_sw() {
        let res = Response::from_wire(vec![0x01, 0x02, 0x90, 0x00]).unwrap();
        assert_eq!(res.data, vec![0x01, 0x02]);
        assert_eq!(res.status, Status::OK);
    }
}
