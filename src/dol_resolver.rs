//! Resolves a DOL (PDOL/CDOL1/CDOL2/DDOL) into the concatenated terminal
//! data bytes a card asked for, tag by tag.
//!
//! The resolver is a pure function of a DOL and an [`Environment`]: it has
//! no I/O, mirroring the teacher's preference for sub-parsers with no side
//! effects. The per-tag producer table is grounded on `artemist-emvsign`'s
//! `Dol::encode`, generalised from its `HashMap<tag, Value>` lookup into an
//! explicit terminal-data table since every value here has a single
//! well-known EMV source rather than an arbitrary caller-supplied map.

use crate::parsers::dol::DolEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Msd,
    Vsdc,
    QvsdcMChip,
    Cda,
}

/// Terminal-side data snapshotted once per scan, before GPO, and reused for
/// both the PDOL and the CDOL1/CDOL2 resolution later in the same scan.
#[derive(Debug, Clone)]
pub struct Environment {
    pub amount_authorised: u64,
    pub amount_other: u64,
    pub terminal_country: [u8; 2],
    pub tx_currency: [u8; 2],
    pub today_bcd: [u8; 3],
    pub time_bcd: [u8; 3],
    pub tx_type: u8,
    pub unpredictable_number: [u8; 4],
    pub transaction_type: TransactionType,
    /// ATC (`9F36`) and IAD (`9F10`) are only known once the card has been
    /// talked to once already; `None` during PDOL resolution.
    pub atc: Option<Vec<u8>>,
    pub iad: Option<Vec<u8>>,
}

impl Environment {
    fn terminal_type(&self) -> u8 {
        0x22
    }

    fn terminal_capabilities(&self) -> [u8; 3] {
        match self.transaction_type {
            TransactionType::Msd => [0x60, 0x00, 0x00],
            TransactionType::Vsdc => [0xE0, 0xA8, 0x00],
            TransactionType::QvsdcMChip => [0xE0, 0xF8, 0x00],
            TransactionType::Cda => [0xE0, 0xF8, 0xC8],
        }
    }

    fn additional_terminal_capabilities(&self) -> [u8; 5] {
        match self.transaction_type {
            TransactionType::Msd => [0x60, 0x00, 0x00, 0x00, 0x00],
            _ => [0xF0, 0x00, 0xF0, 0x01, 0x00],
        }
    }

    fn ttq(&self) -> [u8; 4] {
        match self.transaction_type {
            TransactionType::Msd => [0x84, 0x00, 0x00, 0x00],
            TransactionType::Vsdc => [0x36, 0x00, 0x00, 0x00],
            TransactionType::QvsdcMChip => [0x36, 0x80, 0x00, 0x00],
            TransactionType::Cda => [0x36, 0xC0, 0x00, 0x00],
        }
    }

    fn producer(&self, tag: &[u8]) -> Option<Vec<u8>> {
        use crate::parsers::numeric::encode_bcd_numeric;
        Some(match tag {
            [0x9F, 0x02] => encode_bcd_numeric(self.amount_authorised, 6),
            [0x9F, 0x03] => encode_bcd_numeric(self.amount_other, 6),
            [0x9F, 0x1A] => self.terminal_country.to_vec(),
            [0x95] => vec![0x00; 5],
            [0x5F, 0x2A] => self.tx_currency.to_vec(),
            [0x9A] => self.today_bcd.to_vec(),
            [0x9C] => vec![self.tx_type],
            [0x9F, 0x37] => self.unpredictable_number.to_vec(),
            [0x9F, 0x35] => vec![self.terminal_type()],
            [0x9F, 0x33] => self.terminal_capabilities().to_vec(),
            [0x9F, 0x40] => self.additional_terminal_capabilities().to_vec(),
            [0x9F, 0x66] => self.ttq().to_vec(),
            [0x9F, 0x21] => self.time_bcd.to_vec(),
            [0x9F, 0x36] => self.atc.clone().unwrap_or_default(),
            [0x9F, 0x10] => self.iad.clone().unwrap_or_default(),
            _ => return None,
        })
    }
}

/// Right-truncates or right-zero-pads `value` to exactly `len` bytes.
fn fit(mut value: Vec<u8>, len: usize) -> Vec<u8> {
    value.truncate(len);
    value.resize(len, 0);
    value
}

/// Resolves a full DOL into its concatenated terminal-data encoding, in
/// DOL order. Unknown tags contribute `length` zero bytes.
pub fn resolve(entries: &[DolEntry], env: &Environment) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let tag = &entry.tag[..entry.tag_len];
        let produced = env.producer(tag).unwrap_or_default();
        out.extend(fit(produced, entry.length as usize));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::dol::parse;

    fn sample_env() -> Environment {
        Environment {
            amount_authorised: 100,
            amount_other: 0,
            terminal_country: [0x08, 0x40],
            tx_currency: [0x08, 0x40],
            today_bcd: [0x25, 0x12, 0x31],
            time_bcd: [0x12, 0x00, 0x00],
            tx_type: 0x00,
            unpredictable_number: [0xDE, 0xAD, 0xBE, 0xEF],
            transaction_type: TransactionType::QvsdcMChip,
            atc: None,
            iad: None,
        }
    }

    #[test]
    fn resolves_amount_as_bcd() {
        let dol = parse(&[0x9F, 0x02, 0x06]).unwrap();
        let resolved = resolve(&dol, &sample_env());
        assert_eq!(resolved, vec![0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn unknown_tag_is_zero_padded() {
        let dol = parse(&[0x9F, 0x5A, 0x03]).unwrap();
        let resolved = resolve(&dol, &sample_env());
        assert_eq!(resolved, vec![0x00, 0x00, 0x00]);
    }

    #[test]
    fn concatenates_in_dol_order() {
        let dol = parse(&[0x9A, 0x03, 0x9C, 0x01]).unwrap();
        let resolved = resolve(&dol, &sample_env());
        assert_eq!(resolved, vec![0x25, 0x12, 0x31, 0x00]);
    }

    #[test]
    fn atc_absent_pads_zero_for_pdol() {
        let dol = parse(&[0x9F, 0x36, 0x02]).unwrap();
        let resolved = resolve(&dol, &sample_env());
        assert_eq!(resolved, vec![0x00, 0x00]);
    }

    #[test]
    fn atc_present_truncated_to_length() {
        let mut env = sample_env();
        env.atc = Some(vec![0x00, 0x05]);
        let dol = parse(&[0x9F, 0x36, 0x01]).unwrap();
        let resolved = resolve(&dol, &env);
        assert_eq!(resolved, vec![0x00]);
    }
}
