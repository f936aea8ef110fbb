//! Application Interchange Profile (tag `82`) decoding.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AipCapabilities {
    pub sda: bool,
    pub dda: bool,
    pub cda: bool,
    pub cvm_supported: bool,
    pub terminal_risk_management_required: bool,
    pub issuer_authentication_supported: bool,
    pub msd_supported: bool,
}

impl AipCapabilities {
    /// Decodes the 7 capability bits from AIP byte 0 (byte 1 is RFU in
    /// Book 3 except for some kernel-specific bits we don't model here).
    pub fn decode(byte0: u8) -> Self {
        Self {
            sda: byte0 & 0b0100_0000 != 0,
            dda: byte0 & 0b0010_0000 != 0,
            cda: byte0 & 0b0000_0001 != 0,
            cvm_supported: byte0 & 0b0001_0000 != 0,
            terminal_risk_management_required: byte0 & 0b0000_1000 != 0,
            issuer_authentication_supported: byte0 & 0b0000_0100 != 0,
            msd_supported: byte0 & 0b1000_0000 != 0,
        }
    }

    pub fn from_bytes(aip: &[u8]) -> Option<Self> {
        aip.first().copied().map(Self::decode)
    }

    /// A card is "weak" iff it offers none of SDA/DDA/CDA.
    pub fn is_weak(&self) -> bool {
        !(self.sda || self.dda || self.cda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sda_and_dda_no_cda() {
        // Bit 7 (0x40) is SDA, bit 6 (0x20) is DDA; a card offering both
        // sets 0x60.
        let caps = AipCapabilities::decode(0x60);
        assert!(caps.sda);
        assert!(caps.dda);
        assert!(!caps.cda);
        assert!(!caps.is_weak());
    }

    #[test]
    fn dda_only() {
        let caps = AipCapabilities::decode(0x20);
        assert!(!caps.sda);
        assert!(caps.dda);
        assert!(!caps.is_weak());
    }

    #[test]
    fn no_auth_method_is_weak() {
        let caps = AipCapabilities::decode(0x10); // CVM supported only
        assert!(caps.is_weak());
    }

    #[test]
    fn empty_bytes_yield_none() {
        assert!(AipCapabilities::from_bytes(&[]).is_none());
    }
}
