//! Static EMV tag catalogue (C2).
//!
//! A compile-time table indexed by upper-case hex. This drives three
//! behaviours: whether a tag's bytes should be walked as a nested template
//! ([`is_template_candidate`], used by [`crate::ber::parse`]), whether it
//! carries an RSA modulus worth ROCA-fingerprinting
//! ([`crate::parsers::roca`]), and how it's rendered in logs/CLI output
//! ([`Category`]).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    ApplicationSelection,
    AccountData,
    CoreEmv,
    TerminalData,
    TransactionProcessing,
    AuthenticationAndCrypto,
    IccAuthentication,
    RiskManagement,
    ContactlessExtensions,
    Advanced,
    KernelConfig,
    Proprietary,
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct TagEntry {
    pub hex: &'static str,
    pub name: &'static str,
    pub category: Category,
    /// Default template-ness, before the always-primitive override is applied.
    pub is_template_default: bool,
    pub is_critical: bool,
    pub is_roca_bearing: bool,
}

macro_rules! tag {
    ($hex:literal, $name:literal, $cat:expr, $tmpl:literal, $crit:literal, $roca:literal) => {
        TagEntry {
            hex: $hex,
            name: $name,
            category: $cat,
            is_template_default: $tmpl,
            is_critical: $crit,
            is_roca_bearing: $roca,
        }
    };
}

use Category::*;

/// Tags whose encoding bit says "constructed" but which EMV defines as
/// opaque binary blobs, not nested TLV. These are always treated as
/// primitive regardless of the constructed bit or the template default.
const ALWAYS_PRIMITIVE_OVERRIDES: &[&str] = &[
    "82", "84", "90", "92", "93", "94", "95", "9F46", "9F47", "9F48", "9F4A", "9F4B",
];

/// Tags that are RSA-modulus-bearing issuer/ICC certificates, candidates
/// for the ROCA fingerprint check.
const ROCA_TAGS: &[&str] = &["90", "9F46", "9F32"];

static CATALOGUE: &[TagEntry] = &[
    tag!("4F", "Application Dedicated File Name", ApplicationSelection, false, true, false),
    tag!("50", "Application Label", ApplicationSelection, false, false, false),
    tag!("57", "Track 2 Equivalent Data", AccountData, false, true, false),
    tag!("5A", "Application PAN", AccountData, false, true, false),
    tag!("5F20", "Cardholder Name", AccountData, false, false, false),
    tag!("5F24", "Application Expiration Date", AccountData, false, true, false),
    tag!("5F25", "Application Effective Date", AccountData, false, false, false),
    tag!("5F28", "Issuer Country Code", AccountData, false, false, false),
    tag!("5F2A", "Transaction Currency Code", TerminalData, false, false, false),
    tag!("5F2D", "Language Preference", ApplicationSelection, false, false, false),
    tag!("5F30", "Service Code", AccountData, false, false, false),
    tag!("5F34", "Application PAN Sequence Number", AccountData, false, false, false),
    tag!("61", "Application Template", ApplicationSelection, true, false, false),
    tag!("6F", "File Control Information Template", CoreEmv, true, true, false),
    tag!("70", "READ RECORD Response Template", CoreEmv, true, true, false),
    tag!("77", "Response Message Template Format 2", CoreEmv, true, true, false),
    tag!("80", "Response Message Template Format 1", CoreEmv, false, true, false),
    tag!("82", "Application Interchange Profile", CoreEmv, false, true, false),
    tag!("83", "Command Template", CoreEmv, true, false, false),
    tag!("84", "Dedicated File Name", ApplicationSelection, false, true, false),
    tag!("87", "Application Priority Indicator", ApplicationSelection, false, false, false),
    tag!("88", "Short File Identifier", CoreEmv, false, false, false),
    tag!("8A", "Authorisation Response Code", TransactionProcessing, false, true, false),
    tag!("8C", "Card Risk Management Data Object List 1 (CDOL1)", RiskManagement, false, true, false),
    tag!("8D", "Card Risk Management Data Object List 2 (CDOL2)", RiskManagement, false, true, false),
    tag!("8E", "Cardholder Verification Method (CVM) List", RiskManagement, false, true, false),
    tag!("8F", "Certification Authority Public Key Index", IccAuthentication, false, true, false),
    tag!("90", "Issuer Public Key Certificate", AuthenticationAndCrypto, false, true, true),
    tag!("92", "Issuer Public Key Remainder", AuthenticationAndCrypto, false, false, false),
    tag!("93", "Signed Static Application Data", AuthenticationAndCrypto, false, false, false),
    tag!("94", "Application File Locator (AFL)", CoreEmv, false, true, false),
    tag!("95", "Terminal Verification Results (TVR)", RiskManagement, false, true, false),
    tag!("9A", "Transaction Date", TerminalData, false, false, false),
    tag!("9C", "Transaction Type", TerminalData, false, false, false),
    tag!("9F02", "Amount, Authorised", TerminalData, false, true, false),
    tag!("9F03", "Amount, Other", TerminalData, false, false, false),
    tag!("9F06", "Application Identifier (AID) - terminal", TerminalData, false, false, false),
    tag!("9F07", "Application Usage Control", RiskManagement, false, false, false),
    tag!("9F08", "Application Version Number", CoreEmv, false, false, false),
    tag!("9F09", "Application Version Number - terminal", TerminalData, false, false, false),
    tag!("9F10", "Issuer Application Data (IAD)", TransactionProcessing, false, true, false),
    tag!("9F11", "Issuer Code Table Index", ApplicationSelection, false, false, false),
    tag!("9F12", "Application Preferred Name", ApplicationSelection, false, false, false),
    tag!("9F13", "Last Online Application Transaction Counter (ATC) Register", TransactionProcessing, false, true, false),
    tag!("9F17", "PIN Try Counter", RiskManagement, false, true, false),
    tag!("9F1A", "Terminal Country Code", TerminalData, false, false, false),
    tag!("9F1E", "Interface Device (IFD) Serial Number", TerminalData, false, false, false),
    tag!("9F21", "Transaction Time", TerminalData, false, false, false),
    tag!("9F26", "Application Cryptogram", AuthenticationAndCrypto, false, true, false),
    tag!("9F27", "Cryptogram Information Data (CID)", AuthenticationAndCrypto, false, true, false),
    tag!("9F32", "Issuer Public Key Exponent", AuthenticationAndCrypto, false, false, true),
    tag!("9F33", "Terminal Capabilities", TerminalData, false, false, false),
    tag!("9F34", "Cardholder Verification Method (CVM) Results", RiskManagement, false, true, false),
    tag!("9F35", "Terminal Type", TerminalData, false, false, false),
    tag!("9F36", "Application Transaction Counter (ATC)", TransactionProcessing, false, true, false),
    tag!("9F37", "Unpredictable Number", TerminalData, false, false, false),
    tag!("9F38", "Processing Options Data Object List (PDOL)", CoreEmv, false, true, false),
    tag!("9F40", "Additional Terminal Capabilities", TerminalData, false, false, false),
    tag!("9F41", "Transaction Sequence Counter", TerminalData, false, false, false),
    tag!("9F42", "Application Currency Code", AccountData, false, false, false),
    tag!("9F44", "Application Currency Exponent", AccountData, false, false, false),
    tag!("9F45", "Data Authentication Code", AuthenticationAndCrypto, false, false, false),
    tag!("9F46", "ICC Public Key Certificate", IccAuthentication, false, true, true),
    tag!("9F47", "ICC Public Key Exponent", IccAuthentication, false, false, false),
    tag!("9F48", "ICC Public Key Remainder", IccAuthentication, false, false, false),
    tag!("9F49", "Dynamic Data Authentication Data Object List (DDOL)", IccAuthentication, false, false, false),
    tag!("9F4A", "Static Data Authentication Tag List", IccAuthentication, false, false, false),
    tag!("9F4B", "Signed Dynamic Application Data", IccAuthentication, false, false, false),
    tag!("9F4D", "Log Entry", Advanced, false, true, false),
    tag!("9F4F", "Log Format", Advanced, false, true, false),
    tag!("9F66", "Terminal Transaction Qualifiers (TTQ)", ContactlessExtensions, false, false, false),
    tag!("9F6C", "Card Transaction Qualifiers (CTQ)", ContactlessExtensions, false, false, false),
    tag!("A5", "File Control Information (FCI) Proprietary Template", CoreEmv, true, false, false),
    tag!("BF0C", "File Control Information (FCI) Issuer Discretionary Data", CoreEmv, true, false, false),
];

/// Looks up a tag by its upper-case hex key. An unknown tag is not an
/// error; it's handled by callers via [`describe`].
pub fn lookup(hex: &str) -> Option<&'static TagEntry> {
    CATALOGUE.iter().find(|e| e.hex == hex)
}

/// Human description for a tag, falling back to a generic placeholder for
/// tags outside the catalogue.
pub fn describe(hex: &str) -> String {
    match lookup(hex) {
        Some(entry) => entry.name.to_string(),
        None => format!("Unknown Tag ({hex})"),
    }
}

pub fn is_roca_bearing(hex: &str) -> bool {
    ROCA_TAGS.contains(&hex) || lookup(hex).is_some_and(|e| e.is_roca_bearing)
}

pub fn is_always_primitive(hex: &str) -> bool {
    ALWAYS_PRIMITIVE_OVERRIDES.contains(&hex)
}

/// Does the *first byte of the value* look like the start of a plausible
/// BER-TLV tag? Non-zero, and the class/constructed bits aren't both
/// degenerate (a lone `0x00` or a value whose class nibble is entirely
/// unset alongside the constructed bit is never a real tag start in this
/// dialect).
fn looks_like_tag_start(first: u8) -> bool {
    first != 0x00
}

/// True iff `tag_hex` should be walked as a nested template rather than
/// treated as an opaque value: (known template OR constructed bit set) AND
/// not on the always-primitive override list AND the value's first byte
/// looks like a plausible tag start. Per spec.md §4.1, the decision is made
/// per tag, not per encoding bit alone.
pub fn is_template_candidate(tag_hex: &str, tag_bytes: &[u8], value: &[u8]) -> bool {
    if is_always_primitive(tag_hex) {
        return false;
    }
    let default_template = lookup(tag_hex).map(|e| e.is_template_default).unwrap_or(false);
    let constructed = crate::ber::is_constructed(tag_bytes);
    if !(default_template || constructed) {
        return false;
    }
    match value.first() {
        None => false, // empty value can't hold nested TLV
        Some(&b) => looks_like_tag_start(b),
    }
}
