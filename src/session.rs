//! Session record (C7): the per-scan aggregate the transaction engine
//! builds up, and the immutable profile it's snapshotted into on save.
//!
//! The tag map, APDU log, and derived fields are exactly the session
//! record fields from the data model; this module only adds the
//! derivation logic (PAN/Track 2 canonicalisation, summary rendering).

use std::collections::BTreeMap;

use crate::parsers::{AflEntry, RocaFinding};
use crate::transport::ApduLogEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredAid {
    pub aid: Vec<u8>,
    pub label: Option<String>,
    pub priority: Option<u8>,
    pub selected_ok: bool,
}

/// Derived, human-meaningful fields lifted out of the raw tag map once a
/// scan completes or stalls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedFields {
    pub pan: Option<String>,
    pub expiry: Option<String>,
    pub cardholder_name: Option<String>,
    pub application_label: Option<String>,
    pub track2: Option<String>,
    pub aip_hex: Option<String>,
    pub afl_hex: Option<String>,
    pub cryptogram_hex: Option<String>,
    pub cid_hex: Option<String>,
    pub atc_hex: Option<String>,
    pub aids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub card_uid: Option<String>,
    pub tags: BTreeMap<String, Vec<u8>>,
    pub afl_entries: Vec<AflEntry>,
    pub apdu_log: Vec<ApduLogEntry>,
    pub discovered_aids: Vec<DiscoveredAid>,
    pub derived: DerivedFields,
    pub roca_findings: BTreeMap<String, RocaFinding>,
    pub complete: bool,
    pub error: Option<String>,
}

impl SessionRecord {
    pub fn new(card_uid: Option<String>) -> Self {
        Self {
            card_uid,
            tags: BTreeMap::new(),
            afl_entries: Vec::new(),
            apdu_log: Vec::new(),
            discovered_aids: Vec::new(),
            derived: DerivedFields::default(),
            roca_findings: BTreeMap::new(),
            complete: false,
            error: None,
        }
    }

    pub fn insert_tags(&mut self, parsed: &BTreeMap<String, Vec<u8>>) {
        for (tag, value) in parsed {
            self.tags.insert(tag.clone(), value.clone());
        }
    }

    /// Canonicalises PAN (`5A`) and expiry (`5F24`) from Track 2 (`57`) when
    /// the PAN isn't directly present: the substring before the `D`
    /// separator is the PAN, the four digits after it are `YYMM` expiry.
    pub fn canonicalise_pan_and_expiry(&mut self) {
        if self.derived.pan.is_none() {
            if let Some(pan) = self.tags.get("5A") {
                self.derived.pan = Some(crate::parsers::numeric::decode_bcd_numeric(pan));
            }
        }
        if let Some(track2) = self.tags.get("57") {
            let digits = crate::parsers::numeric::decode_track2(track2);
            self.derived.track2 = Some(digits.clone());
            if let Some(sep) = digits.find('D') {
                if self.derived.pan.is_none() {
                    self.derived.pan = Some(digits[..sep].to_string());
                }
                let after = &digits[sep + 1..];
                if after.len() >= 4 && self.derived.expiry.is_none() {
                    self.derived.expiry = Some(after[..4].to_string());
                }
            }
        }
        if self.derived.expiry.is_none() {
            if let Some(raw) = self.tags.get("5F24") {
                if raw.len() == 3 {
                    self.derived.expiry =
                        Some(crate::parsers::numeric::decode_bcd_numeric(&raw[..2]));
                }
            }
        }
        if self.derived.cardholder_name.is_none() {
            if let Some(raw) = self.tags.get("5F20") {
                self.derived.cardholder_name = Some(crate::parsers::numeric::decode_ascii_text(raw));
            }
        }
        if self.derived.application_label.is_none() {
            if let Some(raw) = self.tags.get("50") {
                self.derived.application_label = Some(crate::parsers::numeric::decode_ascii_text(raw));
            }
        }
        if let Some(raw) = self.tags.get("82") {
            self.derived.aip_hex = Some(hex::encode_upper(raw));
        }
        if let Some(raw) = self.tags.get("94") {
            self.derived.afl_hex = Some(hex::encode_upper(raw));
        }
        if let Some(raw) = self.tags.get("9F26") {
            self.derived.cryptogram_hex = Some(hex::encode_upper(raw));
        }
        if let Some(raw) = self.tags.get("9F27") {
            self.derived.cid_hex = Some(hex::encode_upper(raw));
        }
        if let Some(raw) = self.tags.get("9F36") {
            self.derived.atc_hex = Some(hex::encode_upper(raw));
        }
        self.derived.aids = self
            .discovered_aids
            .iter()
            .map(|a| hex::encode_upper(&a.aid))
            .collect();
    }

    pub fn to_text_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "PAN: {}\n",
            self.derived.pan.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!(
            "Expiry: {}\n",
            self.derived.expiry.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!(
            "Cardholder: {}\n",
            self.derived.cardholder_name.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!(
            "Application: {}\n",
            self.derived.application_label.as_deref().unwrap_or("-")
        ));
        out.push_str(&format!("AIDs: {}\n", self.derived.aids.join(", ")));
        out.push_str(&format!("Tags recovered: {}\n", self.tags.len()));
        if !self.roca_findings.is_empty() {
            out.push_str(&format!(
                "ROCA findings: {}\n",
                self.roca_findings
                    .iter()
                    .map(|(tag, finding)| format!("{tag}={:?}", finding.confidence))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        out
    }
}

/// Immutable wrapper assigned on save; `id` is opaque and store-assigned.
#[derive(Debug, Clone)]
pub struct CardProfile {
    pub id: u64,
    pub created_at: chrono::DateTime<chrono::Local>,
    pub session_record: SessionRecord,
    pub label_overrides: BTreeMap<String, String>,
}
