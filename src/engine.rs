//! Transaction engine (C5): the ordered contactless phases, from PPSE
//! discovery through transaction-log reading.
//!
//! The multi-AID selection loop and phase sequencing are grounded on
//! `artemist-emvsign`'s `pse.rs`/`transaction.rs` (the teacher never
//! implements PPSE or GENERATE AC at all); the FCI/record parsing style
//! follows the teacher's `app/emv/adf.rs` `TryFrom`-shaped walk over
//! `ber::iter`.

use rand::RngCore;
use tap::Tap;

use crate::apdu::{self, ReferenceControl};
use crate::ber;
use crate::dol_resolver::{self, Environment, TransactionType};
use crate::events::{Event, EventBus};
use crate::parsers::{afl, aip, dol, numeric, roca};
use crate::session::{DiscoveredAid, SessionRecord};
use crate::transport::{CancellationToken, Transport};

/// Critical tags whose absence after the AFL read triggers the extended
/// record scan.
const CRITICAL_TAGS: &[&str] = &["8E", "8C", "8D", "8F", "9F32", "9F47", "93"];

const COMMON_AIDS: &[&[u8]] = &[
    &[0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10], // Visa
    &[0xA0, 0x00, 0x00, 0x00, 0x04, 0x10, 0x10], // Mastercard
    &[0xA0, 0x00, 0x00, 0x00, 0x25, 0x01, 0x04], // Amex
    &[0xA0, 0x00, 0x00, 0x01, 0x52, 0x30, 0x10], // Discover
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceControlConfig {
    Aac,
    Tc,
    Arqc,
}

impl From<ReferenceControlConfig> for ReferenceControl {
    fn from(value: ReferenceControlConfig) -> Self {
        match value {
            ReferenceControlConfig::Aac => ReferenceControl::Aac,
            ReferenceControlConfig::Tc => ReferenceControl::Tc,
            ReferenceControlConfig::Arqc => ReferenceControl::Arqc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub transaction_type: TransactionType,
    pub reference_control: ReferenceControlConfig,
    pub amount_authorised: u64,
    pub force_contact: bool,
    pub validate_tags: bool,
    pub extended_scan_sfis: std::ops::RangeInclusive<u8>,
    pub extended_scan_records: std::ops::RangeInclusive<u8>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transaction_type: TransactionType::QvsdcMChip,
            reference_control: ReferenceControlConfig::Arqc,
            amount_authorised: 100,
            force_contact: false,
            validate_tags: true,
            extended_scan_sfis: 1..=3,
            extended_scan_records: 1..=16,
        }
    }
}

/// Runs one end-to-end scan against `transport`, producing a finalised
/// [`SessionRecord`]. The transport is never retained past this call; the
/// caller owns its lifecycle (connect before, disconnect after).
pub fn run_scan<T: Transport>(
    transport: &mut T,
    config: &EngineConfig,
    cancel: &CancellationToken,
    events: &EventBus,
) -> SessionRecord {
    events.emit(Event::ReadingStarted);
    let mut record = SessionRecord::new(None);

    if let Err(e) = discover_and_select(transport, config, cancel, &mut record, events) {
        finalize(&mut record, events, Some(e.to_string()));
        return record;
    }

    if record.discovered_aids.iter().all(|a| !a.selected_ok) {
        finalize(&mut record, events, Some("no application selected".to_string()));
        return record;
    }

    if cancel.is_cancelled() {
        finalize(&mut record, events, Some("scan cancelled".to_string()));
        return record;
    }

    let mut env = build_environment(config);

    let gpo_outcome = run_gpo(transport, config, &mut record, &env, events);

    if cancel.is_cancelled() {
        finalize(&mut record, events, Some("scan cancelled".to_string()));
        return record;
    }

    if let Some(afl_entries) = gpo_outcome.afl_entries {
        read_afl_records(transport, &afl_entries, &mut record, config.validate_tags, cancel, events);
        record.afl_entries = afl_entries;
    }

    if cancel.is_cancelled() {
        finalize(&mut record, events, Some("scan cancelled".to_string()));
        return record;
    }

    if missing_critical_tags(&record) {
        run_extended_scan(transport, config, &mut record, cancel, events);
    }

    if cancel.is_cancelled() {
        finalize(&mut record, events, Some("scan cancelled".to_string()));
        return record;
    }

    run_get_data_primitives(transport, &mut record, events);

    env.atc = record.tags.get("9F36").cloned();
    env.iad = record.tags.get("9F10").cloned();
    run_generate_ac(transport, config, &mut record, &env, events);

    run_transaction_log(transport, &mut record, cancel, events);

    record.canonicalise_pan_and_expiry();
    compute_roca_findings(&mut record);

    finalize(&mut record, events, None);
    record
}

fn finalize(record: &mut SessionRecord, events: &EventBus, error: Option<String>) {
    match error {
        Some(msg) => {
            record.complete = false;
            record.error = Some(msg.clone());
            events.emit(Event::Error(msg));
        }
        None => {
            record.complete = true;
        }
    }
    events.emit(Event::CardRead(Box::new(record.clone())));
    events.emit(Event::ReadingStopped);
}

fn log_exchange<T: Transport>(
    transport: &mut T,
    req: apdu::Request,
    description: &str,
    record: &mut SessionRecord,
    events: &EventBus,
) -> apdu::Response {
    let started = std::time::Instant::now();
    let wire = req.encode();
    let response = transport.call_apdu(req).unwrap_or_else(|_| apdu::Response::failed());
    let entry = crate::transport::ApduLogEntry::new(description, wire, &response, started.elapsed());
    events.emit(Event::ApduExchanged(entry.clone()));
    tracing::debug!(description, status = %entry.status, "apdu exchange");
    record.apdu_log.push(entry);
    response
}

fn discover_and_select<T: Transport>(
    transport: &mut T,
    config: &EngineConfig,
    cancel: &CancellationToken,
    record: &mut SessionRecord,
    events: &EventBus,
) -> crate::errors::Result<()> {
    let ppse_res = if config.force_contact {
        log_exchange(transport, apdu::select_by_name(apdu::PSE_NAME), "SELECT PSE", record, events)
    } else {
        let res = log_exchange(transport, apdu::select_by_name(apdu::PPSE_NAME), "SELECT PPSE", record, events);
        if res.status.is_success() {
            res
        } else {
            log_exchange(transport, apdu::select_by_name(apdu::PSE_NAME), "SELECT PSE (fallback)", record, events)
        }
    };

    if !ppse_res.status.is_success() {
        return Err(crate::errors::Error::Transport(
            if config.force_contact { "PSE not found".to_string() } else { "PPSE and PSE not found".to_string() },
        ));
    }

    let mut aids = extract_application_templates(&ppse_res.data);
    if aids.is_empty() {
        aids = COMMON_AIDS
            .iter()
            .map(|aid| DiscoveredAid { aid: aid.to_vec(), label: None, priority: None, selected_ok: false })
            .collect();
    }
    aids.sort_by_key(|a| a.priority.unwrap_or(0xFF));

    // Only the first successful AID's FCI feeds GPO/AFL/extended-scan/GET
    // DATA/GAC; every AID is still selected so `selected_ok` reflects the
    // full discovery outcome.
    let mut selected_fci = false;
    for aid in &mut aids {
        cancel.check()?;
        let res = log_exchange(transport, apdu::select_by_name(&aid.aid), "SELECT AID", record, events);
        aid.selected_ok = res.status.is_success();
        if aid.selected_ok && !selected_fci {
            let parsed = ber::parse(&res.data, config.validate_tags);
            record.insert_tags(&parsed.tags);
            selected_fci = true;
        }
    }
    record.discovered_aids = aids;
    Ok(())
}

/// Enumerates `61` application templates from a PPSE FCI, extracting AID
/// (`4F`), label (`50`), and priority (`87`).
fn extract_application_templates(data: &[u8]) -> Vec<DiscoveredAid> {
    let parsed = ber::parse(data, false);
    parsed
        .nodes
        .iter()
        .flat_map(flatten_templates_tagged_61)
        .map(|children| {
            let mut aid = Vec::new();
            let mut label = None;
            let mut priority = None;
            for child in children {
                match child.tag_hex().as_str() {
                    "4F" => {
                        if let ber::Node::Primitive { value, .. } = child {
                            aid = value.clone();
                        }
                    }
                    "50" => {
                        if let ber::Node::Primitive { value, .. } = child {
                            label = Some(numeric::decode_ascii_text(value));
                        }
                    }
                    "87" => {
                        if let ber::Node::Primitive { value, .. } = child {
                            priority = value.first().copied();
                        }
                    }
                    _ => {}
                }
            }
            DiscoveredAid { aid, label, priority, selected_ok: false }
        })
        .filter(|a| !a.aid.is_empty())
        .collect()
}

fn flatten_templates_tagged_61(node: &ber::Node) -> Vec<&Vec<ber::Node>> {
    match node {
        ber::Node::Constructed { tag, children } if tag == &[0x61] => vec![children],
        ber::Node::Constructed { children, .. } => children.iter().flat_map(flatten_templates_tagged_61).collect(),
        ber::Node::Primitive { .. } => Vec::new(),
    }
}

fn build_environment(config: &EngineConfig) -> Environment {
    use chrono::Timelike;
    let now = chrono::Local::now();
    let mut rng = rand::thread_rng();
    let mut un = [0u8; 4];
    rng.fill_bytes(&mut un);
    Environment {
        amount_authorised: config.amount_authorised,
        amount_other: 0,
        terminal_country: [0x08, 0x40],
        tx_currency: [0x08, 0x40],
        today_bcd: numeric::encode_yymmdd(&now.date_naive()),
        time_bcd: [
            to_bcd_clock(now.hour() as u8),
            to_bcd_clock(now.minute() as u8),
            to_bcd_clock(now.second() as u8),
        ],
        tx_type: 0x00,
        unpredictable_number: un,
        transaction_type: config.transaction_type,
        atc: None,
        iad: None,
    }
}

fn to_bcd_clock(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

struct GpoOutcome {
    afl_entries: Option<Vec<afl::AflEntry>>,
}

fn run_gpo<T: Transport>(
    transport: &mut T,
    config: &EngineConfig,
    record: &mut SessionRecord,
    env: &Environment,
    events: &EventBus,
) -> GpoOutcome {
    let pdol_entries = record.tags.get("9F38").and_then(|raw| dol::parse(raw).ok());
    let pdol_data = pdol_entries
        .map(|entries| dol_resolver::resolve(&entries, env))
        .unwrap_or_default()
        .tap(|data| tracing::trace!(len = data.len(), "resolved PDOL data for GPO"));

    let req = apdu::gpo(&pdol_data);
    let res = log_exchange(transport, req, "GET PROCESSING OPTIONS", record, events);
    if !res.status.is_success() {
        return GpoOutcome { afl_entries: None };
    }

    let parsed = ber::parse(&res.data, config.validate_tags);
    record.insert_tags(&parsed.tags);

    if let Some(aip_raw) = record.tags.get("82") {
        if let Some(caps) = aip::AipCapabilities::from_bytes(aip_raw) {
            if caps.is_weak() {
                tracing::warn!("card offers no strong authentication method (SDA/DDA/CDA)");
            }
        }
    }

    let afl_entries = record.tags.get("94").and_then(|raw| afl::parse(raw).ok());
    GpoOutcome { afl_entries }
}

fn read_afl_records<T: Transport>(
    transport: &mut T,
    entries: &[afl::AflEntry],
    record: &mut SessionRecord,
    validate_tags: bool,
    cancel: &CancellationToken,
    events: &EventBus,
) {
    for entry in entries {
        for rec in entry.first_record..=entry.last_record {
            if cancel.is_cancelled() {
                return;
            }
            let res = log_exchange(
                transport,
                apdu::read_record(entry.sfi, rec),
                "READ RECORD (AFL)",
                record,
                events,
            );
            if res.status.is_success() {
                let parsed = ber::parse(&res.data, validate_tags);
                record.insert_tags(&parsed.tags);
            }
        }
    }
}

fn missing_critical_tags(record: &SessionRecord) -> bool {
    CRITICAL_TAGS.iter().any(|tag| !record.tags.contains_key(*tag))
}

fn run_extended_scan<T: Transport>(
    transport: &mut T,
    config: &EngineConfig,
    record: &mut SessionRecord,
    cancel: &CancellationToken,
    events: &EventBus,
) {
    let already_read: std::collections::HashSet<(u8, u8)> = record
        .afl_entries
        .iter()
        .flat_map(|e| (e.first_record..=e.last_record).map(move |rec| (e.sfi, rec)))
        .collect();

    for sfi in config.extended_scan_sfis.clone() {
        for rec in config.extended_scan_records.clone() {
            if !missing_critical_tags(record) {
                return;
            }
            if cancel.is_cancelled() {
                return;
            }
            if already_read.contains(&(sfi, rec)) {
                continue;
            }
            let res = log_exchange(
                transport,
                apdu::read_record(sfi, rec),
                "READ RECORD (extended scan)",
                record,
                events,
            );
            if res.status.is_success() {
                let parsed = ber::parse(&res.data, config.validate_tags);
                record.insert_tags(&parsed.tags);
            }
        }
    }
}

const GET_DATA_TAGS: &[(u8, u8)] = &[
    (0x9F, 0x36), // ATC
    (0x9F, 0x13), // Last Online ATC
    (0x9F, 0x17), // PIN Try Counter
    (0x9F, 0x4D), // Log Entry
    (0x9F, 0x4F), // Log Format
];

fn run_get_data_primitives<T: Transport>(transport: &mut T, record: &mut SessionRecord, events: &EventBus) {
    for &(hi, lo) in GET_DATA_TAGS {
        let res = log_exchange(transport, apdu::get_data(hi, lo), "GET DATA", record, events);
        if res.status.is_success() {
            let parsed = ber::parse(&res.data, false);
            record.insert_tags(&parsed.tags);
            let tag_hex = hex::encode_upper([hi, lo]);
            if !record.tags.contains_key(&tag_hex) && !res.data.is_empty() {
                // Some cards answer GET DATA with a bare value, no TLV wrapper.
                record.tags.insert(tag_hex, res.data.clone());
            }
        }
        // 6A88/6A81 ("not supported") are treated as absence, not an error.
    }
}

fn run_generate_ac<T: Transport>(
    transport: &mut T,
    config: &EngineConfig,
    record: &mut SessionRecord,
    env: &Environment,
    events: &EventBus,
) {
    let cdol1_entries = record.tags.get("8C").and_then(|raw| dol::parse(raw).ok());
    let cdol_data = match &cdol1_entries {
        Some(entries) if entries.len() >= 1 => dol_resolver::resolve(entries, env),
        _ => Vec::new(),
    }
    .tap(|data| tracing::trace!(len = data.len(), "resolved CDOL1 data for GENERATE AC"));

    let req = apdu::generate_ac(config.reference_control.into(), &cdol_data);
    let res = log_exchange(transport, req, "GENERATE AC", record, events);
    if res.status.is_success() {
        let parsed = ber::parse(&res.data, config.validate_tags);
        record.insert_tags(&parsed.tags);
    }
}

fn run_transaction_log<T: Transport>(
    transport: &mut T,
    record: &mut SessionRecord,
    cancel: &CancellationToken,
    events: &EventBus,
) {
    let Some(log_format) = record.tags.get("9F4F").cloned() else {
        return;
    };
    if log_format.len() < 2 {
        return;
    }
    let sfi = log_format[0] >> 3;
    let count = log_format[1] as usize;
    for rec in 1..=count.min(10) as u8 {
        if cancel.is_cancelled() {
            return;
        }
        log_exchange(transport, apdu::read_record(sfi, rec), "READ RECORD (transaction log)", record, events);
    }
}

fn compute_roca_findings(record: &mut SessionRecord) {
    for tag in ["90", "9F46", "9F32"] {
        if let Some(modulus) = record.tags.get(tag) {
            record.roca_findings.insert(tag.to_string(), roca::fingerprint(modulus));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    // Verified PPSE FCI: 2PAY.SYS.DDF01, a single Visa application entry
    // (AID A0000000031010, label VISA, priority 1).
    const PPSE_RESP: &str =
        "6F29840E325041592E5359532E4444463031A517BF0C1461124F07A0000000031010500456495341870101";

    // SELECT AID response with AID + label but no PDOL, so GPO resolves to
    // the minimal Case-2 form and every test below stays deterministic
    // (no dependency on the unpredictable-number RNG or wall-clock date).
    const SELECT_AID_RESP: &str = "6F0F8407A0000000031010500456495341";

    fn aid_bytes() -> Vec<u8> {
        hex::decode("A0000000031010").unwrap()
    }

    fn ok(data_hex: &str) -> apdu::Response {
        apdu::Response { data: hex::decode(data_hex).unwrap(), status: apdu::Status::OK }
    }

    /// S1: PPSE -> single AID -> GPO format 2 -> read one record -> PAN.
    #[test]
    fn s1_single_aid_gpo_and_record_read() {
        // AIP byte 0x60: SDA+DDA set, matching the real bit layout (0x40
        // SDA, 0x20 DDA) rather than a single-bit literal.
        let gpo_resp = "770A82026000940408010100";
        // Record carries PAN/expiry plus dummy values for every critical
        // tag, so the extended record scan is skipped.
        let record_resp =
            "70275A0847617400010000105F24032512318E01008C01008D01008F01009F3201039F470103930100";

        let mut transport = ScriptedTransport::new()
            .expect(apdu::select_by_name(apdu::PPSE_NAME), ok(PPSE_RESP))
            .expect(apdu::select_by_name(&aid_bytes()), ok(SELECT_AID_RESP))
            .expect(apdu::gpo(&[]), ok(gpo_resp))
            .expect(apdu::read_record(1, 1), ok(record_resp));

        let cancel = CancellationToken::new();
        let events = EventBus::new();
        let record = run_scan(&mut transport, &config(), &cancel, &events);

        assert_eq!(record.discovered_aids.len(), 1);
        assert_eq!(record.discovered_aids[0].aid, aid_bytes());
        assert_eq!(record.derived.pan.as_deref(), Some("4761740001000010"));
        assert_eq!(record.derived.expiry.as_deref(), Some("2512"));

        let aip = aip::AipCapabilities::from_bytes(record.tags.get("82").unwrap()).unwrap();
        assert!(aip.sda);
        assert!(aip.dda);
        assert!(!aip.cda);
    }

    /// S2: force-contact mode, PSE not found.
    #[test]
    fn s2_force_contact_pse_not_found() {
        let mut transport = ScriptedTransport::new().expect(
            apdu::select_by_name(apdu::PSE_NAME),
            apdu::Response { data: vec![], status: apdu::Status(0x6A, 0x82) },
        );
        let mut cfg = config();
        cfg.force_contact = true;
        let cancel = CancellationToken::new();
        let events = EventBus::new();
        let record = run_scan(&mut transport, &cfg, &cancel, &events);

        assert!(!record.complete);
        assert_eq!(record.error.as_deref(), Some("PSE not found"));
        assert_eq!(record.apdu_log.len(), 1);
    }

    /// S4: GENERATE AC without a CDOL1 falls back to the Case-1 form and
    /// the cryptogram/CID/ATC are extracted from the response.
    #[test]
    fn s4_generate_ac_without_cdol1() {
        let gac_resp = "77149F2701809F360200019F26081122334455667788";

        let mut transport = ScriptedTransport::new()
            .expect(apdu::select_by_name(apdu::PPSE_NAME), ok(PPSE_RESP))
            .expect(apdu::select_by_name(&aid_bytes()), ok(SELECT_AID_RESP))
            .expect(apdu::gpo(&[]), ok("770A82026000940408010100"))
            .expect(
                apdu::generate_ac(ReferenceControl::Arqc, &[]),
                ok(&gac_resp),
            );

        let cancel = CancellationToken::new();
        let events = EventBus::new();
        let record = run_scan(&mut transport, &config(), &cancel, &events);

        assert_eq!(record.derived.cryptogram_hex.as_deref(), Some("1122334455667788"));
        assert_eq!(record.derived.cid_hex.as_deref(), Some("80"));
        assert_eq!(record.derived.atc_hex.as_deref(), Some("0001"));
    }

    /// S6: a malformed (3-byte) AFL is rejected; no records are read via
    /// AFL, but the scan still completes via the extended record scan.
    #[test]
    fn s6_malformed_afl_falls_back_to_extended_scan() {
        let gpo_resp_bad_afl = "770594030801 01".replace(' ', "");

        let mut transport = ScriptedTransport::new()
            .expect(apdu::select_by_name(apdu::PPSE_NAME), ok(PPSE_RESP))
            .expect(apdu::select_by_name(&aid_bytes()), ok(SELECT_AID_RESP))
            .expect(apdu::gpo(&[]), ok(&gpo_resp_bad_afl));

        let cancel = CancellationToken::new();
        let events = EventBus::new();
        let record = run_scan(&mut transport, &config(), &cancel, &events);

        assert!(record.afl_entries.is_empty());
        assert!(record.complete);
    }

    #[test]
    fn missing_critical_tags_detects_absent_cvm_list() {
        let mut record = SessionRecord::new(None);
        assert!(missing_critical_tags(&record));
        for tag in CRITICAL_TAGS {
            record.tags.insert(tag.to_string(), vec![0]);
        }
        assert!(!missing_critical_tags(&record));
    }

    /// A second, lower-priority AID that also selects successfully must not
    /// clobber the first AID's FCI tags (application label, PDOL, ...).
    #[test]
    fn second_successful_aid_does_not_clobber_first_aids_fci() {
        let ppse_resp_multi = "6F43840E325041592E5359532E4444463031A531BF0C2E\
            61124F07A0000000031010500456495341870101\
            61184F07A0000000041010500A4D415354455243415244870102";
        let aid2_bytes = hex::decode("A0000000041010").unwrap();
        let select_aid2_resp = "6F158407A0000000041010500A4D415354455243415244";
        let gpo_resp = "770A82026000940408010100";
        let record_resp =
            "70275A0847617400010000105F24032512318E01008C01008D01008F01009F3201039F470103930100";

        let mut transport = ScriptedTransport::new()
            .expect(apdu::select_by_name(apdu::PPSE_NAME), ok(ppse_resp_multi))
            .expect(apdu::select_by_name(&aid_bytes()), ok(SELECT_AID_RESP))
            .expect(apdu::select_by_name(&aid2_bytes), ok(select_aid2_resp))
            .expect(apdu::gpo(&[]), ok(gpo_resp))
            .expect(apdu::read_record(1, 1), ok(record_resp));

        let cancel = CancellationToken::new();
        let events = EventBus::new();
        let record = run_scan(&mut transport, &config(), &cancel, &events);

        assert_eq!(record.discovered_aids.len(), 2);
        assert!(record.discovered_aids[0].selected_ok);
        assert!(record.discovered_aids[1].selected_ok);
        assert_eq!(record.discovered_aids[0].aid, aid_bytes());
        assert_eq!(record.discovered_aids[1].aid, aid2_bytes);
        // The first AID (VISA) wins the FCI even though the second
        // (Mastercard) also selected successfully afterwards.
        assert_eq!(record.derived.application_label.as_deref(), Some("VISA"));
    }

    #[test]
    fn extract_application_templates_reads_aid_label_priority() {
        let data = hex::decode("61124F07A00000000310105004564953418 70101".replace(' ', "")).unwrap();
        let aids = extract_application_templates(&data);
        assert_eq!(aids.len(), 1);
        assert_eq!(aids[0].aid, aid_bytes());
        assert_eq!(aids[0].label.as_deref(), Some("VISA"));
        assert_eq!(aids[0].priority, Some(1));
    }
}
