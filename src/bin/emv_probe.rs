//! CLI front-end for the interrogation engine: enumerates PC/SC readers and
//! runs a full contactless scan against a connected card.
//!
//! Mirrors the teacher's `bin/cardinal/main.rs` + `probe.rs` split — a
//! `readers` subcommand next to the card-probing one, `-v` controlling a
//! `tracing` filter, coloured terminal output — ported to `clap` derive v4
//! and `tracing-subscriber` in place of `structopt` + `tracing-fmt`.

use std::ffi::CString;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use pad::PadStr;

use interrogator::dol_resolver::TransactionType;
use interrogator::engine::{self, EngineConfig, ReferenceControlConfig};
use interrogator::events::{Event, EventBus, EventSink};
use interrogator::session::SessionRecord;
use interrogator::transport::CancellationToken;
use interrogator::transport_pcsc::PcscTransport;

#[derive(Debug, Parser)]
#[command(name = "emv-probe", about = "Contactless EMV card interrogation")]
struct Cli {
    /// Zero-indexed PC/SC reader number, if more than one is connected.
    #[arg(short = 'r', long = "reader-num", default_value_t = 0)]
    reader_num: usize,

    /// Every -v makes logging noisier (up to -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbosity: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all connected PC/SC readers.
    Readers,
    /// Run a full contactless scan against the card in the selected reader.
    Scan(ScanArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TxType {
    Msd,
    Vsdc,
    Qvsdc,
    Cda,
}

impl From<TxType> for TransactionType {
    fn from(value: TxType) -> Self {
        match value {
            TxType::Msd => TransactionType::Msd,
            TxType::Vsdc => TransactionType::Vsdc,
            TxType::Qvsdc => TransactionType::QvsdcMChip,
            TxType::Cda => TransactionType::Cda,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RefControl {
    Aac,
    Tc,
    Arqc,
}

impl From<RefControl> for ReferenceControlConfig {
    fn from(value: RefControl) -> Self {
        match value {
            RefControl::Aac => ReferenceControlConfig::Aac,
            RefControl::Tc => ReferenceControlConfig::Tc,
            RefControl::Arqc => ReferenceControlConfig::Arqc,
        }
    }
}

#[derive(Debug, clap::Args)]
struct ScanArgs {
    /// Authorised amount, in the currency's minor units.
    #[arg(long, default_value_t = 0)]
    amount: u64,

    /// Skip PPSE and go straight to the contact PSE (`1PAY.SYS.DDF01`).
    #[arg(long)]
    force_contact: bool,

    /// Don't warn on tags outside the known catalogue.
    #[arg(long)]
    no_validate: bool,

    #[arg(long, value_enum, default_value_t = TxType::Qvsdc)]
    transaction_type: TxType,

    #[arg(long, value_enum, default_value_t = RefControl::Arqc)]
    reference_control: RefControl,

    /// Print the full APDU trace after the summary.
    #[arg(long)]
    trace: bool,
}

struct StdoutSink;
impl EventSink for StdoutSink {
    fn on_event(&self, event: &Event) {
        match event {
            Event::Progress { step_name, index, total } => {
                println!("{} {}/{}", step_name.cyan(), index, total);
            }
            Event::Error(msg) => println!("{} {}", "error:".red(), msg),
            _ => {}
        }
    }
}

fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

fn list_readers() -> Result<(pcsc::Context, Vec<CString>)> {
    let context = pcsc::Context::establish(pcsc::Scope::User).context("establishing PC/SC context")?;
    let readers = PcscTransport::list_readers(&context)?;
    Ok((context, readers))
}

fn cmd_readers() -> Result<()> {
    let (_, readers) = list_readers()?;
    for (i, reader) in readers.iter().enumerate() {
        println!("{:3} {}", i, reader.to_string_lossy());
    }
    Ok(())
}

fn connect(reader_num: usize) -> Result<PcscTransport> {
    let (_, readers) = list_readers()?;
    let name = readers
        .get(reader_num)
        .ok_or_else(|| anyhow!("no reader at index {reader_num}"))?;
    PcscTransport::connect(name).context("connecting to reader")
}

fn cmd_scan(cli: &Cli, args: &ScanArgs) -> Result<()> {
    let mut transport = connect(cli.reader_num)?;

    let config = EngineConfig {
        transaction_type: args.transaction_type.into(),
        reference_control: args.reference_control.into(),
        amount_authorised: args.amount,
        force_contact: args.force_contact,
        validate_tags: !args.no_validate,
        ..EngineConfig::default()
    };

    let cancel = CancellationToken::new();
    let events = EventBus::new();
    events.subscribe(std::sync::Arc::new(StdoutSink));

    println!("{}", "---------- SCANNING CARD ----------".bold());
    let record = engine::run_scan(&mut transport, &config, &cancel, &events);
    transport.disconnect();

    print_summary(&record);
    if args.trace {
        print_trace(&record);
    }

    if !record.complete {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(record: &SessionRecord) {
    println!("{}", "---------- SUMMARY ----------".bold());
    println!("{} {}", "PAN:".cyan(), record.derived.pan.as_deref().unwrap_or("-"));
    println!("{} {}", "Expiry:".cyan(), record.derived.expiry.as_deref().unwrap_or("-"));
    println!(
        "{} {}",
        "Cardholder:".cyan(),
        record.derived.cardholder_name.as_deref().unwrap_or("-")
    );
    println!(
        "{} {}",
        "Application:".cyan(),
        record.derived.application_label.as_deref().unwrap_or("-")
    );
    println!("{} {}", "AIDs:".cyan(), record.derived.aids.join(", "));
    println!("{} {}", "AIP:".cyan(), record.derived.aip_hex.as_deref().unwrap_or("-"));
    println!(
        "{} {}",
        "Cryptogram:".cyan(),
        record.derived.cryptogram_hex.as_deref().unwrap_or("-")
    );
    println!("{} {}", "CID:".cyan(), record.derived.cid_hex.as_deref().unwrap_or("-"));
    println!("{} {} tags recovered", "Tags:".cyan(), record.tags.len());
    for (tag, finding) in &record.roca_findings {
        println!(
            "{} {} — {:?}",
            "ROCA:".yellow(),
            tag,
            finding.confidence
        );
    }
    if let Some(err) = &record.error {
        println!("{} {}", "error:".red(), err);
    }
}

fn print_trace(record: &SessionRecord) {
    println!("{}", "---------- APDU TRACE ----------".bold());
    for entry in &record.apdu_log {
        println!(
            "{} {} {}  {} {}  {} {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            "→".green(),
            hex::encode_upper(&entry.request).pad_to_width(40),
            "←".blue(),
            entry.status,
            "·".dimmed(),
            entry.description.as_str().pad_to_width(24)
        );
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::Readers => cmd_readers(),
        Command::Scan(args) => cmd_scan(cli, args),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity);
    run(&cli)
}
