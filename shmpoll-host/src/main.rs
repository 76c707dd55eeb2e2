// shmpoll host: drives one exchange with the reference module over shared memory.

mod config;

use anyhow::{bail, Context};
use serde::Serialize;
use shmpoll_core::{wire, EchoModule, HostDriver, OwnedMessage, Status, TransferStats};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_QUERY: &str = "select * from users;";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Version,
    Query(String),
    Rows(Option<u32>),
}

#[derive(Debug, PartialEq, Eq)]
struct Args {
    command: Command,
    json: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut json = false;
    let mut rest = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--version" | "-V" => {
                return Ok(Args {
                    command: Command::Version,
                    json,
                })
            }
            "--json" => json = true,
            _ => rest.push(arg),
        }
    }
    let command = match rest.first().map(String::as_str) {
        None => Command::Query(DEFAULT_QUERY.to_string()),
        Some("query") if rest.len() > 1 => Command::Query(rest[1..].join(" ")),
        Some("query") => Command::Query(DEFAULT_QUERY.to_string()),
        Some("rows") => match rest.get(1) {
            Some(n) => Command::Rows(Some(
                n.parse().with_context(|| format!("invalid row count {:?}", n))?,
            )),
            None => Command::Rows(None),
        },
        Some(other) => bail!("unknown command {:?} (expected query or rows)", other),
    };
    Ok(Args { command, json })
}

#[derive(Serialize)]
struct ReportMessage {
    #[serde(rename = "type")]
    ty: char,
    payload: String,
}

impl From<&OwnedMessage> for ReportMessage {
    fn from(m: &OwnedMessage) -> Self {
        Self {
            ty: m.ty.as_byte() as char,
            payload: String::from_utf8_lossy(&m.payload).into_owned(),
        }
    }
}

#[derive(Serialize)]
struct Report {
    chunks: usize,
    messages: Vec<ReportMessage>,
    status: Status,
    stats: TransferStats,
}

fn run(args: Args, cfg: &config::Config) -> anyhow::Result<Report> {
    let module = EchoModule::new(cfg.buffer_size).context("module layout")?;
    let mut driver = HostDriver::new(module)?;
    let chunks = match args.command {
        Command::Query(q) => vec![driver.exec(q.as_bytes())?],
        Command::Rows(n) => driver.exec_streaming(&[], n.unwrap_or(cfg.rows))?,
        Command::Version => Vec::new(),
    };
    let mut messages = Vec::new();
    for chunk in &chunks {
        messages.extend(wire::decode_all(chunk)?);
    }
    Ok(Report {
        chunks: chunks.len(),
        messages: messages.iter().map(ReportMessage::from).collect(),
        status: driver.get_status()?,
        stats: driver.transfer_stats(),
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.command == Command::Version {
        println!("shmpoll-host {}", VERSION);
        return Ok(());
    }

    let cfg = config::load();
    log::info!("buffer capacity {} bytes", cfg.buffer_size);
    let json = args.json;
    let report = run(args, &cfg)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for m in &report.messages {
            print!("{}: {}", m.ty, m.payload);
            if !m.payload.ends_with('\n') {
                println!();
            }
        }
        log::info!(
            "{} chunk(s), state {:?}, {} bytes read, {} bytes written",
            report.chunks,
            report.status.operation,
            report.stats.total_read,
            report.stats.total_written
        );
    }
    Ok(())
}
