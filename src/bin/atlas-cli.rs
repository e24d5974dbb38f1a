//! Atlas DNS operator CLI
//!
//! A thin external collaborator: given a zone origin, loads that zone's SOA
//! from the configured zone store, signs a NOTIFY (RFC 1996) with the
//! supplied TSIG key, and sends it to every configured slave. Reuses the
//! TSIG engine's own message-signing logic rather than re-implementing NOTIFY
//! framing.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sqlx::sqlite::SqlitePool;
use tokio::net::UdpSocket;

use atlas::dns::buffer::VectorPacketBuffer;
use atlas::dns::protocol::{DnsPacket, DnsQuestion, QueryType};
use atlas::dns::tsig::{self, TsigKey};
use atlas::dns::zone_store::sql::SqlZoneStore;
use atlas::dns::zone_store::{Soa, ZoneStore};

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_IO_ERROR: u8 = 2;
const EXIT_DB_UNAVAILABLE: u8 = 3;

/// Emit a signed NOTIFY for a zone to its configured slaves.
#[derive(Parser)]
#[command(name = "atlas-notify")]
#[command(author = "Atlas DNS Team")]
#[command(version = "1.0.0")]
#[command(about = "Send a NOTIFY (RFC 1996) for a zone to its slaves", long_about = None)]
struct Cli {
    /// Zone origin to notify, e.g. example.com.
    #[arg(long)]
    origin: String,

    /// sqlx sqlite connection string backing the master's zone store
    #[arg(long, env = "ATLAS_DATABASE_URL")]
    database: String,

    /// Slave server address to notify (host:port). May be repeated.
    #[arg(long = "slave", required = true, num_args = 1..)]
    slaves: Vec<String>,

    /// TSIG key name to sign the NOTIFY with. Requires --tsig-algorithm and
    /// --tsig-secret; omit all three to send unsigned.
    #[arg(long, requires_all = ["tsig_algorithm", "tsig_secret"])]
    tsig_name: Option<String>,

    /// TSIG algorithm, e.g. hmac-sha256.
    #[arg(long)]
    tsig_algorithm: Option<String>,

    /// Base64-encoded TSIG shared secret.
    #[arg(long)]
    tsig_secret: Option<String>,

    /// Per-slave reply timeout, in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[derive(Debug)]
enum CliError {
    Config(String),
    Io(String),
    Database(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => EXIT_CONFIG_ERROR,
            CliError::Io(_) => EXIT_IO_ERROR,
            CliError::Database(_) => EXIT_DB_UNAVAILABLE,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "configuration error: {}", msg),
            CliError::Io(msg) => write!(f, "I/O error: {}", msg),
            CliError::Database(msg) => write!(f, "database unavailable: {}", msg),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    simple_logger::init().expect("failed to initialize logger");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("atlas-notify: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let tsig_key = match (&cli.tsig_name, &cli.tsig_algorithm, &cli.tsig_secret) {
        (Some(name), Some(algorithm), Some(secret)) => {
            Some(TsigKey::new(name.clone(), algorithm.clone(), secret.clone()))
        }
        _ => None,
    };

    let pool = SqlitePool::connect(&cli.database)
        .await
        .map_err(|e| CliError::Database(e.to_string()))?;
    let store = SqlZoneStore::new(pool);

    let soa = store
        .soa_lookup(&cli.origin)
        .await
        .map_err(|e| CliError::Database(e.to_string()))?
        .ok_or_else(|| CliError::Config(format!("zone {} not found", cli.origin)))?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| CliError::Io(e.to_string()))?;

    let timeout = Duration::from_secs(cli.timeout);
    for slave in &cli.slaves {
        let addr = resolve_one(slave).await?;
        send_notify(&socket, &cli.origin, &soa, tsig_key.as_ref(), addr, timeout).await?;
        println!("NOTIFY sent to {} for {}", addr, cli.origin);
    }

    Ok(())
}

async fn resolve_one(spec: &str) -> Result<SocketAddr, CliError> {
    tokio::net::lookup_host(spec)
        .await
        .map_err(|e| CliError::Config(format!("invalid slave address {}: {}", spec, e)))?
        .next()
        .ok_or_else(|| CliError::Config(format!("could not resolve slave address {}", spec)))
}

/// Builds a NOTIFY (OPCODE=4, question SOA) for `soa.origin`, signs it if
/// `key` is given, sends it to `addr`, and waits for the slave's reply.
async fn send_notify(
    socket: &UdpSocket,
    origin: &str,
    soa: &Soa,
    key: Option<&TsigKey>,
    addr: SocketAddr,
    timeout: Duration,
) -> Result<(), CliError> {
    let mut packet = DnsPacket::new();
    packet.header.id = notify_id(soa.serial);
    packet.header.opcode = 4;
    packet.header.authoritative_answer = true;
    packet.header.questions = 1;
    packet.questions.push(DnsQuestion::new(origin.to_string(), QueryType::Soa));

    if let Some(key) = key {
        tsig::sign(&mut packet, key, None, 512).map_err(|e| CliError::Io(e.to_string()))?;
    }

    let mut buf = VectorPacketBuffer::new();
    packet.write(&mut buf, 512).map_err(|e| CliError::Io(e.to_string()))?;

    socket
        .send_to(&buf.buffer, addr)
        .await
        .map_err(|e| CliError::Io(e.to_string()))?;

    let mut reply = [0u8; 512];
    match tokio::time::timeout(timeout, socket.recv_from(&mut reply)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(CliError::Io(e.to_string())),
        Err(_) => Err(CliError::Io(format!("timed out waiting for NOTIFY reply from {}", addr))),
    }
}

/// Transaction id derived from the SOA serial: arbitrary but stable per
/// invocation, avoiding a dependency on a random source for a one-shot tool.
fn notify_id(serial: u32) -> u16 {
    (serial ^ (serial >> 16)) as u16
}
