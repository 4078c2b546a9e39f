//! Discovery broadcast sniffer.
//!
//! Binds the fixed service port with SO_REUSEADDR, classifies every
//! datagram by size, dumps small packets in hex/decimal/ASCII, and keeps
//! a per-size histogram for the life of the session.

use crate::session::{Session, TransportError};
use crate::udp::SERVICE_PORT;
use anyhow::{Context, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use chrono::Local;
use colored::Colorize;
use log::debug;
use once_cell::sync::Lazy;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{BTreeMap, HashMap};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::decode::{ascii_string, decimal_string, hex_string};

/// Packets at or below this size get the full hex/decimal/ASCII dump.
const SMALL_PACKET_LIMIT: usize = 10;

/// Largest datagram the device is known to send.
const MAX_DATAGRAM: usize = 1024;

/// Interval between interim histogram summaries, in packets.
const SUMMARY_INTERVAL: u64 = 20;

/// Known discovery payload sizes. These are logged by name and never
/// hex-dumped.
static KNOWN_SIZES: Lazy<HashMap<usize, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(186, "Discovery packet");
    m.insert(225, "Extended discovery");
    m
});

/// Configuration for a sniffing session.
#[derive(Debug, Clone)]
pub struct SnifferConfig {
    /// UDP port to bind
    pub port: u16,
    /// Stop after this long (None = run until Ctrl+C)
    pub duration: Option<Duration>,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            port: SERVICE_PORT,
            duration: None,
        }
    }
}

/// Classification of one sniffed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketClass {
    /// Four zero bytes.
    FourZeros,
    /// Four 0xFF bytes.
    BroadcastMarker,
    /// A literal ASCII ping, upper or lower case.
    AsciiPing(String),
    /// An unrecognized 4-byte word, shown as u32 both ways.
    UnknownWord { be: u32, le: u32 },
    /// Small but not 4 bytes; the dump rows speak for themselves.
    SmallOther,
    /// A payload size the device is known to send.
    KnownSize(&'static str),
    /// Everything else.
    Other,
}

impl PacketClass {
    /// Short type label for the dump output, when there is one.
    pub fn label(&self) -> Option<String> {
        match self {
            PacketClass::FourZeros => {
                Some("Four zeros (possible probe/keepalive)".to_string())
            }
            PacketClass::BroadcastMarker => {
                Some("Four 0xFF (possible broadcast marker)".to_string())
            }
            PacketClass::AsciiPing(text) => Some(format!("ASCII '{}'", text)),
            _ => None,
        }
    }
}

/// Classify a datagram payload.
pub fn classify(data: &[u8]) -> PacketClass {
    if let Some(&name) = KNOWN_SIZES.get(&data.len()) {
        return PacketClass::KnownSize(name);
    }
    if data.len() > SMALL_PACKET_LIMIT {
        return PacketClass::Other;
    }
    if data.len() != 4 {
        return PacketClass::SmallOther;
    }
    match data {
        [0, 0, 0, 0] => PacketClass::FourZeros,
        [0xff, 0xff, 0xff, 0xff] => PacketClass::BroadcastMarker,
        b"ping" | b"PING" => {
            PacketClass::AsciiPing(String::from_utf8_lossy(data).to_string())
        }
        _ => PacketClass::UnknownWord {
            be: BigEndian::read_u32(data),
            le: LittleEndian::read_u32(data),
        },
    }
}

/// Per-size datagram counts for one session.
///
/// The sum of all counts always equals the number of datagrams received.
#[derive(Debug, Default)]
pub struct SizeHistogram {
    counts: BTreeMap<usize, u64>,
}

impl SizeHistogram {
    pub fn record(&mut self, size: usize) {
        *self.counts.entry(size).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Entries sorted by size, ascending.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.counts.iter().map(|(&size, &count)| (size, count))
    }
}

/// Bind the sniffer socket with SO_REUSEADDR and a short read timeout.
///
/// The short timeout keeps the loop responsive to Ctrl+C and the
/// deadline; it is not a liveness requirement.
fn bind_sniffer_socket(port: u16) -> Result<UdpSocket> {
    let open = || -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
        socket.bind(&addr.into())?;
        Ok(socket.into())
    };

    let socket = open().map_err(|source| TransportError::UdpBind { port, source })?;
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .with_context(|| "Failed to set read timeout")?;
    Ok(socket)
}

/// The sniffing loop proper; returns the session histogram.
fn sniff_loop(
    socket: &UdpSocket,
    config: &SnifferConfig,
    running: &AtomicBool,
) -> Result<SizeHistogram> {
    let session = Session::new(config.duration);
    let mut histogram = SizeHistogram::default();
    let mut buf = [0u8; MAX_DATAGRAM];

    while running.load(Ordering::SeqCst) && !session.expired() {
        match socket.recv_from(&mut buf) {
            Ok((len, addr)) => {
                histogram.record(len);
                print_packet(&buf[..len], addr);

                if histogram.total() % SUMMARY_INTERVAL == 0 {
                    print_interim_summary(&histogram);
                }
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                // Idle read window; check the flags and go again.
            }
            Err(e) => {
                eprintln!("{} Receive error: {}", "[ERROR]".red().bold(), e);
            }
        }
    }

    debug!(
        "sniff loop finished after {:.1}s, {} datagrams",
        session.elapsed().as_secs_f32(),
        histogram.total()
    );
    Ok(histogram)
}

fn print_packet(data: &[u8], addr: SocketAddr) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let class = classify(data);

    match class {
        PacketClass::KnownSize(name) => {
            println!(
                "[{}] {} from {} ({} bytes)",
                timestamp,
                name.green(),
                addr.ip(),
                data.len()
            );
        }
        PacketClass::Other => {
            println!(
                "[{}] Packet from {}:{} ({} bytes)",
                timestamp,
                addr.ip(),
                addr.port(),
                data.len()
            );
        }
        small => {
            println!(
                "\n[{}] {} from {}:{}",
                timestamp,
                "SMALL PACKET".yellow().bold(),
                addr.ip(),
                addr.port()
            );
            println!("  Size: {} bytes", data.len());
            println!("  Hex: {}", hex_string(data));
            println!("  Decimal: {}", decimal_string(data));
            println!("  ASCII: {}", ascii_string(data));
            if let Some(label) = small.label() {
                println!("  Type: {}", label.cyan());
            } else if let PacketClass::UnknownWord { be, le } = small {
                println!("  As uint32 (BE): {}", be);
                println!("  As uint32 (LE): {}", le);
            }
        }
    }
}

fn print_interim_summary(histogram: &SizeHistogram) {
    let parts: Vec<String> = histogram
        .iter()
        .map(|(size, count)| format!("{}: {}", size, count))
        .collect();
    println!(
        "\n{}\n",
        format!("--- Summary: {{{}}} ---", parts.join(", ")).dimmed()
    );
}

fn print_final_summary(histogram: &SizeHistogram) {
    println!("\n{}", "Final packet count summary:".cyan().bold());
    if histogram.is_empty() {
        println!("  (no packets received)");
        return;
    }
    for (size, count) in histogram.iter() {
        println!("  {} bytes: {} packets", size, count);
    }
    println!("  Total: {} packets", histogram.total());
}

/// Run the sniffer with Ctrl+C handling.
pub fn run_sniffer(config: SnifferConfig) -> Result<()> {
    let socket = bind_sniffer_socket(config.port)?;

    println!(
        "{} Monitoring UDP port {} for packets...",
        "[*]".cyan().bold(),
        config.port.to_string().white().bold()
    );
    match config.duration {
        Some(d) => println!("Capturing for {}s", d.as_secs()),
        None => println!("Press Ctrl+C to stop"),
    }
    println!("{}", "=".repeat(60));

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\n{}", "Stopping sniffer...".yellow());
        flag.store(false, Ordering::SeqCst);
    })
    .with_context(|| "Failed to set Ctrl+C handler")?;

    let histogram = sniff_loop(&socket, &config, &running)?;
    print_final_summary(&histogram);
    println!("{}", "Monitoring complete.".cyan().bold());

    // socket drops here; the transport is closed exactly once.
    Ok(())
}
