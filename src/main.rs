//! esp-probe
//!
//! Ad hoc diagnostic probes for an ESP32-based device: serial console
//! capture after resets, UDP discovery sniffing on the fixed service
//! port, and tagged test-packet sending.
//!
//! Every invocation runs exactly one bounded session and exits; nothing
//! persists between runs.
//!
//! # Usage
//!
//! ```bash
//! # List serial ports
//! esp-probe serial list
//!
//! # Capture everything the console prints, with timestamps
//! esp-probe serial monitor -p /dev/ttyUSB0
//!
//! # Reboot the device and watch for fixed-port bind messages for 30s
//! esp-probe serial monitor -p /dev/ttyUSB0 --reset -d 30 \
//!     -k 49497 -k Discovery -k bound
//!
//! # Verify the firmware clears ownership state on boot
//! esp-probe serial reset-test -p /dev/ttyUSB0
//!
//! # Sniff discovery broadcasts and bucket packet sizes
//! esp-probe udp sniff
//!
//! # Send tagged test packets at the device
//! esp-probe udp probe 192.168.178.100
//! ```

mod decode;
mod serial;
mod session;
mod udp;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::net::IpAddr;
use std::time::Duration;

use serial::monitor::{run_monitor, MonitorConfig};
use serial::port::{detect_esp32_ports, print_ports, PortConfig, ESP32_DEFAULT_BAUD};
use serial::reset_test::{run_reset_test, ResetTestConfig};
use udp::probe::{run_probe, ProbeConfig};
use udp::sniffer::{run_sniffer, SnifferConfig};
use udp::SERVICE_PORT;

/// ESP32 diagnostic probes
///
/// Single-session serial and UDP probes for debugging an ESP32 device.
#[derive(Parser)]
#[command(name = "esp-probe")]
#[command(version = "0.1.0")]
#[command(about = "Serial and UDP diagnostic probes for ESP32 devices")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serial console probes
    #[command(subcommand)]
    Serial(SerialCommands),

    /// UDP discovery probes
    #[command(subcommand)]
    Udp(UdpCommands),
}

#[derive(Subcommand)]
enum SerialCommands {
    /// List available serial ports
    List,

    /// Capture serial console output
    Monitor {
        /// Serial port path (e.g., /dev/ttyUSB0); auto-detected if omitted
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long, default_value_t = ESP32_DEFAULT_BAUD)]
        baud: u32,

        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(short, long)]
        duration: Option<u64>,

        /// Only print lines containing one of these keywords
        #[arg(short, long)]
        keyword: Vec<String>,

        /// Toggle DTR/RTS to reboot the device before capturing
        #[arg(long)]
        reset: bool,

        /// Write a full copy of the capture to this file
        #[arg(short, long)]
        log: Option<String>,

        /// Disable timestamp prefixes
        #[arg(long)]
        no_timestamps: bool,
    },

    /// Reboot the device and verify it clears ownership state on boot
    ResetTest {
        /// Serial port path; auto-detected if omitted
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long, default_value_t = ESP32_DEFAULT_BAUD)]
        baud: u32,

        /// Boot capture window in seconds
        #[arg(short, long, default_value_t = 20)]
        duration: u64,
    },
}

#[derive(Subcommand)]
enum UdpCommands {
    /// Sniff discovery broadcasts and bucket packet sizes
    Sniff {
        /// UDP port to bind
        #[arg(short, long, default_value_t = SERVICE_PORT)]
        port: u16,

        /// Stop after this many seconds (default: run until Ctrl+C)
        #[arg(short, long)]
        duration: Option<u64>,
    },

    /// Send tagged test packets and report replies
    Probe {
        /// Device IP address
        host: IpAddr,

        /// Device service port
        #[arg(short, long, default_value_t = SERVICE_PORT)]
        port: u16,

        /// Seconds to wait for each reply
        #[arg(short, long, default_value_t = 5)]
        timeout: u64,

        /// Message carried in the credential test payload
        #[arg(short, long, default_value = "Hello from esp-probe")]
        message: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Serial(cmd) => handle_serial(cmd),
        Commands::Udp(cmd) => handle_udp(cmd),
    }
}

fn handle_serial(cmd: SerialCommands) -> Result<()> {
    match cmd {
        SerialCommands::List => print_ports(),

        SerialCommands::Monitor {
            port,
            baud,
            duration,
            keyword,
            reset,
            log,
            no_timestamps,
        } => {
            let port_path = resolve_port(port)?;
            let config = MonitorConfig {
                port_config: PortConfig::new(&port_path).with_baud_rate(baud),
                duration: duration.map(Duration::from_secs),
                keywords: keyword,
                show_timestamps: !no_timestamps,
                reset_on_connect: reset,
                log_file: log,
            };
            run_monitor(config)
        }

        SerialCommands::ResetTest {
            port,
            baud,
            duration,
        } => {
            let port_path = resolve_port(port)?;
            let config = ResetTestConfig {
                port_config: PortConfig::new(&port_path).with_baud_rate(baud),
                window: Duration::from_secs(duration),
            };
            run_reset_test(config)
        }
    }
}

fn handle_udp(cmd: UdpCommands) -> Result<()> {
    match cmd {
        UdpCommands::Sniff { port, duration } => {
            let config = SnifferConfig {
                port,
                duration: duration.map(Duration::from_secs),
            };
            run_sniffer(config)
        }

        UdpCommands::Probe {
            host,
            port,
            timeout,
            message,
        } => {
            let config = ProbeConfig {
                host,
                port,
                reply_timeout: Duration::from_secs(timeout),
                message,
            };
            run_probe(config)
        }
    }
}

/// Use the given port, or auto-detect a likely ESP32 adapter.
fn resolve_port(port: Option<String>) -> Result<String> {
    if let Some(p) = port {
        return Ok(p);
    }

    let detected = detect_esp32_ports()?;
    if detected.is_empty() {
        eprintln!(
            "{} No ESP32 serial ports detected",
            "[ERROR]".red().bold()
        );
        eprintln!("Use -p to specify the port manually");
        std::process::exit(1);
    }

    println!(
        "{} Auto-detected: {}",
        "[OK]".green().bold(),
        detected[0].path.white()
    );
    Ok(detected[0].path.clone())
}
