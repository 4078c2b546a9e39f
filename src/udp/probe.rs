//! Tagged UDP test-packet sender.
//!
//! Sends one credential-test packet (service type 2, JSON body) and one
//! discovery packet (service type 1) at the device, waiting a bounded
//! time for any reply to each. The probe is informational: a timeout is
//! reported, not an error.

use crate::decode::decode_frame;
use crate::udp::{SERVICE_TYPE_CREDENTIALS, SERVICE_TYPE_DISCOVERY};
use anyhow::{Context, Result};
use colored::Colorize;
use log::debug;
use serde::Serialize;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

/// How much of a reply payload gets printed.
const REPLY_PREVIEW_BYTES: usize = 100;

/// Body of the credential-test packet.
#[derive(Debug, Serialize)]
struct CredentialTest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    message: &'a str,
}

/// Configuration for one probe run.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Device IP address
    pub host: IpAddr,
    /// Device service port
    pub port: u16,
    /// How long to wait for each reply
    pub reply_timeout: Duration,
    /// Message carried in the credential test payload
    pub message: String,
}

/// Prefix a payload with its service-type byte.
pub fn tagged_packet(service_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(payload.len() + 1);
    packet.push(service_type);
    packet.extend_from_slice(payload);
    packet
}

/// Service type 2: credential test with a JSON body.
pub fn credential_packet(message: &str) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(&CredentialTest {
        kind: "test_credential",
        message,
    })
    .with_context(|| "Failed to encode credential test body")?;
    Ok(tagged_packet(SERVICE_TYPE_CREDENTIALS, &body))
}

/// Service type 1: minimal discovery probe.
pub fn discovery_packet() -> Vec<u8> {
    tagged_packet(SERVICE_TYPE_DISCOVERY, b"test discovery")
}

/// Send one packet and report whatever comes back within the timeout.
fn send_and_await(socket: &UdpSocket, target: SocketAddr, label: &str, packet: &[u8]) -> Result<()> {
    println!(
        "{} Sending {} packet ({} bytes)...",
        "[TX]".cyan().bold(),
        label,
        packet.len()
    );
    socket
        .send_to(packet, target)
        .with_context(|| format!("Failed to send {} packet to {}", label, target))?;

    let mut buf = [0u8; 4096];
    match socket.recv_from(&mut buf) {
        Ok((len, addr)) => {
            println!(
                "{} Received response ({} bytes) from {}",
                "[OK]".green().bold(),
                len,
                addr
            );
            let preview = &buf[..len.min(REPLY_PREVIEW_BYTES)];
            println!("  Response: {}", decode_frame(preview));
        }
        Err(ref e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            println!("{} No response received (timeout)", "[--]".yellow().bold());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Receive failed after {} packet", label));
        }
    }

    Ok(())
}

/// Run both probe tests against the device.
pub fn run_probe(config: ProbeConfig) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").with_context(|| "Failed to bind probe socket")?;
    socket
        .set_read_timeout(Some(config.reply_timeout))
        .with_context(|| "Failed to set reply timeout")?;

    let target = SocketAddr::new(config.host, config.port);
    debug!("probing {} from {:?}", target, socket.local_addr());

    println!(
        "{} Testing UDP communication with device at {}\n",
        "[*]".cyan().bold(),
        target.to_string().white().bold()
    );

    println!("{}", "Test 1: credential test (service type 2)".white().bold());
    send_and_await(
        &socket,
        target,
        "service type 2 (credential test)",
        &credential_packet(&config.message)?,
    )?;

    println!("\n{}", "Test 2: discovery probe (service type 1)".white().bold());
    send_and_await(
        &socket,
        target,
        "service type 1 (discovery)",
        &discovery_packet(),
    )?;

    println!("\nProbe complete. Check the device serial output for logs.");

    // socket drops here; the transport is closed exactly once.
    Ok(())
}
