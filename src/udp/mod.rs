//! UDP discovery probes.
//!
//! The device advertises itself and accepts provisioning traffic on one
//! fixed UDP port. Payloads carry a single leading service-type byte;
//! their internal structure is not decoded here beyond size
//! classification.

pub mod probe;
pub mod sniffer;

pub use probe::{run_probe, ProbeConfig};
pub use sniffer::{run_sniffer, SnifferConfig};

/// Fixed service port the device binds for discovery and provisioning.
pub const SERVICE_PORT: u16 = 49497;

/// Leading service-type byte: discovery probe.
pub const SERVICE_TYPE_DISCOVERY: u8 = 1;

/// Leading service-type byte: credential exchange.
pub const SERVICE_TYPE_CREDENTIALS: u8 = 2;
