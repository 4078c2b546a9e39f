//! Serial console probes.
//!
//! This module covers:
//! - Listing and auto-detecting USB-to-serial adapters used by ESP32 boards
//! - Capturing console output, optionally after a DTR/RTS-driven reset
//! - Checking that the firmware clears ownership state on every boot

pub mod monitor;
pub mod port;
pub mod reset_test;

pub use monitor::{MonitorConfig, SerialMonitor};
pub use port::{PortConfig, SerialConnection};
