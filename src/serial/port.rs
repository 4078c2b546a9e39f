//! Serial port configuration, connection management and device reset.
//!
//! Handles USB serial port discovery and connection for ESP32 debugging.

use crate::session::TransportError;
use anyhow::{Context, Result};
use colored::Colorize;
use log::debug;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::Read;
use std::thread;
use std::time::Duration;

/// Default baud rate for the ESP32 serial console.
pub const ESP32_DEFAULT_BAUD: u32 = 115200;

/// Configuration for a serial port connection.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Serial port path (e.g., /dev/ttyUSB0, /dev/cu.usbmodem1101)
    pub port_path: String,
    /// Baud rate (default: 115200)
    pub baud_rate: u32,
    /// Data bits (default: 8)
    pub data_bits: DataBits,
    /// Parity (default: None)
    pub parity: Parity,
    /// Stop bits (default: 1)
    pub stop_bits: StopBits,
    /// Flow control (default: None)
    pub flow_control: FlowControl,
    /// Read timeout
    pub timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_path: String::from("/dev/ttyUSB0"),
            baud_rate: ESP32_DEFAULT_BAUD,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: Duration::from_millis(100),
        }
    }
}

impl PortConfig {
    /// Create a new configuration with default ESP32 settings.
    pub fn new(port_path: &str) -> Self {
        Self {
            port_path: port_path.to_string(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Wrapper around a serial port connection.
///
/// Owned by exactly one session; dropping it closes the port.
pub struct SerialConnection {
    port: Box<dyn SerialPort>,
    config: PortConfig,
}

impl SerialConnection {
    /// Open a serial connection with the given configuration.
    ///
    /// A missing device node or a permission problem surfaces here as a
    /// fatal [`TransportError::SerialOpen`]; there is no retry.
    pub fn open(config: PortConfig) -> Result<Self> {
        let port = serialport::new(&config.port_path, config.baud_rate)
            .data_bits(config.data_bits)
            .parity(config.parity)
            .stop_bits(config.stop_bits)
            .flow_control(config.flow_control)
            .timeout(config.timeout)
            .open()
            .map_err(|source| TransportError::SerialOpen {
                port: config.port_path.clone(),
                source,
            })?;

        debug!("opened {} at {} baud", config.port_path, config.baud_rate);
        Ok(Self { port, config })
    }

    /// Get the port configuration.
    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    /// Read one raw line from the serial port (until newline).
    ///
    /// Returns `Ok(None)` when the read timeout elapses with nothing
    /// buffered. The bytes are returned undecoded; the caller decides how
    /// to render non-UTF-8 output.
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buffer = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            match self.port.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    buffer.push(byte[0]);
                }
                Ok(_) => {
                    if buffer.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if buffer.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                Err(e) => return Err(e).with_context(|| "Failed to read from serial port"),
            }
        }

        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }

        Ok(Some(buffer))
    }

    /// Clear input and output buffers.
    pub fn clear_buffers(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .with_context(|| "Failed to clear serial buffers")
    }

    /// Set DTR (Data Terminal Ready) signal.
    pub fn set_dtr(&mut self, level: bool) -> Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .with_context(|| "Failed to set DTR")
    }

    /// Set RTS (Request To Send) signal.
    pub fn set_rts(&mut self, level: bool) -> Result<()> {
        self.port
            .write_request_to_send(level)
            .with_context(|| "Failed to set RTS")
    }

    /// Force the attached device to reboot by toggling DTR/RTS.
    ///
    /// ESP32 dev boards wire DTR/RTS to EN and GPIO0, so this sequence
    /// resets the chip into a normal boot. Purely time-delay based; there
    /// is no acknowledgment beyond the boot banner on the console.
    pub fn reset_device(&mut self) -> Result<()> {
        debug!("toggling DTR/RTS to reset device");
        self.set_dtr(false)?;
        thread::sleep(Duration::from_millis(100));
        self.set_rts(true)?;
        thread::sleep(Duration::from_millis(100));
        self.set_dtr(true)?;
        self.set_rts(false)?;
        thread::sleep(Duration::from_millis(500));
        Ok(())
    }
}

/// Information about a detected serial port.
#[derive(Debug, Clone)]
pub struct PortInfo {
    pub path: String,
    pub port_type: PortType,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortType {
    UsbSerial,
    PciSerial,
    Bluetooth,
    Unknown,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortType::UsbSerial => write!(f, "USB Serial"),
            PortType::PciSerial => write!(f, "PCI Serial"),
            PortType::Bluetooth => write!(f, "Bluetooth"),
            PortType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// List all available serial ports.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports =
        serialport::available_ports().with_context(|| "Failed to enumerate serial ports")?;

    let port_infos: Vec<PortInfo> = ports
        .into_iter()
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    PortType::UsbSerial,
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::PciPort => {
                    (PortType::PciSerial, None, None, None, None, None)
                }
                serialport::SerialPortType::BluetoothPort => {
                    (PortType::Bluetooth, None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    (PortType::Unknown, None, None, None, None, None)
                }
            };

            PortInfo {
                path: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect();

    Ok(port_infos)
}

/// Print formatted list of available serial ports.
pub fn print_ports() -> Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        println!("{}", "No serial ports found".yellow());
        println!("\n{}", "Troubleshooting tips:".cyan().bold());
        println!("  1. Connect the ESP32 board over USB");
        println!("  2. Check if the device is recognized: ls -la /dev/ttyUSB* /dev/ttyACM*");
        println!("  3. Add your user to the 'dialout' group: sudo usermod -aG dialout $USER");
        println!("  4. Check dmesg for connection events: dmesg | tail -20");
        return Ok(());
    }

    println!("{}", "Available Serial Ports:".green().bold());
    println!("{}", "=".repeat(60));

    for port in ports {
        println!("\n{}: {}", "Port".cyan(), port.path.white().bold());
        println!("  Type: {}", port.port_type);

        if let Some(ref mfg) = port.manufacturer {
            println!("  Manufacturer: {}", mfg);
        }
        if let Some(ref prod) = port.product {
            println!("  Product: {}", prod);
        }
        if let Some(ref sn) = port.serial_number {
            println!("  Serial: {}", sn);
        }
        if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            println!("  VID:PID: {:04x}:{:04x}", vid, pid);
        }
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "{}",
        "Use: esp-probe serial monitor -p <PORT> to start monitoring".yellow()
    );

    Ok(())
}

/// Auto-detect likely ESP32 serial ports.
///
/// Matches the Espressif native USB interface plus the CP210x and CH340
/// adapters found on most dev kits.
pub fn detect_esp32_ports() -> Result<Vec<PortInfo>> {
    let ports = list_ports()?;

    let esp_ports: Vec<PortInfo> = ports
        .into_iter()
        .filter(|p| {
            if p.port_type != PortType::UsbSerial {
                return false;
            }

            if let (Some(vid), Some(pid)) = (p.vid, p.pid) {
                // Espressif native USB (ESP32-S2/S3/C3)
                if vid == 0x303a {
                    return true;
                }
                // Silicon Labs CP210x
                if vid == 0x10c4 && (pid == 0xea60 || pid == 0xea70) {
                    return true;
                }
                // WCH CH340/CH341
                if vid == 0x1a86 && (pid == 0x7523 || pid == 0x5523) {
                    return true;
                }
            }

            // Fallback: check product name for common keywords
            if let Some(ref prod) = p.product {
                let prod_lower = prod.to_lowercase();
                return prod_lower.contains("esp32")
                    || prod_lower.contains("serial")
                    || prod_lower.contains("uart")
                    || prod_lower.contains("cp210")
                    || prod_lower.contains("ch340");
            }

            false
        })
        .collect();

    Ok(esp_ports)
}
