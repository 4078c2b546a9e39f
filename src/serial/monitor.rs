//! Serial console capture.
//!
//! One bounded (or Ctrl+C-terminated) capture loop over a serial
//! connection:
//! - Permissive decoding; non-UTF-8 lines render as a hex fallback
//! - Optional keyword filtering with timestamped output
//! - Optional DTR/RTS device reset before capture starts
//! - Optional log file export
//! - Summary and exactly one transport close on every exit path

use crate::decode::{decode_frame, Decoded};
use crate::serial::port::{PortConfig, SerialConnection};
use crate::session::{FrameFilter, KeywordFilter, MatchAll, Session};
use anyhow::{Context, Result};
use chrono::Local;
use colored::Colorize;
use log::{debug, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lines announcing that the firmware claimed its fixed service port.
const PORT_BIND_SUCCESS: &[(&str, &str)] = &[
    (
        "Unified service task started on port 49497",
        "SUCCESS: ESP32 is using fixed port 49497!",
    ),
    (
        "Discovery socket bound to port 49497",
        "SUCCESS: Discovery socket bound to fixed port!",
    ),
];

/// Reset-reason markers worth calling out during a capture.
const RESET_MARKERS: &[(&str, &str)] = &[
    ("TG1WDT_SYS_RESET", "*** WATCHDOG RESET DETECTED! ***"),
    ("POWERON_RESET", "*** POWER ON RESET ***"),
];

/// Configuration for a serial capture session.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Port configuration
    pub port_config: PortConfig,
    /// Stop capturing after this long (None = run until Ctrl+C)
    pub duration: Option<Duration>,
    /// Only print lines containing one of these (empty = print everything)
    pub keywords: Vec<String>,
    /// Prefix printed lines with a timestamp
    pub show_timestamps: bool,
    /// Toggle DTR/RTS to reboot the device before capturing
    pub reset_on_connect: bool,
    /// Log file path (optional)
    pub log_file: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port_config: PortConfig::default(),
            duration: None,
            keywords: Vec::new(),
            show_timestamps: true,
            reset_on_connect: false,
            log_file: None,
        }
    }
}

/// Anything the capture loop can pull decoded lines from.
///
/// `Ok(None)` means the read timeout elapsed with no data.
pub trait LineSource {
    fn next_line(&mut self) -> Result<Option<Decoded>>;
}

impl LineSource for SerialConnection {
    fn next_line(&mut self) -> Result<Option<Decoded>> {
        Ok(self.read_line()?.map(|bytes| decode_frame(&bytes)))
    }
}

/// Serial console monitor.
pub struct SerialMonitor {
    config: MonitorConfig,
    lines_seen: usize,
    lines_matched: usize,
    running: Arc<AtomicBool>,
}

impl SerialMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            lines_seen: 0,
            lines_matched: 0,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get a clone of the running flag for signal handling.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Open the port, optionally reset the device, capture, summarize.
    pub fn run(&mut self) -> Result<()> {
        let mut conn = SerialConnection::open(self.config.port_config.clone())?;

        println!(
            "{} Connected to {} at {} baud",
            "[OK]".green().bold(),
            conn.config().port_path.white().bold(),
            conn.config().baud_rate
        );

        if self.config.reset_on_connect {
            println!("{} Resetting device...", "[*]".cyan().bold());
            conn.reset_device()?;
        }

        // Discard whatever was buffered before this session started.
        conn.clear_buffers()?;

        let mut log_writer = match self.config.log_file {
            Some(ref path) => {
                let file = File::create(path)
                    .with_context(|| format!("Failed to create log file: {}", path))?;
                println!("{} Logging to: {}", "[LOG]".cyan().bold(), path.white());
                Some(BufWriter::new(file))
            }
            None => None,
        };

        let keyword_filter = KeywordFilter::new(self.config.keywords.clone());
        let filter: &dyn FrameFilter = if keyword_filter.is_empty() {
            &MatchAll
        } else {
            &keyword_filter
        };

        println!("{}", "\n--- Serial Monitor Started ---".cyan().bold());
        match self.config.duration {
            Some(d) => println!("{}", format!("Capturing for {}s\n", d.as_secs()).yellow()),
            None => println!("{}", "Press Ctrl+C to stop\n".yellow()),
        }

        self.capture(&mut conn, filter, &mut log_writer)?;

        if let Some(ref mut writer) = log_writer {
            writer.flush()?;
        }
        self.print_summary();

        // conn drops here; the transport is closed exactly once.
        Ok(())
    }

    /// The capture loop proper, generic over the line source so it can be
    /// exercised without hardware.
    fn capture(
        &mut self,
        source: &mut dyn LineSource,
        filter: &dyn FrameFilter,
        log_writer: &mut Option<BufWriter<File>>,
    ) -> Result<()> {
        let session = Session::new(self.config.duration);

        while self.running.load(Ordering::SeqCst) && !session.expired() {
            match source.next_line() {
                Ok(Some(decoded)) => {
                    self.handle_line(&decoded, filter, log_writer)?;
                }
                Ok(None) => {
                    // No data, brief sleep
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    eprintln!("{} Read error: {}", "[ERROR]".red().bold(), e);
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        debug!(
            "capture loop finished after {:.1}s",
            session.elapsed().as_secs_f32()
        );
        Ok(())
    }

    fn handle_line(
        &mut self,
        decoded: &Decoded,
        filter: &dyn FrameFilter,
        log_writer: &mut Option<BufWriter<File>>,
    ) -> Result<()> {
        let rendered = decoded.to_string();
        if rendered.is_empty() {
            return Ok(());
        }
        self.lines_seen += 1;

        if filter.is_interesting(&rendered) {
            self.lines_matched += 1;
            println!("{}", self.format_line(&rendered, !decoded.is_text()));
            if decoded.is_text() {
                self.check_markers(&rendered);
            }
        }

        // The log file keeps everything, filtered or not.
        if let Some(ref mut writer) = log_writer {
            let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(writer, "[{}] {}", timestamp, rendered)?;
        }

        Ok(())
    }

    /// Call out reset reasons and fixed-port bind announcements.
    fn check_markers(&self, line: &str) {
        for (pattern, banner) in RESET_MARKERS {
            if line.contains(pattern) {
                warn!("reset marker seen: {}", pattern);
                println!("\n{}\n", banner.red().bold());
                return;
            }
        }
        for (pattern, banner) in PORT_BIND_SUCCESS {
            if line.contains(pattern) {
                println!("\n{}\n", banner.green().bold());
                return;
            }
        }
    }

    fn format_line(&self, line: &str, is_binary: bool) -> String {
        let mut output = String::new();

        if self.config.show_timestamps {
            let timestamp = Local::now().format("%H:%M:%S%.3f");
            output.push_str(&format!("[{}] ", timestamp.to_string().dimmed()));
        }

        if is_binary {
            output.push_str(&line.magenta().to_string());
        } else {
            output.push_str(line);
        }

        output
    }

    fn print_summary(&self) {
        println!("\n{}", "=".repeat(60).dimmed());
        println!("{}", "Monitoring complete.".cyan().bold());
        println!("Lines seen: {}", self.lines_seen);
        if !self.config.keywords.is_empty() {
            println!("Lines matched: {}", self.lines_matched);
        }
        if let Some(ref log) = self.config.log_file {
            println!("Log saved to: {}", log.white());
        }
        println!("{}", "=".repeat(60).dimmed());
    }

    #[cfg(test)]
    fn counts(&self) -> (usize, usize) {
        (self.lines_seen, self.lines_matched)
    }
}

/// Run the serial monitor with Ctrl+C handling.
pub fn run_monitor(config: MonitorConfig) -> Result<()> {
    let mut monitor = SerialMonitor::new(config);

    let running = monitor.running_flag();
    ctrlc::set_handler(move || {
        println!("\n{}", "Stopping monitor...".yellow());
        running.store(false, Ordering::SeqCst);
    })
    .with_context(|| "Failed to set Ctrl+C handler")?;

    monitor.run()
}
