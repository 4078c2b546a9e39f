//! Session bookkeeping shared by every probe.
//!
//! Each invocation runs exactly one session: open the transport,
//! optionally reset the device, capture until a deadline or Ctrl+C,
//! then close. The transport is owned by the probe's run function and
//! dropped exactly once on every exit path.

use std::time::{Duration, Instant};
use thiserror::Error;

/// Fatal transport-open failures.
///
/// Nothing in this taxonomy is retried; the failure is reported to the
/// operator and the process exits non-zero.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial port {port}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to bind UDP port {port}")]
    UdpBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// One capture session: a start instant and an optional deadline.
///
/// With a deadline of `D` and a read timeout of `t`, a capture loop that
/// checks `expired()` between reads runs for at most `D + t`.
#[derive(Debug)]
pub struct Session {
    started: Instant,
    deadline: Option<Duration>,
}

impl Session {
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            deadline,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => self.elapsed() >= deadline,
            None => false,
        }
    }
}

/// Decides whether a captured line is worth printing prominently.
pub trait FrameFilter {
    fn is_interesting(&self, line: &str) -> bool;
}

/// Prints everything.
pub struct MatchAll;

impl FrameFilter for MatchAll {
    fn is_interesting(&self, _line: &str) -> bool {
        true
    }
}

/// Substring keyword match, as the ad hoc monitor scripts did.
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

impl FrameFilter for KeywordFilter {
    fn is_interesting(&self, line: &str) -> bool {
        self.keywords.iter().any(|k| line.contains(k))
    }
}
