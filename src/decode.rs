//! Permissive decoding of captured frames.
//!
//! Serial lines and UDP payloads from a misbehaving device are routinely
//! not valid UTF-8. Decoding therefore never fails: a frame resolves to
//! either text or raw bytes with a hex rendering, and the capture loops
//! keep going either way.

use std::fmt;

/// Result of decoding one received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Valid UTF-8 text, trailing CR/LF stripped.
    Text(String),
    /// Not valid UTF-8; raw bytes retained for hex display.
    Binary(Vec<u8>),
}

impl Decoded {
    pub fn is_text(&self) -> bool {
        matches!(self, Decoded::Text(_))
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Text(text) => write!(f, "{}", text),
            Decoded::Binary(bytes) => write!(f, "[binary data: {}]", hex_string(bytes)),
        }
    }
}

/// Decode a received frame. Total for any input byte sequence.
pub fn decode_frame(bytes: &[u8]) -> Decoded {
    match std::str::from_utf8(bytes) {
        Ok(text) => Decoded::Text(text.trim_end_matches(['\r', '\n']).to_string()),
        Err(_) => Decoded::Binary(bytes.to_vec()),
    }
}

/// Space-separated lowercase hex, one pair per byte.
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decimal byte values, e.g. `[0, 13, 255]`.
pub fn decimal_string(bytes: &[u8]) -> String {
    let values: Vec<String> = bytes.iter().map(|b| b.to_string()).collect();
    format!("[{}]", values.join(", "))
}

/// Printable ASCII as-is, everything else as `.`.
pub fn ascii_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if (32..127).contains(&b) {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
