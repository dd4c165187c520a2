//! Control-frame codec for the web terminal protocol
//!
//! Payloads arriving on a relay socket are either literal terminal input
//! or a structured control record carrying a resize request. Control
//! records are marked by a fixed 3-byte prefix followed by a JSON body:
//! `{"type": "...", "input": "...", "rows": N, "cols": N}`.
//!
//! This is a one-way decode (client to server); the server never encodes
//! control frames.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Fixed marker prefix distinguishing control records from terminal input.
pub const CONTROL_MARKER: [u8; 3] = [0xAA, 0x55, 0x01];

/// Terminal dimensions carried by a resize control record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TerminalDimensions {
    /// Terminal height in rows
    pub rows: u16,
    /// Terminal width in columns
    pub cols: u16,
}

/// Wire form of a marker-prefixed control record.
#[derive(Debug, Deserialize)]
struct ControlRecord {
    /// Record type tag sent by the terminal client; informational only
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    kind: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    rows: u16,
    #[serde(default)]
    cols: u16,
}

/// Decoded form of a relay message payload.
#[derive(Debug, PartialEq, Eq)]
pub struct ControlMessage {
    /// Literal keystrokes to forward to the remote process
    pub input: Vec<u8>,
    /// Requested terminal height; zero when no resize was present
    pub rows: u16,
    /// Requested terminal width; zero when no resize was present
    pub cols: u16,
}

impl ControlMessage {
    /// Whether this message carries an explicit resize request.
    pub fn has_resize(&self) -> bool {
        self.rows > 0 || self.cols > 0
    }

    /// The requested dimensions, when an explicit resize is present.
    pub fn dimensions(&self) -> Option<TerminalDimensions> {
        self.has_resize().then_some(TerminalDimensions {
            rows: self.rows,
            cols: self.cols,
        })
    }
}

/// Decode a relay message payload into a control message.
///
/// Payloads without the marker prefix are literal input. Marker-prefixed
/// payloads must parse as a control record; a parse failure is a hard
/// error surfaced to the caller, not silently ignored.
pub fn decode(payload: &[u8]) -> Result<ControlMessage> {
    match payload.strip_prefix(&CONTROL_MARKER) {
        Some(body) => {
            let record: ControlRecord =
                serde_json::from_slice(body).map_err(|e| Error::Decode(e.to_string()))?;
            Ok(ControlMessage {
                input: record.input.into_bytes(),
                rows: record.rows,
                cols: record.cols,
            })
        }
        None => Ok(ControlMessage {
            input: payload.to_vec(),
            rows: 0,
            cols: 0,
        }),
    }
}
