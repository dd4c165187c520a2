//! Adapter between a relay socket and the exec driver
//!
//! The exec driver wants three things: a stream of raw stdin bytes, a sink
//! for process output, and a source of terminal-size updates. The adapter
//! provides all three over one [`RelaySocket`], decoding control frames on
//! the input path and publishing resize requests to a single-slot latch.
//!
//! The latch is a [`watch`] channel: a late or slow consumer sees only the
//! most recent size, never a backlog, and a consumer that never polls costs
//! the input path nothing. Before the first explicit resize the latch holds
//! the zero-value default; consumers treat that as "no size known yet".

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::codec::{self, TerminalDimensions};
use super::socket::{RelayMessage, RelaySocket};
use crate::error::Result;

/// Presents a [`RelaySocket`] in the shape the exec driver consumes.
pub struct TerminalAdapter {
    socket: Arc<RelaySocket>,
    size_tx: watch::Sender<TerminalDimensions>,
}

impl TerminalAdapter {
    /// Wraps a relay socket. The size latch starts at the zero default.
    pub fn new(socket: Arc<RelaySocket>) -> Self {
        let (size_tx, _) = watch::channel(TerminalDimensions::default());
        Self { socket, size_tx }
    }

    /// The underlying relay socket.
    pub fn socket(&self) -> &Arc<RelaySocket> {
        &self.socket
    }

    /// A handle on the size latch. `changed()` resolves whenever a resize
    /// record arrives; `borrow()` always yields the latest size without
    /// blocking.
    pub fn size_receiver(&self) -> watch::Receiver<TerminalDimensions> {
        self.size_tx.subscribe()
    }

    /// Next chunk of terminal input from the client.
    ///
    /// Decodes each inbound frame; resize records are published to the
    /// size latch as a side effect and do not surface here. Returns
    /// `Err(Closed)` once the socket closes, and propagates `Decode`
    /// errors since input semantics are ambiguous past a malformed frame.
    pub async fn read_input(&self) -> Result<Vec<u8>> {
        loop {
            let message = self.socket.read().await?;
            let decoded = codec::decode(&message.payload)?;
            if let Some(size) = decoded.dimensions() {
                debug!(
                    session_id = %self.socket.id(),
                    rows = size.rows,
                    cols = size.cols,
                    "resize requested"
                );
                // Latch the newest size; overwrite is the point.
                let _ = self.size_tx.send(size);
            }
            if !decoded.input.is_empty() {
                return Ok(decoded.input);
            }
        }
    }

    /// Forwards process output to the client as a text frame.
    pub async fn write_output(&self, output: Vec<u8>) -> Result<()> {
        self.socket.write(RelayMessage::text(output)).await
    }
}
