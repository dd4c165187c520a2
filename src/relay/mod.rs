//! The exec/terminal relay
//!
//! Bridges one upgraded WebSocket to a remote container's exec streams:
//! - [`socket`] owns the transport and its two pump tasks
//! - [`codec`] splits inbound payloads into terminal input and resize
//!   control records
//! - [`adapter`] presents socket I/O in the shape the exec driver consumes
//! - [`registry`] tracks live sockets for diagnostics

pub mod adapter;
pub mod codec;
pub mod registry;
pub mod socket;
