//! Porthole console API
//!
//! A web API over one or more Kubernetes clusters for operational
//! introspection and interactive container access. The core subsystem is
//! the exec/terminal relay: an HTTP connection upgraded to a WebSocket,
//! multiplexed against a remote container's stdin/stdout/stderr/resize
//! channels through the cluster's exec subresource.
//!
//! # Architecture
//!
//! ```text
//! browser ──ws──► Relay Socket ──► Stream Adapter ──► Exec Orchestrator ──► kube exec
//!                 (two pumps)      (codec + latch)    (interactive / one-shot)
//! ```
//!
//! # Endpoints
//!
//! - `GET /api/v1/clusters` - Registered cluster names
//! - `GET /api/v1/clusters/{cluster}/namespaces/{namespace}/pods/{pod}/shell` - Exec relay (WebSocket)
//! - `GET /healthz` - Health check

#![deny(missing_docs)]

pub mod clusters;
pub mod error;
pub mod exec;
pub mod handlers;
pub mod relay;
pub mod server;

pub use error::{Error, Result};
