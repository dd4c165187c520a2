//! Exec orchestration
//!
//! Opens a command against a container through the cluster's exec
//! subresource and drives the resulting streams, either interactively
//! (bridged to a relay socket through a [`TerminalAdapter`]) or in
//! one-shot mode (output buffered and returned).
//!
//! The cluster-side surface is the [`ExecBackend`] / [`ExecStreams`]
//! trait pair so tests drive the orchestrator against fakes; the
//! production implementation wraps kube-rs.
//!
//! [`TerminalAdapter`]: crate::relay::adapter::TerminalAdapter
//! [`ExecBackend`]: streams::ExecBackend
//! [`ExecStreams`]: streams::ExecStreams

pub mod orchestrator;
pub mod streams;

pub use orchestrator::{run_interactive, run_once, tokenize_command, DEFAULT_SHELL};
pub use streams::{ExecBackend, ExecStreams, KubeExecBackend};

/// Identifies the container a command runs in.
#[derive(Debug, Clone)]
pub struct ExecTarget {
    /// Cluster name, as known to the cluster registry
    pub cluster: String,
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub pod: String,
    /// Container name; `None` defers to the pod's default container
    pub container: Option<String>,
}

/// Which process streams the exec session attaches.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Attach stdin
    pub stdin: bool,
    /// Attach stdout
    pub stdout: bool,
    /// Attach stderr
    pub stderr: bool,
    /// Allocate a TTY on the remote side
    pub tty: bool,
}

impl StreamSettings {
    /// Settings for an interactive terminal: all streams plus a TTY.
    pub fn interactive() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            tty: true,
        }
    }

    /// Settings for a one-shot command: no stdin, optionally a TTY.
    pub fn one_shot(tty: bool) -> Self {
        Self {
            stdin: false,
            stdout: true,
            stderr: true,
            tty,
        }
    }
}
