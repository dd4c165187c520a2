//! HTTP and WebSocket handlers
//!
//! The shell handler is the entry point of the exec relay: it resolves
//! the target cluster before upgrading (so unknown clusters get a plain
//! HTTP error instead of a doomed WebSocket), then wires the upgraded
//! socket to the exec orchestrator in interactive or one-shot mode.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::exec::{self, ExecTarget, KubeExecBackend, StreamSettings};
use crate::relay::adapter::TerminalAdapter;
use crate::relay::registry::ConnectionRegistry;
use crate::relay::socket::{RelayMessage, RelaySocket};
use crate::server::AppState;

fn default_true() -> bool {
    true
}

/// Query parameters of the shell route.
#[derive(Debug, Deserialize)]
pub struct ShellQuery {
    /// Container name; the pod's default container when absent
    pub container: Option<String>,
    /// Raw command string, tokenized on whitespace; empty means the
    /// default shell (interactive mode only)
    #[serde(default)]
    pub command: String,
    /// Attach stdin
    #[serde(default = "default_true")]
    pub stdin: bool,
    /// Attach stdout
    #[serde(default = "default_true")]
    pub stdout: bool,
    /// Attach stderr
    #[serde(default = "default_true")]
    pub stderr: bool,
    /// Allocate a remote TTY
    #[serde(default = "default_true")]
    pub tty: bool,
    /// Run the command once and return its output instead of opening an
    /// interactive terminal
    #[serde(default)]
    pub once: bool,
}

/// `GET /api/v1/clusters` — names of the registered clusters.
pub async fn list_clusters(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "clusters": state.clusters.names() }))
}

/// `GET /api/v1/clusters/{cluster}/namespaces/{namespace}/pods/{pod}/shell`
///
/// Everything that can fail cheaply fails before the upgrade: bad query
/// parameters, unknown cluster, one-shot without a command. After the
/// upgrade all errors travel to the client as text frames.
pub async fn shell_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((cluster, namespace, pod)): Path<(String, String, String)>,
    query: std::result::Result<Query<ShellQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(params) = query.map_err(|e| Error::UpgradeFailed(e.to_string()))?;

    let client = state.clusters.get(&cluster)?;
    let command = exec::tokenize_command(&params.command);
    if params.once && command.is_empty() {
        return Err(Error::UpgradeFailed(
            "one-shot exec requires a command".into(),
        ));
    }

    let target = ExecTarget {
        cluster,
        namespace,
        pod,
        container: params.container.clone(),
    };
    let connections = state.connections.clone();

    Ok(ws.on_upgrade(move |socket| {
        handle_shell_socket(socket, connections, client, target, command, params)
    }))
}

/// Drives one upgraded shell connection to completion.
async fn handle_shell_socket(
    websocket: WebSocket,
    connections: ConnectionRegistry,
    client: kube::Client,
    target: ExecTarget,
    command: Vec<String>,
    params: ShellQuery,
) {
    let socket = RelaySocket::from_websocket(websocket, connections);
    let backend = KubeExecBackend::new(client);

    if params.once {
        run_one_shot(&backend, &target, &command, params.tty, &socket).await;
    } else {
        let settings = StreamSettings {
            stdin: params.stdin,
            stdout: params.stdout,
            stderr: params.stderr,
            tty: params.tty,
        };
        let adapter = TerminalAdapter::new(Arc::clone(&socket));
        if let Err(e) = exec::run_interactive(&backend, &target, &command, settings, &adapter).await
        {
            // Best effort; the client may already be gone.
            let _ = socket
                .write(RelayMessage::text(e.to_string().into_bytes()))
                .await;
        }
    }

    socket.close();
    socket.join().await;
    info!(session_id = %socket.id(), pod = %target.pod, "shell session finished");
}

/// Runs a one-shot command and reports the result to the client as one
/// JSON text frame, `{"output": ...}` on success or `{"error": ...}`.
async fn run_one_shot(
    backend: &KubeExecBackend,
    target: &ExecTarget,
    command: &[String],
    tty: bool,
    socket: &Arc<RelaySocket>,
) {
    let body = match exec::run_once(backend, target, command, tty).await {
        Ok(output) => {
            serde_json::json!({ "output": String::from_utf8_lossy(&output) })
        }
        Err(e) => {
            warn!(pod = %target.pod, error = %e, "one-shot exec failed");
            serde_json::json!({ "error": e.to_string() })
        }
    };
    let _ = socket
        .write(RelayMessage::text(body.to_string().into_bytes()))
        .await;
}

#[cfg(test)]
mod tests {
    use axum::extract::Query;
    use axum::http::Uri;

    use super::*;

    fn parse(uri: &str) -> ShellQuery {
        let uri: Uri = uri.parse().unwrap();
        Query::<ShellQuery>::try_from_uri(&uri).unwrap().0
    }

    #[test]
    fn test_shell_query_defaults() {
        let q = parse("http://host/shell");
        assert!(q.stdin && q.stdout && q.stderr && q.tty);
        assert!(!q.once);
        assert!(q.command.is_empty());
        assert!(q.container.is_none());
    }

    #[test]
    fn test_shell_query_one_shot_with_command() {
        let q = parse("http://host/shell?once=true&command=ls%20-l&container=app&tty=false");
        assert!(q.once);
        assert!(!q.tty);
        assert_eq!(q.command, "ls -l");
        assert_eq!(q.container.as_deref(), Some("app"));
        assert_eq!(exec::tokenize_command(&q.command), vec!["ls", "-l"]);
    }

    #[test]
    fn test_shell_query_rejects_bad_flag() {
        let uri: Uri = "http://host/shell?once=sometimes".parse().unwrap();
        assert!(Query::<ShellQuery>::try_from_uri(&uri).is_err());
    }
}
