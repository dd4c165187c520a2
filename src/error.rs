//! Error types for the console API

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type for console API operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for console API operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The relay could not be established; fatal to the request before any
    /// streaming begins
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Operation attempted on a relay socket that is already closed.
    /// Callers must stop, not retry.
    #[error("relay socket closed")]
    Closed,

    /// Malformed control frame; fatal to the session since input semantics
    /// are ambiguous from that point on
    #[error("malformed control frame: {0}")]
    Decode(String),

    /// Cluster not found in the registry
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// The cluster-side exec stream failed to start or errored mid-stream
    #[error("remote stream error: {0}")]
    RemoteStream(String),

    /// One-shot command wrote to its error stream (overrides transport
    /// success)
    #[error("command failed: {0}")]
    CapturedStderr(String),

    /// Kubernetes client error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::UpgradeFailed(_) | Error::Decode(_) => StatusCode::BAD_REQUEST,
            Error::Closed => StatusCode::GONE,
            Error::ClusterNotFound(_) => StatusCode::NOT_FOUND,
            Error::RemoteStream(_) => StatusCode::BAD_GATEWAY,
            Error::CapturedStderr(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Kube(_) | Error::Config(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Return K8s-style Status response
        let body = serde_json::json!({
            "kind": "Status",
            "apiVersion": "v1",
            "status": "Failure",
            "message": self.to_string(),
            "code": status.as_u16()
        });

        (status, axum::Json(body)).into_response()
    }
}
