//! Gateway error taxonomy.
//!
//! Every variant is recoverable per request: bridges turn them into a response
//! (or a WebSocket close) instead of tearing down the server.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors produced while serving one CGI invocation.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The resolved script path does not exist.
    #[error("No such CGI script {0}")]
    ScriptNotFound(String),

    /// The resolved script path exists but is not a regular file.
    #[error("CGI script is not a plain file {0}")]
    NotRegularFile(String),

    /// The executable could not be started.
    #[error("failed to spawn {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Script output is not a status line, header block and body.
    #[error("invalid cgi response: {0}")]
    MalformedResponse(String),

    /// The process exceeded its time budget and was terminated.
    #[error("CGI script timed out after {0:?}")]
    Timeout(Duration),

    /// Pipe or client IO failed mid-invocation.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The admission gate was shut down.
    #[error("admission controller closed")]
    AdmissionClosed,

    /// The request body exceeded the configured limit.
    #[error("request body too large")]
    BodyTooLarge,

    /// The request body could not be read from the client.
    #[error("failed to read request body: {0}")]
    BodyRead(String),
}

impl GatewayError {
    /// HTTP status used when this error is answered on the buffered path.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ScriptNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NotRegularFile(_) => StatusCode::FORBIDDEN,
            GatewayError::Spawn { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::AdmissionClosed => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::BodyRead(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            // These two carry a client-facing message.
            GatewayError::ScriptNotFound(_) | GatewayError::NotRegularFile(_) => {
                (status, self.to_string()).into_response()
            }
            GatewayError::Timeout(_) | GatewayError::BodyTooLarge | GatewayError::BodyRead(_) => {
                status.into_response()
            }
            other => {
                tracing::error!(error = %other, "CGI invocation failed");
                (status, status.canonical_reason().unwrap_or("error")).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::ScriptNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GatewayError::NotRegularFile("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::Timeout(Duration::from_secs(1)).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::MalformedResponse("eof".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_not_found_message() {
        let err = GatewayError::ScriptNotFound("env.cgi".into());
        assert_eq!(err.to_string(), "No such CGI script env.cgi");
    }
}
