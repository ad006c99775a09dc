//! Gateway error taxonomy.
//!
//! # Classes
//! - `InvalidRequest`: malformed request target, raised before any backend work
//! - `TransportInit`: the shared backend service could not be brought up
//! - `TransportRequest`: a single backend request could not be started or broke mid-flight
//! - `BackendStderr`: the backend wrote to its diagnostic stream
//! - `ResponseParse`: the backend produced a malformed header block

use crate::transport::TransportError;

/// Errors produced while serving a request through the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request target was empty or did not start with `/`.
    #[error("invalid request uri: {0:?}")]
    InvalidRequest(String),

    /// The backend service failed to initialise. Every waiter sees the same error.
    #[error("backend unavailable: {0}")]
    TransportInit(TransportError),

    /// A backend request failed to start or its streams failed.
    #[error("backend request failed: {0}")]
    TransportRequest(TransportError),

    /// The backend wrote diagnostics to its error stream.
    #[error("backend reported errors: {}", .0.trim_end())]
    BackendStderr(String),

    /// The backend header block could not be parsed.
    #[error("malformed backend response: {0}")]
    ResponseParse(String),
}

impl GatewayError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::TransportInit(_) => "transport_init",
            GatewayError::TransportRequest(_) => "transport_request",
            GatewayError::BackendStderr(_) => "backend_stderr",
            GatewayError::ResponseParse(_) => "response_parse",
        }
    }
}
