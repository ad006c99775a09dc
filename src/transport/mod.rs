//! Transport collaborator contract.
//!
//! # Data Flow
//! ```text
//! BackendService (service.rs)
//!     → Transport::connect (once, shared by every request)
//!     → Session::begin(environment) per request
//!     → BackendRequest { stdin, stdout, stderr }
//! ```
//!
//! The FastCGI record framing, connection management and multiplexing live
//! behind these traits. The gateway only sees an environment going in and
//! three byte streams coming back.

pub mod service;

use std::fmt;
use std::future::Future;
use std::io;

use axum::body::Bytes;
use futures_util::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::config::BackendConfig;
use crate::http::request::Environment;

pub use service::{BackendService, ServiceState};

/// A failure reported by the transport.
///
/// Cloneable because one connection outcome is handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// A readable backend channel (standard output or standard error).
pub type OutputStream = BoxStream<'static, io::Result<Bytes>>;

/// Handle to one in-flight backend request.
pub struct BackendRequest {
    /// Backend standard input. Shut down once the request body is exhausted.
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    /// Backend standard output: header block, blank line, body.
    pub stdout: OutputStream,
    /// Backend standard error.
    pub stderr: OutputStream,
}

impl BackendRequest {
    pub fn new(
        stdin: impl AsyncWrite + Send + Unpin + 'static,
        stdout: OutputStream,
        stderr: OutputStream,
    ) -> Self {
        Self {
            stdin: Box::new(stdin),
            stdout,
            stderr,
        }
    }
}

impl fmt::Debug for BackendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRequest").finish_non_exhaustive()
    }
}

/// Establishes the shared backend session.
///
/// Called at most once per [`BackendService`]; the outcome is shared by every
/// request and never retried by the gateway.
pub trait Transport: Send + Sync + 'static {
    type Session: Session;

    fn connect(
        &self,
        backend: &BackendConfig,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// A ready backend session that accepts requests.
///
/// Implementations multiplex or serialise concurrent `begin` calls
/// themselves; the gateway does not lock around them.
pub trait Session: Send + Sync + 'static {
    fn begin(
        &self,
        environment: Environment,
    ) -> impl Future<Output = Result<BackendRequest, TransportError>> + Send;
}
