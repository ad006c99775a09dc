//! HTTP-to-FastCGI gateway library.
//!
//! Turns each HTTP request into a CGI/1.1 environment plus a stdin stream,
//! runs it through a [`Transport`] session, and turns the backend's stdout
//! back into an HTTP response. The FastCGI wire protocol itself lives behind
//! the [`Transport`] and [`Session`] traits.

pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod transport;

pub use config::{load_config, parse_config, ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use gateway::{Completion, Dispatch, ExchangeOutcome, Gateway};
pub use http::{ConnectionMeta, Environment, GatewayServer, RequestTranslator};
pub use lifecycle::Shutdown;
pub use routing::Rewriter;
pub use transport::{
    BackendRequest, BackendService, OutputStream, ServiceState, Session, Transport, TransportError,
};
