//! HTTP front end of the gateway.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → server.rs (Axum setup, request ID, tracing, body limit)
//!     → request.rs (target validation, rewrite, CGI environment)
//!     → [gateway exchange with the backend]
//!     → response.rs (decode backend stdout into status, headers, body)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

pub use request::{ConnectionMeta, Environment, RequestContext, RequestTranslator};
pub use response::{DecoderEvent, DecoderPhase, ResponseDecoder, ResponseHead};
pub use server::{GatewayServer, MakeRequestUuid};
