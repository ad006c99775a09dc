//! Gateway subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → http::request (rewrite, query split, script, CGI environment)
//!     → transport::service (shared session, connect once)
//!     → exchange.rs (stdin pump, stdout decoder, stderr collector)
//!     → Dispatch { response, completion }
//! ```
//!
//! `dispatch` returns as soon as the response head is known: either the
//! backend's decoded head (body still streaming) or a bare 500. The
//! `Completion` settles later with the logical outcome, which can still be a
//! failure after a complete-looking response went out.

mod exchange;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::oneshot;

use crate::config::{validate_config, ConfigError, GatewayConfig};
use crate::error::GatewayError;
use crate::http::request::{ConnectionMeta, RequestTranslator};
use crate::http::X_REQUEST_ID;
use crate::transport::{BackendService, Transport, TransportError};
use exchange::Exchange;

/// How a request ended, as seen by the gateway and by the client.
#[derive(Debug)]
pub struct ExchangeOutcome {
    /// Status the client received.
    pub status: StatusCode,
    /// Whether the backend's response head had already gone to the client
    /// when the request settled.
    pub headers_sent: bool,
    /// Body bytes handed to the client.
    pub body_bytes: u64,
    /// Logical result. Can be an error even when the client saw a full 200.
    pub result: Result<(), GatewayError>,
}

impl ExchangeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&GatewayError> {
        self.result.as_ref().err()
    }
}

/// Resolves once the request has settled.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<ExchangeOutcome>,
}

impl Completion {
    /// Wait for the final outcome.
    pub async fn outcome(self) -> ExchangeOutcome {
        self.rx.await.unwrap_or_else(|_| ExchangeOutcome {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            headers_sent: false,
            body_bytes: 0,
            result: Err(GatewayError::TransportRequest(TransportError::new(
                "exchange ended without settling",
            ))),
        })
    }
}

/// A dispatched request: the response to send and its pending outcome.
#[derive(Debug)]
pub struct Dispatch {
    pub response: Response,
    pub completion: Completion,
}

/// HTTP-to-FastCGI gateway over a transport.
pub struct Gateway<T: Transport> {
    config: Arc<GatewayConfig>,
    translator: RequestTranslator,
    service: Arc<BackendService<T>>,
}

impl<T: Transport> Gateway<T> {
    /// Validate the configuration and build the gateway.
    ///
    /// Does not connect; the backend session is created on first use or by
    /// [`BackendService::warm_up`].
    pub fn new(config: GatewayConfig, transport: T) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Invalid)?;
        let translator = RequestTranslator::from_config(&config)?;
        let service = Arc::new(BackendService::new(transport, config.backend.clone()));

        Ok(Self {
            config: Arc::new(config),
            translator,
            service,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn translator(&self) -> &RequestTranslator {
        &self.translator
    }

    pub fn service(&self) -> &Arc<BackendService<T>> {
        &self.service
    }

    /// Forward a request to the backend.
    ///
    /// Fails only for an invalid request target, before the transport is
    /// touched. Every other failure is reported through the returned
    /// response (500 when possible) and the completion.
    pub async fn dispatch(
        &self,
        request: Request<Body>,
        conn: ConnectionMeta,
    ) -> Result<Dispatch, GatewayError> {
        let environment = self.translator.translate_request(&request, &conn)?;

        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (_, body) = request.into_parts();
        let (head_tx, head_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let exchange = Exchange::new(request_id, self.config.limits.max_header_bytes, head_tx);
        let service = self.service.clone();
        tokio::spawn(async move {
            let outcome = exchange.run(&service, environment, body).await;
            let _ = done_tx.send(outcome);
        });

        let response = head_rx
            .await
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());

        Ok(Dispatch {
            response,
            completion: Completion { rx: done_rx },
        })
    }
}
