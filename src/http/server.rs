//! HTTP server integration.
//!
//! # Responsibilities
//! - Create an Axum Router that sends every method and path to the gateway
//! - Wire up middleware (request ID, tracing, body limit)
//! - Report each request's settled outcome (logs, metrics)
//! - Serve on a caller-provided listener until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::gateway::{Completion, Dispatch, Gateway};
use crate::http::request::ConnectionMeta;
use crate::http::X_REQUEST_ID;
use crate::lifecycle::shutdown;
use crate::observability::metrics;
use crate::transport::Transport;

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// HTTP front end for a gateway.
pub struct GatewayServer<T: Transport> {
    gateway: Arc<Gateway<T>>,
    router: Router,
}

impl<T: Transport> GatewayServer<T> {
    pub fn new(gateway: Gateway<T>) -> Self {
        let gateway = Arc::new(gateway);
        let router = Self::build_router(gateway.clone());
        Self { gateway, router }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(gateway: Arc<Gateway<T>>) -> Router {
        let max_body_size = gateway.config().limits.max_body_size;

        Router::new()
            .route("/", any(gateway_handler::<T>))
            .route("/{*path}", any(gateway_handler::<T>))
            .fallback(gateway_handler::<T>)
            .with_state(gateway)
            .layer(RequestBodyLimitLayer::new(max_body_size))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router, for mounting into a larger application or driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn gateway(&self) -> &Arc<Gateway<T>> {
        &self.gateway
    }

    /// Serve connections from `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.gateway.config();

        tracing::info!(
            address = %addr,
            backend = %config.backend.address,
            document_root = %config.document_root,
            "Gateway server starting"
        );

        if config.observability.metrics_enabled {
            match config.observability.metrics_address.parse() {
                Ok(metrics_addr) => {
                    if let Err(e) = metrics::init_metrics(metrics_addr) {
                        tracing::error!(error = %e, "Failed to start metrics exporter");
                    }
                }
                Err(_) => tracing::error!(
                    metrics_address = %config.observability.metrics_address,
                    "Failed to parse metrics address"
                ),
            }
        }

        if config.backend.connect_on_start {
            let service = self.gateway.service().clone();
            tokio::spawn(async move { service.warm_up().await });
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait_for(shutdown))
            .await?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}

/// Translate, dispatch, and hand back the response head.
async fn gateway_handler<T: Transport>(
    State(gateway): State<Arc<Gateway<T>>>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    let method = request.method().clone();
    let uri = request.uri().to_string();
    let conn = ConnectionMeta::from_request(&request, gateway.config());

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Dispatching request to backend"
    );

    match gateway.dispatch(request, conn).await {
        Ok(Dispatch { response, completion }) => {
            tokio::spawn(report(completion, request_id, method, uri, start_time));
            response
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, uri = %uri, error = %e, "Rejected request");
            metrics::record_rejected(e.kind());
            (StatusCode::BAD_REQUEST, "Invalid request target").into_response()
        }
    }
}

/// Log and record the settled outcome of a request.
async fn report(
    completion: Completion,
    request_id: String,
    method: Method,
    uri: String,
    start_time: Instant,
) {
    let outcome = completion.outcome().await;
    metrics::record_outcome(method.as_str(), &outcome, start_time);

    match &outcome.result {
        Ok(()) => tracing::debug!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = outcome.status.as_u16(),
            body_bytes = outcome.body_bytes,
            "Request completed"
        ),
        Err(e) if outcome.headers_sent => tracing::error!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            status = outcome.status.as_u16(),
            body_bytes = outcome.body_bytes,
            kind = e.kind(),
            error = %e,
            "Request failed after the response was sent"
        ),
        Err(e) => tracing::warn!(
            request_id = %request_id,
            method = %method,
            uri = %uri,
            kind = e.kind(),
            error = %e,
            "Request failed, answered 500"
        ),
    }
}
