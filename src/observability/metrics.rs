//! Metrics collection and exposition.
//!
//! # Metrics
//! - `fcgi_gateway_requests_total` (counter): settled requests by method, status, outcome
//! - `fcgi_gateway_request_duration_seconds` (histogram): time until the request settled
//! - `fcgi_gateway_failures_total` (counter): failures by kind and whether headers were sent
//! - `fcgi_gateway_body_bytes_total` (counter): response body bytes handed to clients
//! - `fcgi_gateway_rejected_total` (counter): requests refused before reaching the backend
//! - `fcgi_gateway_backend_state` (gauge): 0=uninitialized 1=initializing 2=ready 3=failed
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::gateway::ExchangeOutcome;
use crate::transport::ServiceState;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record a settled request.
pub fn record_outcome(method: &str, outcome: &ExchangeOutcome, start_time: Instant) {
    let status = outcome.status.as_u16().to_string();
    let result = if outcome.is_success() { "success" } else { "failure" };

    counter!(
        "fcgi_gateway_requests_total",
        "method" => method.to_string(),
        "status" => status,
        "outcome" => result
    )
    .increment(1);
    histogram!("fcgi_gateway_request_duration_seconds").record(start_time.elapsed().as_secs_f64());
    counter!("fcgi_gateway_body_bytes_total").increment(outcome.body_bytes);

    if let Some(error) = outcome.error() {
        let headers_sent = if outcome.headers_sent { "true" } else { "false" };
        counter!(
            "fcgi_gateway_failures_total",
            "kind" => error.kind(),
            "headers_sent" => headers_sent
        )
        .increment(1);
    }
}

/// Record a request refused before it reached the backend.
pub fn record_rejected(kind: &'static str) {
    counter!("fcgi_gateway_rejected_total", "kind" => kind).increment(1);
}

/// Record a backend session state transition.
pub fn record_backend_state(state: ServiceState) {
    gauge!("fcgi_gateway_backend_state").set(state as u8 as f64);
}
