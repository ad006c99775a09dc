//! Per-request exchange with the backend.
//!
//! # Responsibilities
//! - Wait for the shared backend session and start one backend request
//! - Pipe the request body into backend stdin
//! - Decode backend stdout into the client response, streaming the body
//! - Collect backend stderr for the whole request
//! - Settle exactly once: success or failure
//!
//! # Failure handling
//! ```text
//! before headers sent → 500, empty body
//! after headers sent  → body stream ends early (client sees truncation)
//! stderr non-empty    → failure, whatever the client already received
//! request body broken  → failure; the backend saw a truncated stdin
//! ```

use std::convert::Infallible;
use std::io;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::GatewayError;
use crate::gateway::ExchangeOutcome;
use crate::http::request::Environment;
use crate::http::response::{DecoderEvent, ResponseDecoder, ResponseHead};
use crate::transport::{BackendRequest, BackendService, OutputStream, Session, Transport, TransportError};

/// Body chunks buffered between the backend reader and the client.
const BODY_CHANNEL_CAPACITY: usize = 16;

/// The client-facing side of one request.
pub(crate) struct Exchange {
    request_id: String,
    max_header_bytes: usize,
    head_tx: Option<oneshot::Sender<Response>>,
    body_tx: Option<mpsc::Sender<Bytes>>,
    headers_sent: bool,
    status: Option<StatusCode>,
    body_bytes: u64,
}

/// Why the request body did not fully reach backend stdin.
enum StdinError {
    /// Reading the client's body failed.
    Body(axum::Error),
    /// The backend stopped accepting stdin.
    Backend(io::Error),
}

impl Exchange {
    pub(crate) fn new(
        request_id: String,
        max_header_bytes: usize,
        head_tx: oneshot::Sender<Response>,
    ) -> Self {
        Self {
            request_id,
            max_header_bytes,
            head_tx: Some(head_tx),
            body_tx: None,
            headers_sent: false,
            status: None,
            body_bytes: 0,
        }
    }

    /// Drive the request to completion and settle it.
    pub(crate) async fn run<T: Transport>(
        mut self,
        service: &BackendService<T>,
        environment: Environment,
        body: Body,
    ) -> ExchangeOutcome {
        let result = self.exchange(service, environment, body).await;
        self.settle(result)
    }

    async fn exchange<T: Transport>(
        &mut self,
        service: &BackendService<T>,
        environment: Environment,
        body: Body,
    ) -> Result<(), GatewayError> {
        let session = service.ready().await.map_err(GatewayError::TransportInit)?;
        let BackendRequest { stdin, stdout, stderr } = session
            .begin(environment)
            .await
            .map_err(GatewayError::TransportRequest)?;

        tracing::debug!(request_id = %self.request_id, "Backend request started");

        let pump = tokio::spawn(pipe_body(body, stdin));

        let (output, diagnostics) = tokio::join!(self.stream_output(stdout), collect_stderr(stderr));

        // A pump that already finished keeps its result through abort.
        pump.abort();
        let body_error = match pump.await {
            Ok(Err(StdinError::Body(e))) => Some(e),
            Ok(Err(StdinError::Backend(e))) => {
                // Backends may stop reading stdin before the body ends.
                tracing::debug!(request_id = %self.request_id, error = %e, "Request body not fully delivered");
                None
            }
            Ok(Ok(())) | Err(_) => None,
        };

        let stderr_error = match diagnostics {
            Ok(text) if !text.is_empty() => return Err(GatewayError::BackendStderr(text)),
            Ok(_) => None,
            Err(e) => Some(e),
        };
        output?;

        if let Some(e) = body_error {
            return Err(GatewayError::TransportRequest(TransportError::new(format!(
                "request body failed: {e}"
            ))));
        }
        match stderr_error {
            Some(e) => Err(GatewayError::TransportRequest(e.into())),
            None => Ok(()),
        }
    }

    async fn stream_output(&mut self, mut stdout: OutputStream) -> Result<(), GatewayError> {
        let mut decoder = ResponseDecoder::new(self.max_header_bytes);

        while let Some(chunk) = stdout.next().await {
            let chunk = chunk.map_err(|e| GatewayError::TransportRequest(TransportError::from(e)))?;
            for event in decoder.feed(chunk)? {
                match event {
                    DecoderEvent::HeadersComplete(head) => self.send_head(head),
                    DecoderEvent::Body(bytes) => self.send_body(bytes).await,
                }
            }
        }

        decoder.finish()
    }

    fn send_head(&mut self, head: ResponseHead) {
        let Some(head_tx) = self.head_tx.take() else {
            return;
        };

        let (body_tx, mut body_rx) = mpsc::channel::<Bytes>(BODY_CHANNEL_CAPACITY);
        let body = Body::from_stream(stream::poll_fn(move |cx| {
            body_rx.poll_recv(cx).map(|chunk| chunk.map(Ok::<_, Infallible>))
        }));

        let status = head.status;
        if head_tx.send(head.into_response(body)).is_ok() {
            self.headers_sent = true;
            self.status = Some(status);
            self.body_tx = Some(body_tx);
        } else {
            tracing::debug!(request_id = %self.request_id, "Client went away before headers were sent");
        }
    }

    async fn send_body(&mut self, bytes: Bytes) {
        let Some(body_tx) = &self.body_tx else {
            return;
        };

        let len = bytes.len() as u64;
        if body_tx.send(bytes).await.is_ok() {
            self.body_bytes += len;
        } else {
            // Keep draining the backend so stderr is still collected.
            tracing::debug!(request_id = %self.request_id, "Client disconnected during body");
            self.body_tx = None;
        }
    }

    /// Settle the request: answer 500 if nothing was sent, end the body stream.
    fn settle(mut self, result: Result<(), GatewayError>) -> ExchangeOutcome {
        let headers_sent = self.headers_sent;

        if result.is_err() {
            if let Some(head_tx) = self.head_tx.take() {
                let _ = head_tx.send(StatusCode::INTERNAL_SERVER_ERROR.into_response());
                self.status = Some(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
        self.body_tx = None;

        ExchangeOutcome {
            status: self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers_sent,
            body_bytes: self.body_bytes,
            result,
        }
    }
}

/// Copy the request body into backend stdin, then close stdin.
async fn pipe_body(
    body: Body,
    mut stdin: Box<dyn AsyncWrite + Send + Unpin>,
) -> Result<(), StdinError> {
    let mut data = body.into_data_stream();
    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(StdinError::Body)?;
        stdin.write_all(&chunk).await.map_err(StdinError::Backend)?;
    }
    stdin.shutdown().await.map_err(StdinError::Backend)
}

/// Accumulate backend stderr as text.
async fn collect_stderr(mut stderr: OutputStream) -> io::Result<String> {
    let mut text = String::new();
    while let Some(chunk) = stderr.next().await {
        text.push_str(&String::from_utf8_lossy(&chunk?));
    }
    Ok(text)
}
