//! Backend response decoding.
//!
//! FastCGI responders emit CGI-style output: a header block, a blank line,
//! then the body. There is no status line; the status arrives as a `Status`
//! pseudo-header.
//!
//! # States
//! ```text
//! AwaitingHeaders ──header block complete──▶ StreamingBody ──finish()──▶ Done
//!        │                                                        ▲
//!        └──────────────── finish() / parse error ────────────────┘
//! ```
//!
//! Header bytes may arrive split over any number of chunks. Body bytes are
//! handed back as slices of the incoming chunks, never buffered.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use httparse::{Status, EMPTY_HEADER};

use crate::error::GatewayError;

/// Maximum number of header pairs in one backend response.
pub const MAX_HEADERS: usize = 128;

const STATUS_PSEUDO_HEADER: &str = "Status";

/// Status and headers decoded from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Attach a body and turn the head into a response.
    pub fn into_response(self, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Notifications produced while feeding the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// The header block is complete; status and headers are final.
    HeadersComplete(ResponseHead),
    /// A run of body bytes, in arrival order.
    Body(Bytes),
}

/// Observable decoder phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPhase {
    AwaitingHeaders,
    StreamingBody,
    Done,
}

#[derive(Debug)]
enum DecoderState {
    AwaitingHeaders(Vec<u8>),
    StreamingBody,
    Done,
}

/// Incremental decoder for backend standard output.
#[derive(Debug)]
pub struct ResponseDecoder {
    state: DecoderState,
    max_header_bytes: usize,
}

impl ResponseDecoder {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            state: DecoderState::AwaitingHeaders(Vec::new()),
            max_header_bytes,
        }
    }

    pub fn phase(&self) -> DecoderPhase {
        match self.state {
            DecoderState::AwaitingHeaders(_) => DecoderPhase::AwaitingHeaders,
            DecoderState::StreamingBody => DecoderPhase::StreamingBody,
            DecoderState::Done => DecoderPhase::Done,
        }
    }

    /// Feed one chunk of backend output.
    ///
    /// A chunk yields at most one `HeadersComplete` followed by at most one
    /// `Body`. Any error moves the decoder to `Done`.
    pub fn feed(&mut self, chunk: Bytes) -> Result<Vec<DecoderEvent>, GatewayError> {
        match std::mem::replace(&mut self.state, DecoderState::Done) {
            DecoderState::AwaitingHeaders(buf) => self.feed_headers(buf, chunk),
            DecoderState::StreamingBody => {
                self.state = DecoderState::StreamingBody;
                if chunk.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![DecoderEvent::Body(chunk)])
                }
            }
            DecoderState::Done => Err(GatewayError::ResponseParse(
                "output received after the decoder finished".into(),
            )),
        }
    }

    /// Signal end of output and release parser state.
    pub fn finish(&mut self) -> Result<(), GatewayError> {
        match std::mem::replace(&mut self.state, DecoderState::Done) {
            DecoderState::AwaitingHeaders(buf) if buf.is_empty() => Err(GatewayError::ResponseParse(
                "backend closed its output without sending headers".into(),
            )),
            DecoderState::AwaitingHeaders(_) => Err(GatewayError::ResponseParse(
                "backend closed its output inside the header block".into(),
            )),
            DecoderState::StreamingBody | DecoderState::Done => Ok(()),
        }
    }

    fn feed_headers(&mut self, mut buf: Vec<u8>, chunk: Bytes) -> Result<Vec<DecoderEvent>, GatewayError> {
        let buffered = buf.len();
        buf.extend_from_slice(&chunk);

        let mut raw = [EMPTY_HEADER; MAX_HEADERS];
        let (consumed, head) = match httparse::parse_headers(&buf, &mut raw) {
            Ok(Status::Complete((consumed, pairs))) => (consumed, build_head(pairs)?),
            Ok(Status::Partial) => {
                if buf.len() > self.max_header_bytes {
                    return Err(self.oversized());
                }
                self.state = DecoderState::AwaitingHeaders(buf);
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(GatewayError::ResponseParse(format!("invalid header block: {e}")));
            }
        };

        if consumed > self.max_header_bytes {
            return Err(self.oversized());
        }

        // Body bytes that shared a chunk with the end of the header block.
        let rest = if consumed >= buffered {
            chunk.slice(consumed - buffered..)
        } else {
            Bytes::copy_from_slice(&buf[consumed..])
        };

        self.state = DecoderState::StreamingBody;

        let mut events = vec![DecoderEvent::HeadersComplete(head)];
        if !rest.is_empty() {
            events.push(DecoderEvent::Body(rest));
        }
        Ok(events)
    }

    fn oversized(&self) -> GatewayError {
        GatewayError::ResponseParse(format!(
            "header block exceeds {} bytes",
            self.max_header_bytes
        ))
    }
}

/// Apply header pairs in arrival order.
///
/// `Status` sets the code and is dropped; repeated names accumulate.
fn build_head(pairs: &[httparse::Header<'_>]) -> Result<ResponseHead, GatewayError> {
    let mut status = StatusCode::OK;
    let mut headers = HeaderMap::new();

    for pair in pairs {
        if pair.name == STATUS_PSEUDO_HEADER {
            status = parse_status(pair.value);
            continue;
        }

        let name = HeaderName::from_bytes(pair.name.as_bytes())
            .map_err(|e| GatewayError::ResponseParse(format!("header name {:?}: {e}", pair.name)))?;
        let value = HeaderValue::from_bytes(pair.value)
            .map_err(|e| GatewayError::ResponseParse(format!("header {:?}: {e}", pair.name)))?;
        headers.append(name, value);
    }

    Ok(ResponseHead { status, headers })
}

/// Leading integer token of a `Status` value, or 200.
fn parse_status(value: &[u8]) -> StatusCode {
    std::str::from_utf8(value)
        .ok()
        .and_then(|v| v.split_whitespace().next())
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK)
}
