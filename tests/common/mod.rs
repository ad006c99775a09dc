//! Shared utilities for gateway integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use fcgi_gateway::config::{BackendConfig, GatewayConfig};
use fcgi_gateway::http::Environment;
use fcgi_gateway::transport::{BackendRequest, OutputStream, Session, Transport, TransportError};
use futures_util::{stream, StreamExt};
use tokio::io::AsyncReadExt;

/// One item a scripted backend channel yields.
#[derive(Debug, Clone)]
pub enum Chunk {
    Data(&'static str),
    Fail(&'static str),
}

/// What the mock backend does for every request.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub stdout: Vec<Chunk>,
    pub stderr: Vec<Chunk>,
    /// Answer with a text/plain response whose body is the request body.
    pub echo_stdin: bool,
    pub fail_connect: Option<&'static str>,
    pub fail_begin: Option<&'static str>,
}

impl Script {
    pub fn stdout<const N: usize>(chunks: [&'static str; N]) -> Self {
        Self {
            stdout: chunks.into_iter().map(Chunk::Data).collect(),
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, text: &'static str) -> Self {
        self.stderr.push(Chunk::Data(text));
        self
    }

    pub fn echo() -> Self {
        Self {
            echo_stdin: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct MockState {
    script: Script,
    connects: AtomicUsize,
    begins: AtomicUsize,
    environments: Mutex<Vec<Environment>>,
}

/// In-process transport that plays back a [`Script`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new(script: Script) -> Self {
        Self {
            state: Arc::new(MockState {
                script,
                ..MockState::default()
            }),
        }
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.state.begins.load(Ordering::SeqCst)
    }

    pub fn environments(&self) -> Vec<Environment> {
        self.state.environments.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    type Session = MockSession;

    fn connect(
        &self,
        _backend: &BackendConfig,
    ) -> impl Future<Output = Result<MockSession, TransportError>> + Send {
        let state = self.state.clone();
        async move {
            state.connects.fetch_add(1, Ordering::SeqCst);
            match state.script.fail_connect {
                Some(message) => Err(TransportError::new(message)),
                None => Ok(MockSession { state }),
            }
        }
    }
}

pub struct MockSession {
    state: Arc<MockState>,
}

impl Session for MockSession {
    fn begin(
        &self,
        environment: Environment,
    ) -> impl Future<Output = Result<BackendRequest, TransportError>> + Send {
        let state = self.state.clone();
        async move {
            state.begins.fetch_add(1, Ordering::SeqCst);
            state.environments.lock().unwrap().push(environment);

            if let Some(message) = state.script.fail_begin {
                return Err(TransportError::new(message));
            }

            let (stdin, mut reader) = tokio::io::duplex(64);
            let stdout = if state.script.echo_stdin {
                stream::once(async move {
                    let mut body = Vec::new();
                    reader.read_to_end(&mut body).await?;
                    let mut out = b"Content-Type: text/plain\r\n\r\n".to_vec();
                    out.extend_from_slice(&body);
                    Ok::<_, io::Error>(Bytes::from(out))
                })
                .boxed()
            } else {
                playback(&state.script.stdout)
            };

            Ok(BackendRequest::new(stdin, stdout, playback(&state.script.stderr)))
        }
    }
}

fn playback(chunks: &[Chunk]) -> OutputStream {
    let items: Vec<io::Result<Bytes>> = chunks
        .iter()
        .map(|chunk| match chunk {
            Chunk::Data(text) => Ok(Bytes::from_static(text.as_bytes())),
            Chunk::Fail(message) => Err(io::Error::new(io::ErrorKind::ConnectionReset, *message)),
        })
        .collect();
    stream::iter(items).boxed()
}

/// Config rooted at `/srv/www` with default limits.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        document_root: "/srv/www".to_string(),
        server_name: Some("gateway.test".to_string()),
        ..GatewayConfig::default()
    }
}
