//! Shared backend service.
//!
//! # States
//! - Uninitialized: nothing attempted yet
//! - Initializing: the first caller is connecting; everyone else waits on it
//! - Ready: a session is available to all requests
//! - Failed: connecting failed; every waiter and later caller gets the same error
//!
//! # State Transitions
//! ```text
//! Uninitialized → Initializing: first ready() call (or warm_up())
//! Initializing → Ready | Failed: transport connect settles
//! ```
//!
//! There is no transition out of Failed. Reconnecting is the transport's job.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::BackendConfig;
use crate::observability::metrics;
use crate::transport::{Transport, TransportError};

/// Service lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Failed = 3,
}

impl From<u8> for ServiceState {
    fn from(val: u8) -> Self {
        match val {
            1 => ServiceState::Initializing,
            2 => ServiceState::Ready,
            3 => ServiceState::Failed,
            _ => ServiceState::Uninitialized,
        }
    }
}

/// Owns the transport and the single shared session built from it.
pub struct BackendService<T: Transport> {
    transport: T,
    backend: BackendConfig,
    session: OnceCell<Result<Arc<T::Session>, TransportError>>,
    state: AtomicU8,
}

impl<T: Transport> BackendService<T> {
    pub fn new(transport: T, backend: BackendConfig) -> Self {
        Self {
            transport,
            backend,
            session: OnceCell::new(),
            state: AtomicU8::new(ServiceState::Uninitialized as u8),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServiceState {
        self.state.load(Ordering::Acquire).into()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Wait for the shared session, connecting on first use.
    ///
    /// Concurrent callers await the same attempt and observe the same outcome.
    pub async fn ready(&self) -> Result<Arc<T::Session>, TransportError> {
        self.session.get_or_init(|| self.connect()).await.clone()
    }

    /// Start connecting ahead of the first request and log the outcome.
    pub async fn warm_up(&self) {
        if let Err(e) = self.ready().await {
            tracing::error!(backend = %self.backend.address, error = %e, "Backend warm-up failed");
        }
    }

    async fn connect(&self) -> Result<Arc<T::Session>, TransportError> {
        self.set_state(ServiceState::Initializing);
        tracing::info!(backend = %self.backend.address, "Connecting to FastCGI backend");

        match self.transport.connect(&self.backend).await {
            Ok(session) => {
                self.set_state(ServiceState::Ready);
                tracing::info!(backend = %self.backend.address, "FastCGI backend ready");
                Ok(Arc::new(session))
            }
            Err(e) => {
                self.set_state(ServiceState::Failed);
                tracing::error!(backend = %self.backend.address, error = %e, "FastCGI backend unavailable");
                Err(e)
            }
        }
    }

    fn set_state(&self, state: ServiceState) {
        self.state.store(state as u8, Ordering::Release);
        metrics::record_backend_state(state);
    }
}
