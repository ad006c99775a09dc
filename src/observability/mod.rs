//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway and server produce:
//!     → logging.rs (structured log events, request ID on every line)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (when enabled)
//! ```

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
