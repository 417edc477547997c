//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Gateway, bridges and process runner produce:
//!     → logging.rs (structured log events, request ID carried as a field)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log stream
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Metric calls are no-ops until a recorder is installed
//! - Script stderr is logged under its own target so it can be filtered

pub mod logging;
pub mod metrics;
