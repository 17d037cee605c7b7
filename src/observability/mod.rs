//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → console (always) and the configured log backend (file or none)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - The log backend is selected by configuration, never by compile-time features
//! - Metric calls are free when no recorder is installed

pub mod logging;
pub mod metrics;
