//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events on stderr)
//!     → metrics.rs (counters, histograms)
//!     → access_log.rs (one span per request with client address and request ID)
//!
//! Consumers:
//!     → Log aggregation (stderr, plain or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems
//! - Metrics are cheap (atomic increments) and no-ops without a recorder

pub mod access_log;
pub mod logging;
pub mod metrics;
