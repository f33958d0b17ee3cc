//! Observability for chat sessions
//!
//! Structured logging through `tracing` and per-session counters. Log-only
//! failures (subscribe, publish, decode) are reported to both.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsSnapshot, SessionMetrics};

// Span macros for structured logging
pub use logging::{mqtt_span, session_span};
