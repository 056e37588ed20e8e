//! Observability
//!
//! Structured logging setup and span macros. Session health lives in
//! [`crate::session::HealthMetrics`]; status events in
//! [`crate::session::StatusEvent`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::{dispatch_span, session_span};
