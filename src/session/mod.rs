//! Broker session management
//!
//! - [`state`] - session states, allowed transitions, health snapshot
//! - [`retry`] - backoff policy and per-run retry bookkeeping
//! - [`status`] - status events and their reporter
//! - [`manager`] - the connection manager and its supervisor task

pub mod manager;
pub mod retry;
pub mod state;
pub mod status;

pub use manager::ConnectionManager;
pub use retry::{Backoff, RetryDecision, RetryPolicy};
pub use state::{log_state_transition, HealthMetrics, SessionState};
pub use status::{StatusEvent, StatusReporter};
