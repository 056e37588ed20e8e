//! Session state and health bookkeeping
//!
//! Pure functions only; the connection manager owns the actual state.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Connection state of the single broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session and no retry loop running
    Disconnected,
    /// First connection attempt in flight
    Connecting,
    /// Session acknowledged and all subscriptions replayed
    Connected,
    /// Session lost or initial attempt failed; retry attempt `attempt` pending or in flight
    Reconnecting { attempt: u32 },
}

impl SessionState {
    /// Publishing and live subscribing are only allowed while connected
    pub fn can_publish(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// True while a session exists or is being (re-)established
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }

    /// Transitions the state machine allows
    ///
    /// Disconnected → Connecting → {Connected | Disconnected};
    /// Connected → Reconnecting → {Connected | Reconnecting | Disconnected};
    /// Disconnected → Reconnecting when a failed first attempt is retried;
    /// any state → Disconnected on explicit disconnect.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Disconnected, Reconnecting { .. }) => true,
            (Connecting, Connected) => true,
            (Connected, Reconnecting { .. }) => true,
            (Reconnecting { .. }, Reconnecting { .. }) => true,
            (Reconnecting { .. }, Connected) => true,
            _ => false,
        }
    }
}

/// Log a state transition at a level matching its severity
pub fn log_state_transition(from: &SessionState, to: &SessionState) {
    match (from, to) {
        (SessionState::Connecting, SessionState::Connected) => {
            info!("MQTT session established");
        }
        (SessionState::Reconnecting { attempt }, SessionState::Connected) => {
            info!(attempt, "MQTT session re-established");
        }
        (SessionState::Connected, SessionState::Reconnecting { .. }) => {
            warn!("MQTT session lost");
        }
        (SessionState::Connected, SessionState::Disconnected) => {
            info!("MQTT session closed");
        }
        (SessionState::Reconnecting { attempt }, SessionState::Disconnected) => {
            error!(attempt, "MQTT session gave up reconnecting");
        }
        _ => {
            info!("MQTT session state: {:?} -> {:?}", from, to);
        }
    }
}

/// No inbound traffic for this long marks the session as unhealthy
pub const STALE_AFTER: Duration = Duration::from_secs(300);

/// Snapshot of session health
#[derive(Debug, Clone, PartialEq)]
pub struct HealthMetrics {
    /// Time since the current session was established
    pub uptime: Option<Duration>,
    /// Time since the last inbound message
    pub time_since_last_message: Option<Duration>,
    /// Number of successful reconnects
    pub reconnect_count: u32,
    pub is_healthy: bool,
}

impl HealthMetrics {
    pub fn calculate(
        connected_at: Option<Instant>,
        last_message_at: Option<Instant>,
        reconnect_count: u32,
    ) -> Self {
        let now = Instant::now();
        let uptime = connected_at.map(|t| now.duration_since(t));
        let time_since_last_message = last_message_at.map(|t| now.duration_since(t));

        Self {
            uptime,
            time_since_last_message,
            reconnect_count,
            is_healthy: determine_health_status(uptime, time_since_last_message),
        }
    }
}

fn determine_health_status(
    uptime: Option<Duration>,
    time_since_last_message: Option<Duration>,
) -> bool {
    match (uptime, time_since_last_message) {
        (Some(_), None) => true,
        (Some(_), Some(last)) => last < STALE_AFTER,
        _ => false,
    }
}
