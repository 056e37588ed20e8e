//! Reconnect backoff policy
//!
//! Delays grow exponentially from `base_delay_ms`, are capped at
//! `max_delay_ms`, and get a symmetric jitter of `±jitter` applied. The
//! escalation resets only after a session stayed up for `stable_after_secs`,
//! so a broker that accepts and immediately drops connections still backs off.

use crate::error::LinkError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1)`; 0.2 means ±20%
    pub jitter: f64,
    pub stable_after_secs: u64,
    /// Give up after this many consecutive failed attempts; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Retry after the broker rejects the credentials
    pub retry_on_auth_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter: 0.2,
            stable_after_secs: 30,
            max_attempts: None,
            retry_on_auth_failure: false,
        }
    }
}

/// What the retry loop should do next
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Proceed { attempt: u32, delay: Duration },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded { attempts: u32 },
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }

    /// Un-jittered delay for escalation step `step` (0-based): `base · 2^step`, capped
    pub fn backoff(&self, step: u32) -> Duration {
        let factor = 1u64.checked_shl(step).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }

    /// Jittered delay for escalation step `step`
    pub fn next_delay(&self, step: u32) -> Duration {
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.next_delay_with(step, unit)
    }

    /// Jittered delay with an explicit jitter sample in `[-1, 1]`
    pub fn next_delay_with(&self, step: u32, unit: f64) -> Duration {
        let base = self.backoff(step).as_millis() as f64;
        let factor = 1.0 + self.jitter * unit.clamp(-1.0, 1.0);
        Duration::from_millis((base * factor).round().max(0.0) as u64)
    }

    /// Lowest and highest delay `next_delay(step)` can produce
    pub fn jitter_bounds(&self, step: u32) -> (Duration, Duration) {
        (
            self.next_delay_with(step, -1.0),
            self.next_delay_with(step, 1.0),
        )
    }

    /// A session that stayed up this long resets the escalation
    pub fn should_reset(&self, connected_for: Duration) -> bool {
        connected_for >= self.stable_after()
    }

    /// Whether a failed attempt with this error is worth retrying
    pub fn retries(&self, error: &LinkError) -> bool {
        match error {
            LinkError::Auth(_) => self.retry_on_auth_failure,
            other => other.is_retriable(),
        }
    }

    /// Decide whether to make another attempt after `failures` consecutive failures
    pub fn decide(&self, failures: u32, step: u32, shutdown_requested: bool) -> RetryDecision {
        if shutdown_requested {
            return RetryDecision::AbortShutdownRequested;
        }

        if let Some(max) = self.max_attempts {
            if failures >= max {
                return RetryDecision::AbortMaxAttemptsExceeded { attempts: failures };
            }
        }

        RetryDecision::Proceed {
            attempt: failures + 1,
            delay: self.next_delay(step),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("retry.base_delay_ms must be greater than zero".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(format!(
                "retry.max_delay_ms ({}) must not be below retry.base_delay_ms ({})",
                self.max_delay_ms, self.base_delay_ms
            ));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(format!(
                "retry.jitter must be in [0, 1), got {}",
                self.jitter
            ));
        }
        if self.max_attempts == Some(0) {
            return Err("retry.max_attempts must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

/// Per-session-run retry bookkeeping
///
/// `failures` counts consecutive failed attempts and is cleared by any
/// successful connect; `step` drives the delay and is only cleared once a
/// session proved stable.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    failures: u32,
    step: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            step: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn on_connected(&mut self) {
        self.failures = 0;
    }

    pub fn on_session_ended(&mut self, connected_for: Duration) {
        if self.policy.should_reset(connected_for) {
            self.step = 0;
        }
    }

    /// Decide on the next attempt and account for it
    pub fn next(&mut self, shutdown_requested: bool) -> RetryDecision {
        let decision = self
            .policy
            .decide(self.failures, self.step, shutdown_requested);
        if let RetryDecision::Proceed { .. } = decision {
            self.failures += 1;
            self.step = self.step.saturating_add(1);
        }
        decision
    }
}
