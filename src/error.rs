//! Error types for the MQTT session layer
//!
//! `LinkError` is what every runtime operation returns and what rides on
//! status events, so it is `Clone` and carries rendered messages rather than
//! boxed sources.

use crate::protocol::TopicError;
use crate::session::SessionState;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Runtime error for connection, subscription and dispatch operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Subscription to '{filter}' failed: {reason}")]
    Subscription { filter: String, reason: String },

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Handler failed: {0}")]
    Handler(String),
}

/// Coarse classification used for retry decisions and status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Auth,
    Protocol,
    Subscription,
    NotConnected,
    InvalidState,
    InvalidTopic,
    Handler,
}

impl LinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LinkError::Network(_) => ErrorKind::Network,
            LinkError::Auth(_) => ErrorKind::Auth,
            LinkError::Protocol(_) => ErrorKind::Protocol,
            LinkError::Subscription { .. } => ErrorKind::Subscription,
            LinkError::NotConnected { .. } => ErrorKind::NotConnected,
            LinkError::InvalidState(_) => ErrorKind::InvalidState,
            LinkError::InvalidTopic(_) => ErrorKind::InvalidTopic,
            LinkError::Handler(_) => ErrorKind::Handler,
        }
    }

    /// Whether another connection attempt can succeed without new credentials
    pub fn is_retriable(&self) -> bool {
        matches!(self, LinkError::Network(_))
    }

    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network(message.into())
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth(message.into())
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    pub fn handler<S: Into<String>>(message: S) -> Self {
        Self::Handler(message.into())
    }

    pub fn subscription<F: Into<String>, R: Into<String>>(filter: F, reason: R) -> Self {
        Self::Subscription {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Rendered message with credentials and secret paths masked
    pub fn redacted(&self) -> String {
        redact(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").expect("valid regex")
});

static SECRET_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("valid regex")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Mask credential-looking values and secret file paths, then cap the length
pub fn redact(message: &str) -> String {
    let masked = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = SECRET_PATH_PATTERN
        .replace_all(&masked, "/***REDACTED***/")
        .into_owned();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for session operations
pub type LinkResult<T> = Result<T, LinkError>;
