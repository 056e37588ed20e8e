//! Configuration for the SwiftMail monitor
//!
//! The file is TOML. Credentials never live in the file itself: the `[broker]`
//! section names the environment variables holding them, and they are
//! resolved when a [`BrokerConfig`] is built.

use crate::protocol::{validate_topic_name, QoS, TopicFilter};
use crate::session::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use url::Url;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub mailbox: MailboxSection,
    /// Extra filters the monitor subscribes to and logs
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSection>,
}

/// Broker section as written in the file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL: mqtt:// or tcp:// for plain TCP, mqtts:// or ssl:// for TLS
    pub url: String,
    /// Client identifier (default: "SwiftMail-<unix millis>")
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_clean_session() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

/// Mailbox sensor feed settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MailboxSection {
    #[serde(default = "default_mailbox_topic")]
    pub topic: TopicFilter,
    #[serde(default)]
    pub qos: QoS,
    /// Door counts as open above this light level
    #[serde(default = "default_lux_threshold")]
    pub lux_open_threshold: f64,
    /// Mail counts as present above this proximity reading
    #[serde(default = "default_proximity_threshold")]
    pub proximity_mail_threshold: i64,
    /// Where mailbox events are published as JSON (not published when absent)
    pub events_topic: Option<String>,
}

fn default_mailbox_topic() -> TopicFilter {
    TopicFilter::new("swiftmail/sensors").expect("static filter is valid")
}

fn default_lux_threshold() -> f64 {
    18.0
}

fn default_proximity_threshold() -> i64 {
    8000
}

impl Default for MailboxSection {
    fn default() -> Self {
        Self {
            topic: default_mailbox_topic(),
            qos: QoS::AtMostOnce,
            lux_open_threshold: default_lux_threshold(),
            proximity_mail_threshold: default_proximity_threshold(),
            events_topic: None,
        }
    }
}

/// Additional subscription entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSection {
    pub filter: TopicFilter,
    #[serde(default)]
    pub qos: QoS,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate()?;
        self.retry
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        if let Some(events_topic) = &self.mailbox.events_topic {
            validate_topic_name(events_topic).map_err(|e| {
                ConfigError::InvalidConfig(format!("mailbox.events_topic: {e}"))
            })?;
        }
        if !self.mailbox.lux_open_threshold.is_finite() {
            return Err(ConfigError::InvalidConfig(
                "mailbox.lux_open_threshold must be a finite number".to_string(),
            ));
        }

        Ok(())
    }
}

impl BrokerSection {
    fn validate(&self) -> Result<(), ConfigError> {
        parse_broker_url(&self.url)?;

        if let Some(client_id) = &self.client_id {
            if client_id.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "broker.client_id cannot be empty".to_string(),
                ));
            }
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.password_env.is_some() && self.username_env.is_none() {
            return Err(ConfigError::InvalidConfig(
                "broker.password_env requires broker.username_env".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the section into an immutable broker configuration
    ///
    /// A configured username variable must be set; a missing password
    /// variable resolves to an empty password.
    pub fn to_broker_config(&self) -> Result<BrokerConfig, ConfigError> {
        let (host, port, tls) = parse_broker_url(&self.url)?;

        let credentials = match &self.username_env {
            Some(username_env) => {
                let username = std::env::var(username_env)
                    .map_err(|_| ConfigError::EnvVarNotFound(username_env.clone()))?;
                let password = self
                    .password_env
                    .as_ref()
                    .and_then(|name| std::env::var(name).ok())
                    .unwrap_or_default();
                Some(Credentials { username, password })
            }
            None => None,
        };

        Ok(BrokerConfig {
            host,
            port,
            tls,
            client_id: self.client_id.clone().unwrap_or_else(default_client_id),
            credentials,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            clean_session: self.clean_session,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        })
    }
}

/// Parse a broker URL into host, port and TLS flag
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), ConfigError> {
    let url =
        Url::parse(broker_url).map_err(|_| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(ConfigError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ConfigError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

fn default_client_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("SwiftMail-{millis}")
}

/// Username and password presented on CONNECT
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Resolved, immutable connection parameters for one broker
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub client_id: String,
    pub credentials: Option<Credentials>,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub connect_timeout: Duration,
}

impl BrokerConfig {
    /// Plain-TCP configuration with defaults, handy for tools and tests
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
            client_id: client_id.into(),
            credentials: None,
            keep_alive: Duration::from_secs(default_keep_alive()),
            clean_session: true,
            connect_timeout: Duration::from_secs(default_connect_timeout()),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// `host:port` for log lines
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[broker]
url = "tcp://test.mosquitto.org:1883"
client_id = "swiftmail-monitor"
keep_alive_secs = 30

[retry]
base_delay_ms = 500
max_delay_ms = 30000
jitter = 0.1
stable_after_secs = 45
max_attempts = 12

[mailbox]
topic = "swiftmail/sensors"
qos = 1
lux_open_threshold = 20.5
proximity_mail_threshold = 7000
events_topic = "swiftmail/events"

[[subscriptions]]
filter = "mailbox/+/sensors"
qos = 1

[[subscriptions]]
filter = "$SYS/broker/uptime"
"#;

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.broker.url, "tcp://test.mosquitto.org:1883");
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert!(config.broker.clean_session);
        assert_eq!(config.retry.max_attempts, Some(12));
        assert_eq!(config.retry.base_delay(), Duration::from_millis(500));
        assert_eq!(config.mailbox.qos, QoS::AtLeastOnce);
        assert_eq!(config.mailbox.proximity_mail_threshold, 7000);
        assert_eq!(config.mailbox.events_topic.as_deref(), Some("swiftmail/events"));
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(config.subscriptions[1].qos, QoS::AtMostOnce);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
[broker]
url = "mqtt://localhost"
"#,
        )
        .unwrap();

        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.mailbox, MailboxSection::default());
        assert_eq!(config.mailbox.topic.as_str(), "swiftmail/sensors");
        assert_eq!(config.mailbox.lux_open_threshold, 18.0);
        assert_eq!(config.mailbox.proximity_mail_threshold, 8000);
        assert!(config.subscriptions.is_empty());
        assert_eq!(config.broker.connect_timeout_secs, 10);
    }

    #[test]
    fn test_broker_url_parsing() {
        assert_eq!(
            parse_broker_url("tcp://test.mosquitto.org:1883").unwrap(),
            ("test.mosquitto.org".to_string(), 1883, false)
        );
        assert_eq!(
            parse_broker_url("mqtt://localhost").unwrap(),
            ("localhost".to_string(), 1883, false)
        );
        assert_eq!(
            parse_broker_url("mqtts://broker.example.com").unwrap(),
            ("broker.example.com".to_string(), 8883, true)
        );
        assert_eq!(
            parse_broker_url("ssl://broker.example.com:9883").unwrap(),
            ("broker.example.com".to_string(), 9883, true)
        );
        assert!(matches!(
            parse_broker_url("http://localhost"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
        assert!(matches!(
            parse_broker_url("not a url"),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_invalid_filter_rejected_at_parse_time() {
        let result = AppConfig::from_toml_str(
            r#"
[broker]
url = "mqtt://localhost"

[[subscriptions]]
filter = "mailbox/#/sensors"
"#,
        );
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
[broker]
url = "mqtt://localhost"

[mailbox]
qos = 3
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_events_topic_must_be_a_topic_name() {
        let result = AppConfig::from_toml_str(
            r#"
[broker]
url = "mqtt://localhost"

[mailbox]
events_topic = "swiftmail/+"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_password_without_username_rejected() {
        let result = AppConfig::from_toml_str(
            r#"
[broker]
url = "mqtt://localhost"
password_env = "SWIFTMAIL_TEST_ONLY_PASSWORD"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_to_broker_config_without_credentials() {
        let config = AppConfig::from_toml_str(FULL_CONFIG).unwrap();
        let broker = config.broker.to_broker_config().unwrap();

        assert_eq!(broker.host, "test.mosquitto.org");
        assert_eq!(broker.port, 1883);
        assert!(!broker.tls);
        assert_eq!(broker.client_id, "swiftmail-monitor");
        assert_eq!(broker.credentials, None);
        assert_eq!(broker.keep_alive, Duration::from_secs(30));
        assert_eq!(broker.endpoint(), "test.mosquitto.org:1883");
    }

    #[test]
    fn test_default_client_id() {
        let config = AppConfig::from_toml_str("[broker]\nurl = \"mqtt://localhost\"\n").unwrap();
        let broker = config.broker.to_broker_config().unwrap();
        assert!(broker.client_id.starts_with("SwiftMail-"));
    }

    #[test]
    fn test_missing_username_env_var() {
        let section = BrokerSection {
            url: "mqtt://localhost".to_string(),
            client_id: None,
            username_env: Some("SWIFTMAIL_TEST_SURELY_UNSET_USERNAME".to_string()),
            password_env: None,
            keep_alive_secs: 60,
            clean_session: true,
            connect_timeout_secs: 10,
        };
        assert!(matches!(
            section.to_broker_config(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let config = BrokerConfig::new("localhost", 1883, "c1").with_credentials("user", "hunter2");
        let rendered = format!("{config:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = AppConfig::from_toml_str(FULL_CONFIG).unwrap();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let reparsed = AppConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(config, reparsed);
    }
}
