//! Topic name and topic filter validation plus wildcard matching
//!
//! Implements the MQTT 3.1.1 rules (section 4.7): `/` separates levels,
//! `+` matches exactly one level, `#` matches the parent level and any number
//! of child levels and must be the last level of a filter.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum encoded length of a topic (the MQTT length prefix is 16 bits)
pub const MAX_TOPIC_LEN: usize = 65_535;

/// Validation errors for topic names and filters
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic cannot be empty")]
    Empty,
    #[error("Topic exceeds {MAX_TOPIC_LEN} bytes")]
    TooLong,
    #[error("Topic contains a NUL character")]
    NulCharacter,
    #[error("Topic name cannot contain wildcard '{0}'")]
    WildcardInName(char),
    #[error("Multi-level wildcard must be the last level and stand alone: {0}")]
    MisplacedMultiLevel(String),
    #[error("Single-level wildcard must occupy a whole level: {0}")]
    MisplacedSingleLevel(String),
}

fn validate_common(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(TopicError::TooLong);
    }
    if topic.contains('\0') {
        return Err(TopicError::NulCharacter);
    }
    Ok(())
}

/// Validate a topic name used for PUBLISH (no wildcards allowed)
pub fn validate_topic_name(topic: &str) -> Result<(), TopicError> {
    validate_common(topic)?;

    if let Some(ch) = topic.chars().find(|c| *c == '+' || *c == '#') {
        return Err(TopicError::WildcardInName(ch));
    }

    Ok(())
}

/// Validate a topic filter used for SUBSCRIBE
pub fn validate_topic_filter(filter: &str) -> Result<(), TopicError> {
    validate_common(filter)?;

    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;

    for (index, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || index != last) {
            return Err(TopicError::MisplacedMultiLevel(filter.to_string()));
        }
        if level.contains('+') && *level != "+" {
            return Err(TopicError::MisplacedSingleLevel(filter.to_string()));
        }
    }

    Ok(())
}

/// Check whether a published topic name matches a subscription filter
///
/// Both arguments are expected to be valid; an invalid filter simply never
/// matches anything beyond its literal levels.
pub fn topic_matches(topic: &str, filter: &str) -> bool {
    // MQTT 4.7.2: wildcards at the first level never match $-prefixed topics
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_levels = topic.split('/');
    let mut filter_levels = filter.split('/').peekable();

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            // "a/#" also matches "a" itself
            (Some("#"), _) if filter_levels.peek().is_none() => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// A validated MQTT topic filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn new(filter: impl Into<String>) -> Result<Self, TopicError> {
        let filter = filter.into();
        validate_topic_filter(&filter)?;
        Ok(Self(filter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the filter contains `+` or `#`
    pub fn has_wildcards(&self) -> bool {
        self.0.contains(['+', '#'])
    }

    pub fn matches(&self, topic: &str) -> bool {
        topic_matches(topic, &self.0)
    }
}

impl TryFrom<String> for TopicFilter {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = TopicError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicFilter> for String {
    fn from(filter: TopicFilter) -> Self {
        filter.0
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("a/b", "a/#"));
        assert!(topic_matches("a/b/c/d", "a/#"));
        assert!(topic_matches("a", "a/#"));
        assert!(!topic_matches("a/b", "c/#"));
        assert!(topic_matches("anything/at/all", "#"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("mailbox/mailbox_01/sensors", "mailbox/+/sensors"));
        assert!(!topic_matches("mailbox/a/b/sensors", "mailbox/+/sensors"));
        assert!(topic_matches("a/", "a/+"));
        assert!(!topic_matches("a", "a/+"));
        assert!(topic_matches("/finance", "+/+"));
        assert!(topic_matches("/finance", "/+"));
        assert!(!topic_matches("/finance", "+"));
    }

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("swiftmail/sensors", "swiftmail/sensors"));
        assert!(!topic_matches("swiftmail/sensors", "swiftmail/sensor"));
        assert!(!topic_matches("swiftmail/sensors/x", "swiftmail/sensors"));
        assert!(!topic_matches("swiftmail", "swiftmail/sensors"));
    }

    #[test]
    fn test_dollar_topics_not_matched_by_leading_wildcards() {
        assert!(!topic_matches("$SYS/broker/uptime", "#"));
        assert!(!topic_matches("$SYS/broker/uptime", "+/broker/uptime"));
        assert!(topic_matches("$SYS/broker/uptime", "$SYS/#"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_topic_filter("a/b/c").is_ok());
        assert!(validate_topic_filter("a/+/c").is_ok());
        assert!(validate_topic_filter("a/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("+").is_ok());
        assert!(validate_topic_filter("/").is_ok());

        assert_eq!(validate_topic_filter(""), Err(TopicError::Empty));
        assert!(matches!(
            validate_topic_filter("a/#/c"),
            Err(TopicError::MisplacedMultiLevel(_))
        ));
        assert!(matches!(
            validate_topic_filter("a/b#"),
            Err(TopicError::MisplacedMultiLevel(_))
        ));
        assert!(matches!(
            validate_topic_filter("a/b+/c"),
            Err(TopicError::MisplacedSingleLevel(_))
        ));
        assert_eq!(
            validate_topic_filter("a/\0"),
            Err(TopicError::NulCharacter)
        );
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_topic_name("swiftmail/sensors").is_ok());
        assert_eq!(
            validate_topic_name("a/+"),
            Err(TopicError::WildcardInName('+'))
        );
        assert_eq!(
            validate_topic_name("a/#"),
            Err(TopicError::WildcardInName('#'))
        );
        assert_eq!(validate_topic_name(""), Err(TopicError::Empty));
        assert_eq!(
            validate_topic_name(&"x".repeat(MAX_TOPIC_LEN + 1)),
            Err(TopicError::TooLong)
        );
    }

    #[test]
    fn test_topic_filter_serde() {
        let filter: TopicFilter = serde_json::from_str("\"mailbox/+/sensors\"").unwrap();
        assert_eq!(filter.as_str(), "mailbox/+/sensors");
        assert!(filter.has_wildcards());

        let bad: Result<TopicFilter, _> = serde_json::from_str("\"a/#/b\"");
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn every_valid_name_matches_itself(topic in "[a-z0-9_]{1,8}(/[a-z0-9_]{1,8}){0,5}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn hash_filter_matches_every_child(
            prefix in "[a-z]{1,6}(/[a-z]{1,6}){0,3}",
            suffix in "[a-z]{1,6}(/[a-z]{1,6}){0,3}",
        ) {
            let filter = format!("{prefix}/#");
            let topic = format!("{prefix}/{suffix}");
            prop_assert!(topic_matches(&topic, &filter));
        }

        #[test]
        fn plus_replaces_exactly_one_level(levels in prop::collection::vec("[a-z]{1,6}", 1..6), index in 0usize..6) {
            let index = index % levels.len();
            let topic = levels.join("/");
            let mut filter_levels = levels.clone();
            filter_levels[index] = "+".to_string();
            let filter = filter_levels.join("/");

            prop_assert!(validate_topic_filter(&filter).is_ok());
            prop_assert!(topic_matches(&topic, &filter));

            // one extra level is never matched by a "+"-only filter
            let longer = format!("{topic}/extra");
            prop_assert!(!topic_matches(&longer, &filter));
        }

        #[test]
        fn disjoint_roots_never_match(a in "[a-m]{1,6}", b in "[n-z]{1,6}", rest in "[a-z]{1,6}") {
            let topic = format!("{a}/{rest}");
            let filter = format!("{b}/#");
            prop_assert!(!topic_matches(&topic, &filter));
        }
    }
}
