//! Subscription registry
//!
//! Bindings of topic filter to handler, kept independently of any session.
//! The registry is the source of truth for what must be subscribed whenever
//! a session comes up.

use crate::dispatch::MessageHandler;
use crate::error::{LinkError, LinkResult};
use crate::protocol::{QoS, TopicFilter};
use crate::transport::TransportClient;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// One filter → handler binding
#[derive(Clone)]
pub struct Subscription {
    pub filter: TopicFilter,
    pub qos: QoS,
    pub handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Outcome of re-issuing every subscription on a new session
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplayReport {
    pub applied: Vec<String>,
    pub failed: Vec<(String, LinkError)>,
}

impl ReplayReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    entries: Arc<RwLock<Vec<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a binding; an existing binding for the same filter is replaced in place
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: Arc<dyn MessageHandler>,
    ) -> LinkResult<TopicFilter> {
        let filter = TopicFilter::new(filter)?;
        let mut entries = self.entries.write().await;

        match entries.iter_mut().find(|s| s.filter == filter) {
            Some(existing) => {
                debug!(filter = %filter, "Replacing subscription");
                existing.qos = qos;
                existing.handler = handler;
            }
            None => {
                debug!(filter = %filter, %qos, "Adding subscription");
                entries.push(Subscription {
                    filter: filter.clone(),
                    qos,
                    handler,
                });
            }
        }

        Ok(filter)
    }

    /// Remove a binding; returns whether one existed
    pub async fn unsubscribe(&self, filter: &str) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|s| s.filter.as_str() != filter);
        entries.len() != before
    }

    /// Re-issue every binding on `client`; failures are collected per filter
    pub async fn replay_all(&self, client: &dyn TransportClient) -> ReplayReport {
        let snapshot: Vec<(TopicFilter, QoS)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect();

        let mut report = ReplayReport::default();
        for (filter, qos) in snapshot {
            match client.subscribe(filter.as_str(), qos).await {
                Ok(()) => report.applied.push(filter.to_string()),
                Err(e) => {
                    warn!(filter = %filter, error = %e.redacted(), "Failed to replay subscription");
                    report.failed.push((filter.to_string(), e));
                }
            }
        }

        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Subscriptions replayed"
        );
        report
    }

    /// Bindings whose filter matches `topic`, in registration order
    pub async fn matching(&self, topic: &str) -> Vec<Subscription> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|s| s.filter.matches(topic))
            .cloned()
            .collect()
    }

    pub async fn filters(&self) -> Vec<(TopicFilter, QoS)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect()
    }

    pub async fn contains(&self, filter: &str) -> bool {
        self.entries
            .read()
            .await
            .iter()
            .any(|s| s.filter.as_str() == filter)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry").finish_non_exhaustive()
    }
}
