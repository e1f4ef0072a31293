//! Configuration for the change feed components.
//!
//! Every struct has a `Default` and deserializes with `#[serde(default)]`, so a
//! host can load a partial JSON document and get defaults for the rest.

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a [`ChangeFeed`](crate::feed::ChangeFeed).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub tailer: TailerConfig,
    pub enricher: EnricherConfig,
    pub hub: HubConfig,
}

impl FeedConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: FeedConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tailer.channel_capacity == 0 {
            return Err(FeedError::InvalidConfig("tailer.channel_capacity must be > 0".into()));
        }
        if self.enricher.channel_capacity == 0 {
            return Err(FeedError::InvalidConfig("enricher.channel_capacity must be > 0".into()));
        }
        if self.enricher.workers == 0 {
            return Err(FeedError::InvalidConfig("enricher.workers must be > 0".into()));
        }
        if self.hub.buffer_size == 0 {
            return Err(FeedError::InvalidConfig("hub.buffer_size must be > 0".into()));
        }
        if self.tailer.retry.multiplier < 1.0 {
            return Err(FeedError::InvalidConfig("tailer.retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}

/// Operation log tailer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// Restrict the cursor to one exact namespace (None = whole log).
    pub namespace: Option<String>,

    /// How long a single cursor read may block before the tailer checks for shutdown.
    /// Default: 200ms
    pub read_wait_ms: u64,

    /// Entries buffered between the tailer and its consumer.
    /// Default: 1024
    pub channel_capacity: usize,

    /// Reconnect policy.
    pub retry: RetryConfig,
}

impl TailerConfig {
    pub fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            read_wait_ms: 200,
            channel_capacity: 1024,
            retry: RetryConfig::default(),
        }
    }
}

/// Reconnect backoff settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first reconnect.
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay between reconnects.
    pub max_backoff_ms: u64,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Consecutive failed reconnects before giving up (None = retry forever).
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// How the enricher schedules document lookups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichOrdering {
    /// Lookups run on a worker pool. Updates may complete out of order among
    /// themselves; inserts and deletes wait for in-flight lookups.
    #[default]
    Concurrent,
    /// Lookups run inline, one at a time. Strict log order.
    Serial,
}

/// Update enrichment settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnricherConfig {
    /// Lookup worker threads (ignored for `Serial`).
    /// Default: 4
    pub workers: usize,

    pub ordering: EnrichOrdering,

    /// Enriched entries buffered before the router.
    /// Default: 1024
    pub channel_capacity: usize,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ordering: EnrichOrdering::Concurrent,
            channel_capacity: 1024,
        }
    }
}

/// What to do when a subscribe reuses a live tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateTagPolicy {
    /// Last write wins: the old subscription is dropped.
    #[default]
    Replace,
    /// The new subscribe fails with `DuplicateTag`.
    Reject,
}

/// Fan-out hub settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Max buffered events per subscription before the subscriber is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    pub duplicate_tags: DuplicateTagPolicy,

    /// Compiled filters kept for reuse across subscriptions with the same query.
    /// Zero disables the cache. Default: 256
    pub filter_cache_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            duplicate_tags: DuplicateTagPolicy::Replace,
            filter_cache_size: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = FeedConfig::from_json(
            r#"{"tailer": {"namespace": "test.users", "retry": {"max_attempts": 5}},
                "hub": {"duplicate_tags": "reject"}}"#,
        )
        .unwrap();

        assert_eq!(config.tailer.namespace.as_deref(), Some("test.users"));
        assert_eq!(config.tailer.read_wait_ms, 200);
        assert_eq!(config.tailer.retry.max_attempts, Some(5));
        assert_eq!(config.tailer.retry.initial_backoff_ms, 100);
        assert_eq!(config.enricher.ordering, EnrichOrdering::Concurrent);
        assert_eq!(config.hub.duplicate_tags, DuplicateTagPolicy::Reject);
        assert_eq!(config.hub.buffer_size, 1000);
    }

    #[test]
    fn test_validation_rejects_zero_workers() {
        let result = FeedConfig::from_json(r#"{"enricher": {"workers": 0}}"#);
        assert!(matches!(result, Err(FeedError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_json() {
        let result = FeedConfig::from_json("{not json");
        assert!(matches!(result, Err(FeedError::Deserialization(_))));
    }
}
