//! Subscription types for filtered change delivery.

use crate::types::{Document, DocumentId, OpKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-supplied subscription identifier. Unique per registry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct SubscriptionTag(pub String);

impl SubscriptionTag {
    pub fn new(tag: impl Into<String>) -> Self {
        SubscriptionTag(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SubscriptionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({})", self.0)
    }
}

impl fmt::Display for SubscriptionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionTag {
    fn from(s: &str) -> Self {
        SubscriptionTag(s.to_string())
    }
}

impl From<String> for SubscriptionTag {
    fn from(s: String) -> Self {
        SubscriptionTag(s)
    }
}

/// Registry-assigned identifier. Distinguishes a subscription from a later
/// one that reuses its tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// What a subscriber asks for.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub tag: SubscriptionTag,

    /// Namespace pattern such as `*.users` (None = every namespace).
    #[serde(default, alias = "ns")]
    pub namespace: Option<String>,

    /// Query object (None = every document).
    #[serde(default)]
    pub query: Option<serde_json::Value>,

    /// Documents the subscriber already holds. They produce `FilterExited`
    /// once they stop matching.
    #[serde(default, rename = "observeIds")]
    pub observe_ids: Vec<DocumentId>,
}

impl SubscribeRequest {
    pub fn new(tag: impl Into<SubscriptionTag>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, pattern: impl Into<String>) -> Self {
        self.namespace = Some(pattern.into());
        self
    }

    pub fn query(mut self, query: serde_json::Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn observe(mut self, ids: impl IntoIterator<Item = DocumentId>) -> Self {
        self.observe_ids.extend(ids);
        self
    }
}

/// Events delivered to a subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedEvent {
    /// A matching document was inserted.
    Insert { document: Document },

    /// A matching document was updated (carries the current document).
    Update { document: Document },

    /// A matching document was deleted.
    Delete { document: Document },

    /// A previously delivered document no longer matches the filter.
    FilterExited { document: Document },

    /// The subscription was removed from the registry. Always the last event.
    Dropped { reason: DropReason },
}

impl FeedEvent {
    pub(crate) fn for_op(op: OpKind, document: Document) -> Self {
        match op {
            OpKind::Insert => FeedEvent::Insert { document },
            OpKind::Update => FeedEvent::Update { document },
            OpKind::Delete => FeedEvent::Delete { document },
        }
    }

    /// The document carried by the event, if any.
    pub fn document(&self) -> Option<&Document> {
        match self {
            FeedEvent::Insert { document }
            | FeedEvent::Update { document }
            | FeedEvent::Delete { document }
            | FeedEvent::FilterExited { document } => Some(document),
            FeedEvent::Dropped { .. } => None,
        }
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Event buffer overflowed (slow consumer).
    BufferOverflow,
    /// Another subscribe reused the tag.
    Replaced,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Handle for receiving a subscription's events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub tag: SubscriptionTag,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<FeedEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeedEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeedEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<FeedEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Counters snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Entries passed to `route`.
    pub routed: u64,
    /// Update entries skipped because enrichment produced no document.
    pub unenriched: u64,
    /// Events delivered to subscriptions.
    pub delivered: u64,
    /// `FilterExited` events among the delivered ones.
    pub filter_exits: u64,
    /// Subscribers dropped for overflowing their buffer.
    pub dropped_subscribers: u64,
}
