//! Subscription registry and fan-out.

use crate::config::{DuplicateTagPolicy, HubConfig};
use crate::error::{FeedError, Result};
use crate::namespace::NamespacePattern;
use crate::query::CompiledFilter;
use crate::types::{Document, DocumentId, EnrichedEntry, OpKind};
use crossbeam_channel::{bounded, Sender};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    DropReason, FeedEvent, HubStats, SubscribeRequest, SubscriptionHandle, SubscriptionId,
    SubscriptionTag,
};

/// Internal subscription state.
struct Subscription {
    tag: SubscriptionTag,
    namespace: NamespacePattern,
    filter: Arc<CompiledFilter>,
    /// Documents this subscriber currently holds.
    observed: Mutex<HashSet<DocumentId>>,
    /// Holds `buffer` events plus one slot reserved for the final `Dropped`.
    sender: Sender<FeedEvent>,
    buffer: usize,
}

impl Subscription {
    /// Try to send an event. Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, event: FeedEvent) -> bool {
        if self.sender.len() >= self.buffer {
            return false;
        }
        self.sender.try_send(event).is_ok()
    }

    /// Decide what, if anything, this subscriber should see for a change to
    /// `document`, and update the observed set accordingly.
    fn evaluate(&self, op: OpKind, id: &DocumentId, document: &Document) -> Option<FeedEvent> {
        let mut observed = self.observed.lock();

        if self.filter.matches(document) {
            match op {
                OpKind::Delete => observed.remove(id),
                OpKind::Insert | OpKind::Update => observed.insert(id.clone()),
            };
            Some(FeedEvent::for_op(op, document.clone()))
        } else if observed.remove(id) {
            Some(FeedEvent::FilterExited {
                document: document.clone(),
            })
        } else {
            None
        }
    }

    fn drop_with(self, reason: DropReason) {
        // Best effort; the receiver may already be gone.
        let _ = self.sender.try_send(FeedEvent::Dropped { reason });
    }
}

/// Live subscriptions. Iterating `by_id` yields registration order.
#[derive(Default)]
struct Registry {
    by_id: BTreeMap<SubscriptionId, Subscription>,
    by_tag: HashMap<SubscriptionTag, SubscriptionId>,
}

impl Registry {
    fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let sub = self.by_id.remove(&id)?;
        if self.by_tag.get(&sub.tag) == Some(&id) {
            self.by_tag.remove(&sub.tag);
        }
        Some(sub)
    }
}

#[derive(Default)]
struct Counters {
    routed: AtomicU64,
    unenriched: AtomicU64,
    delivered: AtomicU64,
    filter_exits: AtomicU64,
    dropped_subscribers: AtomicU64,
}

/// Holds live subscriptions and routes enriched log entries to them.
///
/// Subscribe and unsubscribe take the registry write lock; `route` holds the
/// read lock for the whole pass, so a subscription removed concurrently either
/// sees the entry or does not, never half of it. Delivery never blocks: a
/// subscriber whose buffer is full is dropped.
pub struct FanoutHub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    config: HubConfig,
    /// Compiled filters keyed by canonical query JSON.
    filters: Option<Mutex<LruCache<String, Arc<CompiledFilter>>>>,
    counters: Counters,
}

impl FanoutHub {
    pub fn new(config: HubConfig) -> Self {
        let filters = NonZeroUsize::new(config.filter_cache_size).map(|n| Mutex::new(LruCache::new(n)));
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            config,
            filters,
            counters: Counters::default(),
        }
    }

    /// Register a subscription.
    ///
    /// The namespace pattern and query are compiled first; a bad query fails
    /// here and never reaches the registry. A reused tag either replaces the
    /// old subscription or fails with `DuplicateTag`, depending on
    /// [`DuplicateTagPolicy`].
    pub fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionHandle> {
        let namespace = NamespacePattern::compile_opt(request.namespace.as_deref())?;
        let filter = self.compile_filter(request.query.as_ref())?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.config.buffer_size + 1);
        let tag = request.tag;

        let subscription = Subscription {
            tag: tag.clone(),
            namespace,
            filter,
            observed: Mutex::new(request.observe_ids.into_iter().collect()),
            sender,
            buffer: self.config.buffer_size,
        };

        let replaced = {
            let mut registry = self.registry.write();
            let existing = registry.by_tag.get(&tag).copied();
            if existing.is_some() && self.config.duplicate_tags == DuplicateTagPolicy::Reject {
                return Err(FeedError::DuplicateTag(tag.to_string()));
            }
            let replaced = existing.and_then(|old| registry.remove(old));
            registry.by_tag.insert(tag.clone(), id);
            registry.by_id.insert(id, subscription);
            replaced
        };

        if let Some(old) = replaced {
            tracing::info!(tag = %tag, "subscription replaced by reused tag");
            old.drop_with(DropReason::Replaced);
        }
        tracing::info!(tag = %tag, id = id.0, "subscribed");

        Ok(SubscriptionHandle { id, tag, receiver })
    }

    /// Remove the subscription registered under `tag`. Idempotent; returns
    /// whether anything was removed.
    pub fn unsubscribe(&self, tag: &SubscriptionTag) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let id = registry.by_tag.get(tag).copied();
            id.and_then(|id| registry.remove(id))
        };
        self.finish_unsubscribe(removed)
    }

    /// Remove a specific subscription, leaving a newer one with the same tag alone.
    pub fn unsubscribe_id(&self, id: SubscriptionId) -> bool {
        let removed = self.registry.write().remove(id);
        self.finish_unsubscribe(removed)
    }

    fn finish_unsubscribe(&self, removed: Option<Subscription>) -> bool {
        match removed {
            Some(sub) => {
                tracing::info!(tag = %sub.tag, "unsubscribed");
                sub.drop_with(DropReason::Unsubscribed);
                true
            }
            None => false,
        }
    }

    /// Mark documents as held by the subscriber (e.g. results of its initial query).
    pub fn observe(&self, tag: &SubscriptionTag, ids: impl IntoIterator<Item = DocumentId>) -> Result<()> {
        self.with_observed(tag, |observed| observed.extend(ids))
    }

    /// Forget documents the subscriber no longer holds. They will not produce
    /// `FilterExited` until delivered again.
    pub fn unobserve(&self, tag: &SubscriptionTag, ids: impl IntoIterator<Item = DocumentId>) -> Result<()> {
        self.with_observed(tag, |observed| {
            for id in ids {
                observed.remove(&id);
            }
        })
    }

    fn with_observed<F>(&self, tag: &SubscriptionTag, f: F) -> Result<()>
    where
        F: FnOnce(&mut HashSet<DocumentId>),
    {
        let registry = self.registry.read();
        let sub = registry
            .by_tag
            .get(tag)
            .and_then(|id| registry.by_id.get(id))
            .ok_or_else(|| FeedError::SubscriptionNotFound(tag.to_string()))?;
        f(&mut sub.observed.lock());
        Ok(())
    }

    /// Whether `tag` currently holds `id`.
    pub fn is_observing(&self, tag: &SubscriptionTag, id: &DocumentId) -> bool {
        let registry = self.registry.read();
        registry
            .by_tag
            .get(tag)
            .and_then(|sid| registry.by_id.get(sid))
            .map_or(false, |sub| sub.observed.lock().contains(id))
    }

    /// Deliver one enriched entry to every matching subscription.
    pub fn route(&self, entry: &EnrichedEntry) {
        self.counters.routed.fetch_add(1, Ordering::Relaxed);

        let Some(document) = entry.routed_document() else {
            self.counters.unenriched.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(position = %entry.entry.position, "update without current document, not routed");
            return;
        };

        let log = &entry.entry;
        let mut overflowed = Vec::new();

        {
            let registry = self.registry.read();
            for (id, sub) in registry.by_id.iter() {
                if !sub.namespace.matches(log.namespace.as_str()) {
                    continue;
                }
                let Some(event) = sub.evaluate(log.op, &log.document_id, document) else {
                    continue;
                };

                let exited = matches!(event, FeedEvent::FilterExited { .. });
                if sub.try_send(event) {
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    if exited {
                        self.counters.filter_exits.fetch_add(1, Ordering::Relaxed);
                    }
                } else {
                    overflowed.push(*id);
                }
            }
        }

        if !overflowed.is_empty() {
            let mut registry = self.registry.write();
            for id in overflowed {
                if let Some(sub) = registry.remove(id) {
                    tracing::warn!(tag = %sub.tag, "dropping slow subscriber");
                    self.counters.dropped_subscribers.fetch_add(1, Ordering::Relaxed);
                    sub.drop_with(DropReason::BufferOverflow);
                }
            }
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.registry.read().by_id.len()
    }

    pub fn contains(&self, tag: &SubscriptionTag) -> bool {
        self.registry.read().by_tag.contains_key(tag)
    }

    /// Tags in registration order.
    pub fn tags(&self) -> Vec<SubscriptionTag> {
        self.registry
            .read()
            .by_id
            .values()
            .map(|sub| sub.tag.clone())
            .collect()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            routed: self.counters.routed.load(Ordering::Relaxed),
            unenriched: self.counters.unenriched.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            filter_exits: self.counters.filter_exits.load(Ordering::Relaxed),
            dropped_subscribers: self.counters.dropped_subscribers.load(Ordering::Relaxed),
        }
    }

    fn compile_filter(&self, query: Option<&serde_json::Value>) -> Result<Arc<CompiledFilter>> {
        let Some(query) = query else {
            return Ok(Arc::new(CompiledFilter::none()));
        };
        let Some(cache) = &self.filters else {
            return Ok(Arc::new(CompiledFilter::compile(query)?));
        };

        let key = serde_json::to_string(query)?;
        if let Some(filter) = cache.lock().get(&key) {
            return Ok(Arc::clone(filter));
        }

        let filter = Arc::new(CompiledFilter::compile(query)?);
        cache.lock().put(key, Arc::clone(&filter));
        Ok(filter)
    }
}

impl Default for FanoutHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
