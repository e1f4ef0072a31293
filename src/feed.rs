//! The assembled change feed: tailer → enricher → hub.

use crate::config::FeedConfig;
use crate::enricher::{DetailEnricher, EnricherStats, EnricherTask};
use crate::error::{FeedError, Result};
use crate::rpc::{Connection, OutboundSink};
use crate::source::{DocumentStore, LogSource};
use crate::subscriptions::{FanoutHub, HubStats, SubscribeRequest, SubscriptionHandle, SubscriptionTag};
use crate::tailer::{OplogTailer, TailerSignal, TailerStats};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Counters from every stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub tailer: TailerStats,
    pub enricher: EnricherStats,
    pub hub: HubStats,
}

struct Tasks {
    enricher: EnricherTask,
    router: JoinHandle<()>,
}

/// Tails a log source, enriches updates from a document store and routes the
/// result to subscriptions.
///
/// The hub outlives start/stop cycles; subscriptions registered before
/// `start` receive entries once the feed runs.
pub struct ChangeFeed {
    tailer: OplogTailer,
    enricher: DetailEnricher,
    hub: Arc<FanoutHub>,
    tasks: Mutex<Option<Tasks>>,
}

impl ChangeFeed {
    pub fn new(
        source: Arc<dyn LogSource>,
        store: Arc<dyn DocumentStore>,
        config: FeedConfig,
    ) -> Result<Self> {
        let hub = Arc::new(FanoutHub::new(config.hub.clone()));
        Self::with_hub(source, store, config, hub)
    }

    /// Build a feed that routes into an existing hub.
    pub fn with_hub(
        source: Arc<dyn LogSource>,
        store: Arc<dyn DocumentStore>,
        config: FeedConfig,
        hub: Arc<FanoutHub>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tailer: OplogTailer::new(source, config.tailer),
            enricher: DetailEnricher::new(store, config.enricher),
            hub,
            tasks: Mutex::new(None),
        })
    }

    /// Start tailing and routing.
    pub fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return Err(FeedError::AlreadyStarted);
        }

        let entries = self.tailer.start()?;
        let (enriched, enricher) = match self.enricher.spawn(entries) {
            Ok(spawned) => spawned,
            Err(e) => {
                self.tailer.stop();
                return Err(e);
            }
        };

        let hub = Arc::clone(&self.hub);
        let router = thread::Builder::new()
            .name("feed-router".into())
            .spawn(move || {
                for entry in enriched.iter() {
                    hub.route(&entry);
                }
                tracing::debug!("router drained");
            });
        let router = match router {
            Ok(router) => router,
            Err(e) => {
                self.tailer.stop();
                enricher.join();
                return Err(FeedError::TransientIo(format!("spawn router thread: {}", e)));
            }
        };

        *tasks = Some(Tasks { enricher, router });
        tracing::info!("change feed started");
        Ok(())
    }

    /// Stop the feed. Entries already read are routed before this returns.
    /// Subscriptions stay registered. Idempotent.
    pub fn stop(&self) {
        let Some(tasks) = self.tasks.lock().take() else {
            return;
        };

        self.tailer.stop();
        tasks.enricher.join();
        if tasks.router.join().is_err() {
            tracing::error!("router thread panicked");
        }
        tracing::info!("change feed stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().is_some()
    }

    pub fn hub(&self) -> &Arc<FanoutHub> {
        &self.hub
    }

    pub fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionHandle> {
        self.hub.subscribe(request)
    }

    pub fn unsubscribe(&self, tag: &SubscriptionTag) -> bool {
        self.hub.unsubscribe(tag)
    }

    /// Open a client connection whose messages go to `sink`.
    pub fn connect(&self, sink: Arc<dyn OutboundSink>) -> Connection {
        Connection::new(Arc::clone(&self.hub), sink)
    }

    /// Tailer signals (reconnects, terminal failure).
    pub fn signals(&self) -> Receiver<TailerSignal> {
        self.tailer.signals()
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            tailer: self.tailer.stats(),
            enricher: self.enricher.stats(),
            hub: self.hub.stats(),
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, TailerConfig};
    use crate::source::memory::MemoryDatabase;
    use crate::subscriptions::FeedEvent;
    use crate::types::DocumentId;
    use serde_json::json;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn fast_config() -> FeedConfig {
        FeedConfig {
            tailer: TailerConfig {
                read_wait_ms: 10,
                retry: RetryConfig {
                    initial_backoff_ms: 5,
                    max_backoff_ms: 20,
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn feed_over(db: &MemoryDatabase) -> ChangeFeed {
        ChangeFeed::new(Arc::new(db.oplog.clone()), db.documents.clone(), fast_config()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let db = MemoryDatabase::new();
        let mut config = fast_config();
        config.hub.buffer_size = 0;
        let result = ChangeFeed::new(Arc::new(db.oplog.clone()), db.documents.clone(), config);
        assert!(matches!(result, Err(FeedError::InvalidConfig(_))));
    }

    #[test]
    fn test_routes_enriched_updates() {
        let db = MemoryDatabase::new();
        let feed = feed_over(&db);
        let handle = feed
            .subscribe(SubscribeRequest::new("cats").namespace("*.cats"))
            .unwrap();
        feed.start().unwrap();

        db.insert("test.cats", json!({"_id": "tom", "weighs": 40})).unwrap();
        db.update("test.cats", &DocumentId::new("tom"), json!({"weighs": 41}))
            .unwrap();

        let first = handle.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(first, FeedEvent::Insert { document: json!({"_id": "tom", "weighs": 40}) });

        let second = handle.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(second, FeedEvent::Update { document: json!({"_id": "tom", "weighs": 41}) });

        feed.stop();
        let stats = feed.stats();
        assert_eq!(stats.tailer.entries, 2);
        assert_eq!(stats.enricher.lookups, 1);
        assert_eq!(stats.hub.routed, 2);
    }

    #[test]
    fn test_start_twice() {
        let db = MemoryDatabase::new();
        let feed = feed_over(&db);
        feed.start().unwrap();
        assert!(matches!(feed.start(), Err(FeedError::AlreadyStarted)));
        assert!(feed.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_keeps_subscriptions() {
        let db = MemoryDatabase::new();
        let feed = feed_over(&db);
        let _handle = feed.subscribe(SubscribeRequest::new("any")).unwrap();
        feed.start().unwrap();

        feed.stop();
        feed.stop();
        assert!(!feed.is_running());
        assert_eq!(db.oplog.live_cursors(), 0);
        assert!(feed.hub().contains(&SubscriptionTag::from("any")));
    }

    #[test]
    fn test_restart_after_stop() {
        let db = MemoryDatabase::new();
        let feed = feed_over(&db);
        let handle = feed.subscribe(SubscribeRequest::new("any")).unwrap();

        feed.start().unwrap();
        feed.stop();
        db.insert("db.gap", json!({"_id": 1})).unwrap();

        feed.start().unwrap();
        db.insert("db.after", json!({"_id": 2})).unwrap();

        let event = handle.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(event.document(), Some(&json!({"_id": 2})));
    }

    #[test]
    fn test_connect_uses_shared_hub() {
        let db = MemoryDatabase::new();
        let feed = feed_over(&db);
        let (tx, _rx) = crossbeam_channel::unbounded();
        let connection = feed.connect(Arc::new(crate::rpc::ChannelSink::new(tx)));

        connection.subscribe(SubscribeRequest::new("remote")).unwrap();
        assert!(feed.hub().contains(&SubscriptionTag::from("remote")));

        connection.close();
        assert!(!feed.hub().contains(&SubscriptionTag::from("remote")));
    }
}
