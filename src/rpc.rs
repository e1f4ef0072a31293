//! Wire boundary for remote subscribers.
//!
//! A transport (websocket, socket.io bridge, TCP, ...) owns one [`Connection`]
//! per client. It hands decoded [`Inbound`] messages to the connection and
//! ships whatever the connection writes to its [`OutboundSink`]. Closing the
//! connection unsubscribes every tag it created.
//!
//! Messages are internally tagged by `type`:
//!
//! ```text
//! -> {"type": "subscribe", "tag": "t1", "namespace": "*.cats", "query": {"name": "tom"}}
//! -> {"type": "unsubscribe", "tag": "t1"}
//! <- {"type": "insert", "tag": "t1", "result": {"_id": 1, "name": "tom"}}
//! <- {"type": "rejected", "tag": "t2", "error": "Unsupported query operator: $elemMatch"}
//! ```

use crate::error::{FeedError, Result};
use crate::subscriptions::{
    DropReason, FanoutHub, FeedEvent, SubscribeRequest, SubscriptionHandle, SubscriptionId,
    SubscriptionTag,
};
use crate::types::Document;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Messages a client sends.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    Subscribe(SubscribeRequest),
    Unsubscribe { tag: SubscriptionTag },
}

/// Messages sent to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    Insert { tag: SubscriptionTag, result: Document },
    Update { tag: SubscriptionTag, result: Document },
    Delete { tag: SubscriptionTag, result: Document },
    FilterExited { tag: SubscriptionTag, result: Document },
    /// The subscribe request was refused (bad query, duplicate tag, ...).
    Rejected { tag: SubscriptionTag, error: String },
    /// The server dropped the subscription (the client fell behind).
    Dropped { tag: SubscriptionTag, reason: DropReason },
}

impl Outbound {
    /// Wrap a subscription event for the wire. Lifecycle events other than a
    /// buffer overflow have no wire form.
    pub fn from_event(tag: &SubscriptionTag, event: FeedEvent) -> Option<Self> {
        let tag = tag.clone();
        let message = match event {
            FeedEvent::Insert { document } => Outbound::Insert { tag, result: document },
            FeedEvent::Update { document } => Outbound::Update { tag, result: document },
            FeedEvent::Delete { document } => Outbound::Delete { tag, result: document },
            FeedEvent::FilterExited { document } => Outbound::FilterExited { tag, result: document },
            FeedEvent::Dropped {
                reason: DropReason::BufferOverflow,
            } => Outbound::Dropped {
                tag,
                reason: DropReason::BufferOverflow,
            },
            FeedEvent::Dropped { .. } => return None,
        };
        Some(message)
    }

    pub fn tag(&self) -> &SubscriptionTag {
        match self {
            Outbound::Insert { tag, .. }
            | Outbound::Update { tag, .. }
            | Outbound::Delete { tag, .. }
            | Outbound::FilterExited { tag, .. }
            | Outbound::Rejected { tag, .. }
            | Outbound::Dropped { tag, .. } => tag,
        }
    }
}

/// Message encoding on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Json,
    MessagePack,
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>> {
        match self {
            WireFormat::Json => Ok(serde_json::to_vec(message)?),
            WireFormat::MessagePack => Ok(rmp_serde::to_vec_named(message)?),
        }
    }

    pub fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
            WireFormat::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}

/// Where a connection writes outbound messages. Implemented by the transport.
pub trait OutboundSink: Send + Sync + 'static {
    fn send(&self, message: Outbound) -> Result<()>;
}

/// Sink that forwards into a channel.
pub struct ChannelSink {
    sender: Sender<Outbound>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Outbound>) -> Self {
        Self { sender }
    }
}

impl OutboundSink for ChannelSink {
    fn send(&self, message: Outbound) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| FeedError::TransientIo("outbound channel closed".into()))
    }
}

/// A subscription created through this connection.
struct Owned {
    id: SubscriptionId,
    forwarder: JoinHandle<()>,
}

/// Tags held by a connection. `closed` is only read or set under the same
/// lock as `tags`, so no subscription is registered after `close` drains.
#[derive(Default)]
struct Ownership {
    tags: HashMap<SubscriptionTag, Owned>,
    closed: bool,
}

/// One client connection. Owns the tags it subscribed.
pub struct Connection {
    hub: Arc<FanoutHub>,
    sink: Arc<dyn OutboundSink>,
    owned: Mutex<Ownership>,
}

impl Connection {
    pub fn new(hub: Arc<FanoutHub>, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            hub,
            sink,
            owned: Mutex::new(Ownership::default()),
        }
    }

    /// Decode and handle one inbound message.
    pub fn handle_bytes(&self, bytes: &[u8], format: WireFormat) -> Result<()> {
        let message: Inbound = format.decode(bytes)?;
        self.handle(message)
    }

    /// Handle one inbound message. A refused subscribe is reported to the
    /// client as `Rejected` and also returned as an error.
    pub fn handle(&self, message: Inbound) -> Result<()> {
        match message {
            Inbound::Subscribe(request) => self.subscribe(request).map(|_| ()),
            Inbound::Unsubscribe { tag } => {
                self.unsubscribe(&tag);
                Ok(())
            }
        }
    }

    pub fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionId> {
        let mut owned = self.owned.lock();
        if owned.closed {
            return Err(FeedError::Stopped);
        }

        let tag = request.tag.clone();
        let handle = match self.hub.subscribe(request) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::info!(tag = %tag, error = %e, "subscription rejected");
                let rejected = Outbound::Rejected {
                    tag: tag.clone(),
                    error: e.to_string(),
                };
                if let Err(send_error) = self.sink.send(rejected) {
                    tracing::warn!(tag = %tag, error = %send_error, "could not deliver rejection");
                }
                return Err(e);
            }
        };

        let id = handle.id;
        let forwarder = match self.spawn_forwarder(handle) {
            Ok(forwarder) => forwarder,
            Err(e) => {
                self.hub.unsubscribe_id(id);
                return Err(e);
            }
        };
        let previous = owned.tags.insert(tag, Owned { id, forwarder });
        if let Some(previous) = previous {
            // Usually already replaced by the hub.
            self.hub.unsubscribe_id(previous.id);
        }

        Ok(id)
    }

    /// Unsubscribe a tag owned by this connection. Idempotent.
    pub fn unsubscribe(&self, tag: &SubscriptionTag) -> bool {
        let owned = self.owned.lock().tags.remove(tag);
        match owned {
            Some(owned) => self.hub.unsubscribe_id(owned.id),
            None => false,
        }
    }

    /// Tags currently owned by this connection.
    pub fn tags(&self) -> Vec<SubscriptionTag> {
        self.owned.lock().tags.keys().cloned().collect()
    }

    /// Unsubscribe everything this connection owns and wait for its
    /// forwarders to finish. Idempotent.
    pub fn close(&self) {
        let owned: Vec<(SubscriptionTag, Owned)> = {
            let mut guard = self.owned.lock();
            if guard.closed {
                return;
            }
            guard.closed = true;
            guard.tags.drain().collect()
        };
        for (_, sub) in &owned {
            self.hub.unsubscribe_id(sub.id);
        }
        for (tag, sub) in owned {
            if sub.forwarder.join().is_err() {
                tracing::error!(tag = %tag, "subscription forwarder panicked");
            }
        }
        tracing::info!("connection closed");
    }

    fn spawn_forwarder(&self, handle: SubscriptionHandle) -> Result<JoinHandle<()>> {
        let sink = Arc::clone(&self.sink);
        let hub = Arc::clone(&self.hub);
        let SubscriptionHandle { id, tag, receiver } = handle;

        thread::Builder::new()
            .name(format!("forward-{}", tag))
            .spawn(move || {
                for event in receiver.iter() {
                    let last = matches!(event, FeedEvent::Dropped { .. });
                    if let Some(message) = Outbound::from_event(&tag, event) {
                        if let Err(e) = sink.send(message) {
                            tracing::warn!(tag = %tag, error = %e, "outbound send failed, unsubscribing");
                            hub.unsubscribe_id(id);
                            return;
                        }
                    }
                    if last {
                        return;
                    }
                }
            })
            .map_err(|e| FeedError::TransientIo(format!("spawn forwarder: {}", e)))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EnrichedEntry, LogEntry, Position};
    use crossbeam_channel::{unbounded, Receiver};
    use serde_json::json;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(500);

    fn connection(hub: &Arc<FanoutHub>) -> (Connection, Receiver<Outbound>) {
        let (tx, rx) = unbounded();
        (Connection::new(Arc::clone(hub), Arc::new(ChannelSink::new(tx))), rx)
    }

    fn insert(ns: &str, doc: Document) -> EnrichedEntry {
        EnrichedEntry::passthrough(LogEntry::insert(ns, Position(1), doc).unwrap())
    }

    #[test]
    fn test_inbound_decoding() {
        let message: Inbound = WireFormat::Json
            .decode(br#"{"type": "subscribe", "tag": "t1", "ns": "*.cats", "query": {"name": "tom"}}"#)
            .unwrap();
        match message {
            Inbound::Subscribe(request) => {
                assert_eq!(request.tag.as_str(), "t1");
                assert_eq!(request.namespace.as_deref(), Some("*.cats"));
            }
            other => panic!("Expected subscribe, got {:?}", other),
        }

        let message: Inbound = WireFormat::Json
            .decode(br#"{"type": "unsubscribe", "tag": "t1"}"#)
            .unwrap();
        assert!(matches!(message, Inbound::Unsubscribe { .. }));
    }

    #[test]
    fn test_outbound_wire_shape() {
        let message = Outbound::FilterExited {
            tag: SubscriptionTag::from("t1"),
            result: json!({"_id": 1}),
        };
        let bytes = WireFormat::Json.encode(&message).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"type": "filterExited", "tag": "t1", "result": {"_id": 1}}));
    }

    #[test]
    fn test_message_pack_encoding() {
        let message = Outbound::Insert {
            tag: SubscriptionTag::from("t1"),
            result: json!({"_id": 1, "name": "tom"}),
        };
        let bytes = WireFormat::MessagePack.encode(&message).unwrap();
        let decoded: Outbound = WireFormat::MessagePack.decode(&bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_subscribe_and_receive() {
        let hub = Arc::new(FanoutHub::default());
        let (conn, outbound) = connection(&hub);

        conn.handle_bytes(
            br#"{"type": "subscribe", "tag": "cats", "namespace": "*.cats"}"#,
            WireFormat::Json,
        )
        .unwrap();
        hub.route(&insert("test.cats", json!({"_id": 1})));

        assert_eq!(
            outbound.recv_timeout(WAIT).unwrap(),
            Outbound::Insert {
                tag: SubscriptionTag::from("cats"),
                result: json!({"_id": 1})
            }
        );
    }

    #[test]
    fn test_bad_query_rejected() {
        let hub = Arc::new(FanoutHub::default());
        let (conn, outbound) = connection(&hub);

        let result = conn.handle(Inbound::Subscribe(
            SubscribeRequest::new("bad").query(json!({"a": {"$elemMatch": {"b": 1}}})),
        ));
        assert!(matches!(result, Err(FeedError::UnsupportedOperator(_))));

        match outbound.recv_timeout(WAIT).unwrap() {
            Outbound::Rejected { tag, .. } => assert_eq!(tag.as_str(), "bad"),
            other => panic!("Expected Rejected, got {:?}", other),
        }
        assert_eq!(hub.subscription_count(), 0);
        assert!(conn.tags().is_empty());
    }

    struct BrokenSink;

    impl OutboundSink for BrokenSink {
        fn send(&self, _message: Outbound) -> Result<()> {
            Err(FeedError::TransientIo("client went away".into()))
        }
    }

    #[test]
    fn test_rejection_keeps_query_error_when_sink_fails() {
        let hub = Arc::new(FanoutHub::default());
        let conn = Connection::new(Arc::clone(&hub), Arc::new(BrokenSink));

        let result = conn.subscribe(SubscribeRequest::new("bad").query(json!({"$or": [{"a": 1}]})));
        assert!(matches!(result, Err(FeedError::UnsupportedOperator(_))));
        assert_eq!(hub.subscription_count(), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = Arc::new(FanoutHub::default());
        let (conn, outbound) = connection(&hub);

        conn.subscribe(SubscribeRequest::new("t1")).unwrap();
        conn.handle(Inbound::Unsubscribe {
            tag: SubscriptionTag::from("t1"),
        })
        .unwrap();
        conn.handle(Inbound::Unsubscribe {
            tag: SubscriptionTag::from("t1"),
        })
        .unwrap();

        hub.route(&insert("test.cats", json!({"_id": 1})));
        assert!(outbound.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(hub.subscription_count(), 0);
    }

    #[test]
    fn test_close_unsubscribes_owned_tags_only() {
        let hub = Arc::new(FanoutHub::default());
        let (first, _first_out) = connection(&hub);
        let (second, second_out) = connection(&hub);

        first.subscribe(SubscribeRequest::new("a")).unwrap();
        first.subscribe(SubscribeRequest::new("b")).unwrap();
        second.subscribe(SubscribeRequest::new("c")).unwrap();
        assert_eq!(hub.subscription_count(), 3);

        first.close();
        assert_eq!(hub.subscription_count(), 1);
        assert!(hub.contains(&SubscriptionTag::from("c")));

        hub.route(&insert("test.cats", json!({"_id": 1})));
        assert_eq!(second_out.recv_timeout(WAIT).unwrap().tag().as_str(), "c");

        assert!(matches!(
            first.subscribe(SubscribeRequest::new("d")),
            Err(FeedError::Stopped)
        ));
    }

    #[test]
    fn test_close_during_subscribe_leaves_nothing_registered() {
        let hub = Arc::new(FanoutHub::default());
        let (conn, _out) = connection(&hub);
        let conn = Arc::new(conn);

        let subscriber = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for i in 0..200 {
                    match conn.subscribe(SubscribeRequest::new(format!("t{}", i))) {
                        Ok(_) => {}
                        Err(FeedError::Stopped) => break,
                        Err(e) => panic!("Unexpected error: {}", e),
                    }
                }
            })
        };

        thread::sleep(Duration::from_millis(5));
        conn.close();
        subscriber.join().unwrap();

        assert_eq!(hub.subscription_count(), 0);
        assert!(conn.tags().is_empty());
        assert!(matches!(
            conn.subscribe(SubscribeRequest::new("late")),
            Err(FeedError::Stopped)
        ));
    }

    #[test]
    fn test_dropping_connection_closes_it() {
        let hub = Arc::new(FanoutHub::default());
        {
            let (conn, _out) = connection(&hub);
            conn.subscribe(SubscribeRequest::new("a")).unwrap();
            assert_eq!(hub.subscription_count(), 1);
        }
        assert_eq!(hub.subscription_count(), 0);
    }
}
