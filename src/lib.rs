//! # Oplog Subscriptions
//!
//! Change-data-capture over a database operation log with filtered
//! publish/subscribe fan-out.
//!
//! ## Pipeline
//!
//! - **Tailer**: follows the log from its current tail, reconnecting with
//!   backoff when the cursor is lost
//! - **Enricher**: joins update entries with the current document
//! - **Hub**: routes entries to subscriptions by namespace pattern and
//!   document query, tracking which documents each subscriber holds
//! - **RPC**: per-client connections translating wire messages to hub calls
//!
//! ## Example
//!
//! ```ignore
//! use oplog_subs::{ChangeFeed, FeedConfig, SubscribeRequest};
//! use oplog_subs::source::memory::MemoryDatabase;
//!
//! let db = MemoryDatabase::new();
//! let feed = ChangeFeed::new(Arc::new(db.oplog.clone()), db.documents.clone(), FeedConfig::default())?;
//! feed.start()?;
//!
//! let handle = feed.subscribe(
//!     SubscribeRequest::new("heavy-cats")
//!         .namespace("*.cats")
//!         .query(json!({"weighs": {"$gt": 40}})),
//! )?;
//!
//! db.insert("test.cats", json!({"_id": "tom", "weighs": 41}))?;
//! let event = handle.recv()?;
//! ```

pub mod config;
pub mod enricher;
pub mod error;
pub mod feed;
pub mod namespace;
pub mod query;
pub mod retry;
pub mod rpc;
pub mod source;
pub mod subscriptions;
pub mod tailer;
pub mod types;

// Re-exports
pub use config::{
    DuplicateTagPolicy, EnrichOrdering, EnricherConfig, FeedConfig, HubConfig, RetryConfig,
    TailerConfig,
};
pub use enricher::{DetailEnricher, EnricherStats, EnricherTask};
pub use error::{FeedError, Result};
pub use feed::{ChangeFeed, FeedStats};
pub use namespace::NamespacePattern;
pub use query::{CompiledFilter, QuerySpec};
pub use retry::RetryPolicy;
pub use rpc::{ChannelSink, Connection, Inbound, Outbound, OutboundSink, WireFormat};
pub use source::{CursorRead, DocumentStore, LogCursor, LogSource};
pub use subscriptions::{
    DropReason, FanoutHub, FeedEvent, HubStats, SubscribeRequest, SubscriptionHandle,
    SubscriptionId, SubscriptionTag,
};
pub use tailer::{OplogTailer, TailerSignal, TailerStats};
pub use types::*;
