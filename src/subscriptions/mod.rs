//! Subscription registry and fan-out for enriched log entries.
//!
//! Each subscription pairs a namespace pattern with a compiled query filter.
//! For every routed entry, a subscription whose pattern accepts the namespace
//! evaluates its filter against the entry's document:
//! - match: an `Insert`/`Update`/`Delete` event, and the document id is
//!   remembered as observed (deletes forget it)
//! - no match, but the id was observed: one `FilterExited` event, and the id
//!   is forgotten
//! - otherwise nothing
//!
//! Events are delivered through a bounded channel per subscription; a
//! subscriber that falls behind is dropped rather than stalling routing.
//!
//! # Example
//!
//! ```ignore
//! let hub = FanoutHub::default();
//!
//! let handle = hub.subscribe(
//!     SubscribeRequest::new("heavy-cats")
//!         .namespace("*.cats")
//!         .query(json!({"weighs": {"$gt": 40}})),
//! )?;
//!
//! loop {
//!     match handle.recv() {
//!         Ok(FeedEvent::Insert { document }) => println!("new: {}", document),
//!         Ok(FeedEvent::FilterExited { document }) => println!("gone: {}", document),
//!         Ok(FeedEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::FanoutHub;
pub use types::{
    DropReason, FeedEvent, HubStats, SubscribeRequest, SubscriptionHandle, SubscriptionId,
    SubscriptionTag,
};
