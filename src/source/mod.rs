//! Interfaces to the database the change feed reads from.
//!
//! The feed never talks to a database directly. A [`LogSource`] provides the
//! operation log (current tail + live cursors), a [`DocumentStore`] provides
//! single-document reads for update enrichment. Connecting is the adapter's
//! own business and happens when the adapter is constructed.
//!
//! [`memory`] holds in-process implementations used by tests, benchmarks and
//! embedders that feed the log themselves.

pub mod memory;

use crate::error::Result;
use crate::types::{Document, DocumentId, LogEntry, Namespace, Position};
use std::time::Duration;

/// Outcome of a single cursor read.
#[derive(Clone, Debug, PartialEq)]
pub enum CursorRead {
    /// The next entry in the log.
    Entry(LogEntry),
    /// Nothing arrived within the wait. The cursor is still live.
    Idle,
    /// The cursor is dead and will never yield again.
    Exhausted,
}

/// The operation log.
pub trait LogSource: Send + Sync + 'static {
    /// Position of the newest entry currently in the log, optionally
    /// restricted to one namespace. An empty log reports `Position::default()`.
    fn current_position(&self, namespace: Option<&str>) -> Result<Position>;

    /// Open a live cursor over entries strictly after `after`.
    fn open_cursor(&self, after: Position, namespace: Option<&str>) -> Result<Box<dyn LogCursor>>;
}

/// A live, blocking cursor over the operation log. Dropping it releases the
/// underlying resource.
pub trait LogCursor: Send {
    /// Read the next entry, blocking for at most `wait`.
    fn next_entry(&mut self, wait: Duration) -> Result<CursorRead>;
}

/// Single-document reads used to enrich update entries.
pub trait DocumentStore: Send + Sync + 'static {
    /// Read the current state of one document. `Ok(None)` when not found.
    fn read_one(&self, namespace: &Namespace, id: &DocumentId) -> Result<Option<Document>>;
}
