//! In-process operation log and document store.
//!
//! Both adapters support fault injection (failed reads, failed opens, killed
//! cursors, slow or failing lookups) so reconnect and enrichment behaviour can
//! be exercised without a database.

use super::{CursorRead, DocumentStore, LogCursor, LogSource};
use crate::error::{FeedError, Result};
use crate::types::{Document, DocumentId, LogEntry, Namespace, OpKind, Position};
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// --- Operation Log ---

#[derive(Default)]
struct OplogState {
    entries: Vec<LogEntry>,
    /// Bumped by `end_cursors`; cursors from an older generation are exhausted.
    generation: u64,
    failing_reads: u32,
    failing_opens: u32,
    cursor_starts: Vec<Position>,
    live_cursors: usize,
}

struct OplogShared {
    state: Mutex<OplogState>,
    appended: Condvar,
}

/// An append-only, in-memory operation log. Clones share the same log.
#[derive(Clone)]
pub struct MemoryOplog {
    shared: Arc<OplogShared>,
}

impl MemoryOplog {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(OplogShared {
                state: Mutex::new(OplogState::default()),
                appended: Condvar::new(),
            }),
        }
    }

    /// Append an entry built by the caller. Its position is replaced by the
    /// next position in the log.
    pub fn append(&self, mut entry: LogEntry) -> Position {
        let mut state = self.shared.state.lock();
        let position = state
            .entries
            .last()
            .map(|e| e.position.next())
            .unwrap_or(Position(1));
        entry.position = position;
        state.entries.push(entry);
        drop(state);
        self.shared.appended.notify_all();
        position
    }

    pub fn insert(&self, namespace: &str, document: Document) -> Result<Position> {
        Ok(self.append(LogEntry::insert(namespace, Position::default(), document)?))
    }

    pub fn update(&self, namespace: &str, id: DocumentId, delta: Document) -> Position {
        self.append(LogEntry::update(namespace, Position::default(), id, delta))
    }

    pub fn delete(&self, namespace: &str, document: Document) -> Result<Position> {
        Ok(self.append(LogEntry::delete(namespace, Position::default(), document)?))
    }

    /// Kill every open cursor; their next read reports `Exhausted`.
    pub fn end_cursors(&self) {
        self.shared.state.lock().generation += 1;
        self.shared.appended.notify_all();
    }

    /// Make the next `count` cursor reads fail with a transient error.
    pub fn fail_reads(&self, count: u32) {
        self.shared.state.lock().failing_reads += count;
        self.shared.appended.notify_all();
    }

    /// Make the next `count` tail lookups / cursor opens fail.
    pub fn fail_opens(&self, count: u32) {
        self.shared.state.lock().failing_opens += count;
    }

    /// Positions every cursor was opened after, in open order.
    pub fn cursor_starts(&self) -> Vec<Position> {
        self.shared.state.lock().cursor_starts.clone()
    }

    /// Cursors currently open (not yet dropped).
    pub fn live_cursors(&self) -> usize {
        self.shared.state.lock().live_cursors
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_open_failure(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(FeedError::TransientIo("log source unavailable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryOplog {
    fn default() -> Self {
        Self::new()
    }
}

fn namespace_matches(entry: &LogEntry, namespace: Option<&str>) -> bool {
    namespace.map_or(true, |ns| entry.namespace.as_str() == ns)
}

impl LogSource for MemoryOplog {
    fn current_position(&self, namespace: Option<&str>) -> Result<Position> {
        self.take_open_failure()?;
        let state = self.shared.state.lock();
        Ok(state
            .entries
            .iter()
            .rev()
            .find(|e| namespace_matches(e, namespace))
            .map(|e| e.position)
            .unwrap_or_default())
    }

    fn open_cursor(&self, after: Position, namespace: Option<&str>) -> Result<Box<dyn LogCursor>> {
        self.take_open_failure()?;
        let mut state = self.shared.state.lock();
        state.cursor_starts.push(after);
        state.live_cursors += 1;
        let generation = state.generation;
        drop(state);

        Ok(Box::new(MemoryCursor {
            shared: Arc::clone(&self.shared),
            after,
            namespace: namespace.map(str::to_string),
            generation,
        }))
    }
}

struct MemoryCursor {
    shared: Arc<OplogShared>,
    after: Position,
    namespace: Option<String>,
    generation: u64,
}

impl LogCursor for MemoryCursor {
    fn next_entry(&mut self, wait: Duration) -> Result<CursorRead> {
        let deadline = Instant::now() + wait;
        let mut state = self.shared.state.lock();

        loop {
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                return Err(FeedError::TransientIo("cursor read failed".into()));
            }
            if state.generation != self.generation {
                return Ok(CursorRead::Exhausted);
            }

            let start = state.entries.partition_point(|e| e.position <= self.after);
            let next = state.entries[start..]
                .iter()
                .find(|e| namespace_matches(e, self.namespace.as_deref()));
            if let Some(entry) = next {
                self.after = entry.position;
                return Ok(CursorRead::Entry(entry.clone()));
            }

            if self.shared.appended.wait_until(&mut state, deadline).timed_out() {
                return Ok(CursorRead::Idle);
            }
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.shared.state.lock().live_cursors -= 1;
    }
}

// --- Document Store ---

/// In-memory document store keyed by namespace and `_id`.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: RwLock<HashMap<(Namespace, DocumentId), Document>>,
    failing_reads: Mutex<u32>,
    delays: RwLock<HashMap<DocumentId, Duration>>,
    reads: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document under its `_id`.
    pub fn put(&self, namespace: &str, document: Document) -> Result<DocumentId> {
        let id = DocumentId::of_document(&document).ok_or_else(|| {
            FeedError::InvalidDocument(format!("document in {} has no _id", namespace))
        })?;
        self.documents
            .write()
            .insert((Namespace::from(namespace), id.clone()), document);
        Ok(id)
    }

    pub fn get(&self, namespace: &str, id: &DocumentId) -> Option<Document> {
        self.documents
            .read()
            .get(&(Namespace::from(namespace), id.clone()))
            .cloned()
    }

    pub fn remove(&self, namespace: &str, id: &DocumentId) -> Option<Document> {
        self.documents
            .write()
            .remove(&(Namespace::from(namespace), id.clone()))
    }

    /// Make the next `count` reads fail with a transient error.
    pub fn fail_reads(&self, count: u32) {
        *self.failing_reads.lock() += count;
    }

    /// Delay every read of `id` by `delay`.
    pub fn delay_reads(&self, id: DocumentId, delay: Duration) {
        self.delays.write().insert(id, delay);
    }

    /// Total reads served (including failed ones).
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn read_one(&self, namespace: &Namespace, id: &DocumentId) -> Result<Option<Document>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let delay = self.delays.read().get(id).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        {
            let mut failing = self.failing_reads.lock();
            if *failing > 0 {
                *failing -= 1;
                return Err(FeedError::TransientIo("document store unavailable".into()));
            }
        }

        Ok(self
            .documents
            .read()
            .get(&(namespace.clone(), id.clone()))
            .cloned())
    }
}

// --- Database ---

/// An operation log and a document store kept in step: every write updates
/// the stored document and appends the matching log entry.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    pub oplog: MemoryOplog,
    pub documents: Arc<MemoryDocumentStore>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, document: Document) -> Result<Position> {
        self.documents.put(namespace, document.clone())?;
        self.oplog.insert(namespace, document)
    }

    /// Set top-level fields on an existing document and log an update whose
    /// delta is `{"$set": fields}`.
    pub fn update(&self, namespace: &str, id: &DocumentId, fields: Document) -> Result<Position> {
        let Value::Object(changes) = &fields else {
            return Err(FeedError::InvalidDocument("update fields must be an object".into()));
        };

        let mut current = self
            .documents
            .get(namespace, id)
            .ok_or_else(|| FeedError::LookupFailure {
                namespace: namespace.to_string(),
                id: id.to_string(),
                reason: "not found".into(),
            })?;
        if let Value::Object(existing) = &mut current {
            for (key, value) in changes {
                existing.insert(key.clone(), value.clone());
            }
        }
        self.documents.put(namespace, current)?;

        let delta = serde_json::json!({ "$set": fields });
        Ok(self.oplog.update(namespace, id.clone(), delta))
    }

    pub fn delete(&self, namespace: &str, id: &DocumentId) -> Result<Position> {
        let document = self
            .documents
            .remove(namespace, id)
            .unwrap_or_else(|| serde_json::json!({ "_id": id.as_str() }));
        Ok(self.oplog.append(LogEntry {
            op: OpKind::Delete,
            namespace: Namespace::from(namespace),
            position: Position::default(),
            document_id: id.clone(),
            payload: document,
        }))
    }
}
