//! Core types for the change feed.

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A document as carried by the operation log and the document store.
pub type Document = serde_json::Value;

/// Ordered position in the operation log (the log's timestamp token).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Position(pub u64);

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos({})", self.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Position {
    pub fn next(self) -> Self {
        Position(self.0 + 1)
    }
}

/// Kind of write recorded by a log entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Insert,
    Update,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully qualified collection name, `"db.collection"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub String);

impl Namespace {
    pub fn new(ns: impl Into<String>) -> Self {
        Namespace(ns.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Namespace(s.to_string())
    }
}

/// Identifier of the document affected by a log entry.
///
/// Identifiers arrive as arbitrary JSON values (strings, numbers, `{"$oid": ..}`);
/// they are normalized to a string key so they can be hashed and compared.
/// String ids keep their raw content, everything else uses its compact JSON form.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    /// Normalize a raw identifier value.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => DocumentId(s.clone()),
            other => DocumentId(other.to_string()),
        }
    }

    /// Read the `_id` field of a document, if present.
    pub fn of_document(document: &Document) -> Option<Self> {
        document.get("_id").map(Self::from_value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

/// A single entry read from the operation log. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// What kind of write this is.
    pub op: OpKind,

    /// Collection the write touched.
    pub namespace: Namespace,

    /// Position of the entry in the log.
    pub position: Position,

    /// Document affected by the write.
    pub document_id: DocumentId,

    /// The full document for inserts and deletes, the change delta for updates.
    pub payload: Document,
}

impl LogEntry {
    /// Fails with `InvalidDocument` when the document has no `_id`.
    pub fn insert(namespace: impl Into<Namespace>, position: Position, document: Document) -> Result<Self> {
        Self::with_document(OpKind::Insert, namespace.into(), position, document)
    }

    /// Fails with `InvalidDocument` when the document has no `_id`.
    pub fn delete(namespace: impl Into<Namespace>, position: Position, document: Document) -> Result<Self> {
        Self::with_document(OpKind::Delete, namespace.into(), position, document)
    }

    pub fn update(
        namespace: impl Into<Namespace>,
        position: Position,
        document_id: DocumentId,
        delta: Document,
    ) -> Self {
        Self {
            op: OpKind::Update,
            namespace: namespace.into(),
            position,
            document_id,
            payload: delta,
        }
    }

    fn with_document(
        op: OpKind,
        namespace: Namespace,
        position: Position,
        document: Document,
    ) -> Result<Self> {
        let document_id = DocumentId::of_document(&document).ok_or_else(|| {
            FeedError::InvalidDocument(format!("{} in {} without _id", op, namespace))
        })?;
        Ok(Self {
            op,
            namespace,
            position,
            document_id,
            payload: document,
        })
    }

    /// The full document carried by inserts and deletes. Updates only carry a delta.
    pub fn full_document(&self) -> Option<&Document> {
        match self.op {
            OpKind::Insert | OpKind::Delete => Some(&self.payload),
            OpKind::Update => None,
        }
    }
}

/// A log entry after the update-enrichment stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEntry {
    pub entry: LogEntry,

    /// Current document for update entries. `None` for other kinds, or when
    /// the lookup failed.
    pub current_document: Option<Document>,
}

impl EnrichedEntry {
    /// Wrap an entry that needs no enrichment.
    pub fn passthrough(entry: LogEntry) -> Self {
        Self {
            entry,
            current_document: None,
        }
    }

    pub fn enriched(entry: LogEntry, current_document: Option<Document>) -> Self {
        Self {
            entry,
            current_document,
        }
    }

    /// The document subscription filters are evaluated against: the inserted or
    /// deleted document, or the looked-up current document for updates.
    pub fn routed_document(&self) -> Option<&Document> {
        match self.entry.op {
            OpKind::Update => self.current_document.as_ref(),
            _ => self.entry.full_document(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_id_normalization() {
        assert_eq!(DocumentId::from_value(&json!("abc")), DocumentId::from("abc"));
        assert_eq!(DocumentId::from_value(&json!(42)), DocumentId::from("42"));
        assert_eq!(
            DocumentId::from_value(&json!({"$oid": "5f"})),
            DocumentId::from(r#"{"$oid":"5f"}"#)
        );
    }

    #[test]
    fn test_routed_document() {
        let insert = LogEntry::insert("db.c", Position(1), json!({"_id": 1, "a": 1})).unwrap();
        assert_eq!(insert.document_id, DocumentId::from("1"));
        let enriched = EnrichedEntry::passthrough(insert);
        assert_eq!(enriched.routed_document(), Some(&json!({"_id": 1, "a": 1})));

        let update = LogEntry::update("db.c", Position(2), DocumentId::from("1"), json!({"$set": {"a": 2}}));
        assert!(EnrichedEntry::passthrough(update.clone()).routed_document().is_none());
        let enriched = EnrichedEntry::enriched(update, Some(json!({"_id": 1, "a": 2})));
        assert_eq!(enriched.routed_document(), Some(&json!({"_id": 1, "a": 2})));
    }

    #[test]
    fn test_document_without_id_is_rejected() {
        let insert = LogEntry::insert("db.c", Position(1), json!({"a": 1}));
        assert!(matches!(insert, Err(FeedError::InvalidDocument(_))));

        let delete = LogEntry::delete("db.c", Position(2), json!({"a": 1}));
        assert!(matches!(delete, Err(FeedError::InvalidDocument(_))));
    }
}
