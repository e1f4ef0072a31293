//! Dot-path traversal with existential array drill-down.

use crate::error::{FeedError, Result};
use serde_json::Value;
use std::fmt;

/// A dot-separated field path such as `tasks.chase.failed`.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a path. Empty segments and purely numeric segments (positional
    /// array access) are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();

        for segment in &segments {
            if segment.is_empty() {
                return Err(FeedError::UnsupportedQueryPath(format!(
                    "empty segment in '{}'",
                    raw
                )));
            }
            if segment.chars().all(|c| c.is_ascii_digit()) {
                return Err(FeedError::UnsupportedQueryPath(format!(
                    "index '{}' in '{}' (positional access is not supported)",
                    segment, raw
                )));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Resolve the path against `document` and test each candidate value.
    ///
    /// Whenever the current value is an array and segments remain, every
    /// element is resolved against the remaining segments and the path is
    /// satisfied if any element satisfies `predicate`. A missing field yields
    /// `None`, which the predicate still sees. An empty array yields no
    /// candidates at all.
    pub fn any_match<F>(&self, document: &Value, predicate: F) -> bool
    where
        F: Fn(Option<&Value>) -> bool,
    {
        resolve(Some(document), &self.segments, &predicate)
    }
}

fn resolve<F>(current: Option<&Value>, segments: &[String], predicate: &F) -> bool
where
    F: Fn(Option<&Value>) -> bool,
{
    let Some((head, rest)) = segments.split_first() else {
        return predicate(current);
    };

    match current {
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| resolve(Some(item), segments, predicate)),
        Some(Value::Object(fields)) => resolve(fields.get(head.as_str()), rest, predicate),
        _ => predicate(None),
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({})", self.raw)
    }
}
