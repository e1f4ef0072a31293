//! Declarative document-query filters.
//!
//! A query is a JSON object mapping dot-separated field paths to either a
//! literal (equality) or an operator object using `$gt`, `$gte`, `$lt`, `$lte`,
//! `$ne`, `$in`, `$nin` and `$exists`. All operators on one path and all paths
//! in one query must pass. The empty query matches every document.
//!
//! Queries are compiled once at subscribe time so that bad queries are
//! rejected before they reach the routing path.
//!
//! # Example
//!
//! ```ignore
//! let filter = CompiledFilter::compile(&json!({
//!     "name": "tom",
//!     "weighs": {"$gt": 40, "$lt": 45},
//!     "tasks.chase.failed": true,
//! }))?;
//!
//! assert!(filter.matches(&json!({
//!     "name": "tom",
//!     "weighs": 41,
//!     "tasks": [{"chase": {"passed": true}}, {"chase": {"failed": true}}],
//! })));
//! ```

mod operator;
mod path;

pub use operator::{compare, is_truthy, values_equal, Operator};
pub use path::FieldPath;

use crate::error::{FeedError, Result};
use crate::types::Document;
use serde_json::Value;

/// The raw, uncompiled query object.
pub type QuerySpec = Value;

/// All conditions attached to one field path.
#[derive(Clone, Debug)]
struct FieldCondition {
    path: FieldPath,
    operators: Vec<Operator>,
}

impl FieldCondition {
    fn matches(&self, document: &Document) -> bool {
        self.path
            .any_match(document, |actual| self.operators.iter().all(|op| op.evaluate(actual)))
    }
}

/// A compiled query. Immutable; share it by reference or `Arc`.
#[derive(Clone, Debug, Default)]
pub struct CompiledFilter {
    conditions: Vec<FieldCondition>,
}

impl CompiledFilter {
    /// The filter that accepts every document.
    pub fn none() -> Self {
        Self::default()
    }

    /// Compile a query object. `null` and `{}` compile to the match-all filter.
    pub fn compile(query: &QuerySpec) -> Result<Self> {
        let fields = match query {
            Value::Null => return Ok(Self::none()),
            Value::Object(fields) => fields,
            other => {
                return Err(FeedError::InvalidQuery(format!(
                    "query must be an object, got {}",
                    other
                )))
            }
        };

        let mut conditions = Vec::with_capacity(fields.len());
        for (raw_path, condition) in fields {
            if raw_path.starts_with('$') {
                return Err(FeedError::UnsupportedOperator(raw_path.clone()));
            }
            conditions.push(FieldCondition {
                path: FieldPath::parse(raw_path)?,
                operators: Operator::parse_condition(raw_path, condition)?,
            });
        }

        Ok(Self { conditions })
    }

    /// Compile an optional query; `None` matches everything.
    pub fn compile_opt(query: Option<&QuerySpec>) -> Result<Self> {
        match query {
            Some(query) => Self::compile(query),
            None => Ok(Self::none()),
        }
    }

    /// Whether the document satisfies every field condition.
    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(document))
    }

    pub fn is_match_all(&self) -> bool {
        self.conditions.is_empty()
    }
}
