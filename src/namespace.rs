//! Glob-style namespace patterns.
//!
//! `*` matches any run of characters (including none). Matching is
//! case-insensitive and anchored at both ends, so `*.users` matches
//! `test.users` and `TEST.Users` but not `test.users_archive`.

use crate::error::{FeedError, Result};
use regex::{Regex, RegexBuilder};
use std::fmt;

/// A compiled namespace pattern. Immutable after compile and cheap to share.
#[derive(Clone)]
pub struct NamespacePattern {
    source: String,
    /// `None` for the match-all pattern.
    regex: Option<Regex>,
}

impl NamespacePattern {
    /// Compile a pattern. An empty pattern is treated as `*`.
    pub fn compile(pattern: &str) -> Result<Self> {
        let source = if pattern.is_empty() { "*" } else { pattern };
        if source.chars().all(|c| c == '*') {
            return Ok(Self::any());
        }

        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = RegexBuilder::new(&format!("^{}$", body))
            .case_insensitive(true)
            .build()
            .map_err(|e| FeedError::InvalidPattern(format!("{}: {}", source, e)))?;

        Ok(Self {
            source: source.to_string(),
            regex: Some(regex),
        })
    }

    /// Compile an optional pattern; `None` matches every namespace.
    pub fn compile_opt(pattern: Option<&str>) -> Result<Self> {
        Self::compile(pattern.unwrap_or("*"))
    }

    /// Pattern that accepts every namespace.
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            regex: None,
        }
    }

    pub fn matches(&self, namespace: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(namespace),
            None => true,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match_all(&self) -> bool {
        self.regex.is_none()
    }
}

impl Default for NamespacePattern {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Debug for NamespacePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NamespacePattern({})", self.source)
    }
}
