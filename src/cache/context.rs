//! Per-call scratch state.
//!
//! A [`CallContext`] lives for exactly one call and is threaded through the
//! engine explicitly — never stored in a global or task-local — so
//! concurrent calls cannot observe each other's state.

use std::collections::HashMap;

/// Ephemeral state for one pass through the decision engine.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Whether the call is still considered cacheable.
    pub cacheable: bool,
    /// The derived store key, once computed.
    pub key: Option<String>,
    /// The request path the call arrived on.
    pub path: String,
    /// Tags accumulated during handler execution, attached to the entry.
    pub tags: HashMap<String, String>,
}

impl CallContext {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            cacheable: true,
            key: None,
            path: path.into(),
            tags: HashMap::new(),
        }
    }

    /// Add a classification tag. Empty tag names are ignored.
    pub fn add_tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !name.is_empty() {
            self.tags.insert(name, value.into());
        }
    }
}

/// Tags a handler wants attached to the cached entry.
///
/// Handlers insert this into their response extensions; the cache layer
/// merges it into the call context before the entry is stored. This is the
/// explicit, request-scoped replacement for ambient per-call state.
#[derive(Debug, Clone, Default)]
pub struct CacheTags(pub HashMap<String, String>);

impl CacheTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}
