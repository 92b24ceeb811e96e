//! Cross-call memory for one bound instance.
//!
//! Operations marked with a memorize label store their serialized result
//! here after a successful call. Every later call sees a snapshot of the
//! store in its request descriptor and prompt context.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;

/// A point-in-time copy of the memory store, ordered by label.
pub type MemorySnapshot = BTreeMap<String, Value>;

/// Thread-safe label→value map. Last writer wins.
///
/// Writes only happen from the dispatcher on successful memorizing calls;
/// callers get read access through [`recall`](Self::recall) and
/// [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `label`, returning the value it replaced.
    pub(crate) fn remember(&self, label: &str, value: Value) -> Option<Value> {
        self.entries.insert(label.to_string(), value)
    }

    /// The value currently stored under `label`.
    pub fn recall(&self, label: &str) -> Option<Value> {
        self.entries.get(label).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    /// Copy the whole store.
    pub fn snapshot(&self) -> MemorySnapshot {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
