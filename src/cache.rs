// LRU-bounded query cache: query text → compiled query.

use indexmap::IndexMap;
use tracing::trace;

use crate::CompiledQuery;

/// A bounded map from query text to its compiled form, in recency order
/// (least-recently used first).
///
/// Compiled queries are immutable, so a returned reference is safe to clone
/// and use however long the caller likes. The cache itself is not shareable
/// across threads (`CompiledQuery` is deliberately `!Send`); callers that
/// want cross-thread reuse re-compile per thread.
pub struct QueryCache {
    capacity: usize,
    entries: IndexMap<String, CompiledQuery>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        QueryCache {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    /// Point-in-time read. A hit moves the key to the most-recent end.
    pub fn get(&mut self, query: &str) -> Option<&CompiledQuery> {
        let i = self.entries.get_index_of(query)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(i, last);
        trace!(query, "query cache hit");
        self.entries.get(query)
    }

    /// Add a compiled query. Re-adding an existing query only refreshes its
    /// recency; on overflow the least-recently used entry is dropped.
    pub fn insert(&mut self, query: &str, compiled: CompiledQuery) {
        if let Some(i) = self.entries.get_index_of(query) {
            let last = self.entries.len() - 1;
            self.entries.move_index(i, last);
            return;
        }
        if self.entries.len() >= self.capacity {
            if let Some((evicted, _)) = self.entries.shift_remove_index(0) {
                trace!(query = evicted.as_str(), "query cache eviction");
            }
        }
        self.entries.insert(query.to_string(), compiled);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
