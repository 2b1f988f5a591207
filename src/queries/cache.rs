use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;

pub const CACHE_TTL: Duration = Duration::from_secs(30);

/// Identity of one cached query call: the query name plus its rendered
/// arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: &'static str,
    pub args: String,
}

impl CacheKey {
    pub fn new(query: &'static str, args: impl Into<String>) -> Self {
        Self {
            query,
            args: args.into(),
        }
    }
}

struct CacheEntry {
    inserted_at: Instant,
    value: Value,
}

/// Explicit time-to-live memoization for query results. Entries record
/// their insertion time and are evicted lazily on lookup once the TTL has
/// passed; nothing runs in the background.
pub struct TtlCache {
    ttl: Duration,
    entries: HashMap<CacheKey, CacheEntry>,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, key: CacheKey, value: Value) {
        self.entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                value,
            },
        );
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
