//! In-process store with per-key expiry.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::{glob_match, literal_prefix, Store, StoreError};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: f64,
}

/// A [`Store`] held in memory.
///
/// Keys are kept ordered so a pattern's literal prefix narrows the scan to a
/// key range. Expired keys are invisible to reads and are dropped the next
/// time a listing touches them, or by [`MemoryStore::purge_expired`].
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a store driven by wall-clock time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that reads time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    /// Read the value of a live key.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now();
        self.entries
            .read()
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
    }

    /// Remove every expired key, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    /// Number of keys held, including expired keys not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        ttl_secs: u64,
        value: &[u8],
    ) -> Result<(), StoreError> {
        let expires_at = self.clock.now() + ttl_secs as f64;
        self.entries.write().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let prefix = literal_prefix(pattern);

        let mut live = Vec::new();
        let mut expired = Vec::new();
        {
            let entries = self.entries.read();
            let range = entries
                .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(&prefix));

            for (key, entry) in range {
                if !glob_match(pattern, key) {
                    continue;
                }
                if entry.expires_at > now {
                    live.push(key.clone());
                } else {
                    expired.push(key.clone());
                }
            }
        }

        if !expired.is_empty() {
            let mut entries = self.entries.write();
            for key in &expired {
                if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                    entries.remove(key);
                }
            }
            trace!(pattern = %pattern, dropped = expired.len(), "Dropped expired keys");
        }

        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store_at(start: f64) -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(start));
        let store = MemoryStore::with_clock(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_set_and_list() {
        let (_clock, store) = store_at(1000.0);
        store.set_with_expiry("rl/a/default/1000.000000", 60, b"").await.unwrap();
        store.set_with_expiry("rl/a/default/1001.000000", 60, b"").await.unwrap();
        store.set_with_expiry("rl/b/default/1001.000000", 60, b"").await.unwrap();

        let mut keys = store.list_keys_matching("rl/a/default/*").await.unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec!["rl/a/default/1000.000000", "rl/a/default/1001.000000"]
        );
    }

    #[tokio::test]
    async fn test_keys_expire() {
        let (clock, store) = store_at(1000.0);
        store.set_with_expiry("k/1", 10, b"v").await.unwrap();
        assert_eq!(store.get("k/1"), Some(b"v".to_vec()));

        clock.advance(10.0);
        assert_eq!(store.get("k/1"), None);
        assert!(store.list_keys_matching("k/*").await.unwrap().is_empty());
        // The listing dropped the expired key.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, store) = store_at(0.0);
        store.set_with_expiry("a", 5, b"").await.unwrap();
        store.set_with_expiry("b", 50, b"").await.unwrap();

        clock.advance(6.0);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_ttl() {
        let (clock, store) = store_at(0.0);
        store.set_with_expiry("a", 5, b"").await.unwrap();
        clock.advance(4.0);
        store.set_with_expiry("a", 5, b"").await.unwrap();
        clock.advance(4.0);
        assert_eq!(store.list_keys_matching("a").await.unwrap(), vec!["a"]);
    }
}
