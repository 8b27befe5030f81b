// ── Generic reactive record collection ──
//
// Lock-free concurrent storage with O(1) lookups and push-based
// change notification via `watch` channels.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A lock-free, reactive collection for a single record type.
///
/// Every mutation rebuilds the snapshot that subscribers receive. The
/// snapshot is sorted by key so observers see a stable order.
pub(crate) struct Collection<K, T>
where
    K: Clone + Eq + Hash + Ord + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    by_key: DashMap<K, Arc<T>>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<K, T> Collection<K, T>
where
    K: Clone + Eq + Hash + Ord + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace a record. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: K, record: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(record)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Remove a record by key. Returns it if it existed.
    pub(crate) fn remove(&self, key: &K) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    /// Current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Upsert every incoming record, then prune keys that are not in the
    /// incoming set. Observers never see a transient empty collection.
    pub(crate) fn upsert_and_prune(&self, items: Vec<(K, T)>) {
        let incoming: HashSet<K> = items.iter().map(|(k, _)| k.clone()).collect();
        for (key, record) in items {
            self.by_key.insert(key, Arc::new(record));
        }
        self.by_key.retain(|k, _| incoming.contains(k));
        self.rebuild_snapshot();
    }

    fn rebuild_snapshot(&self) {
        let mut entries: Vec<(K, Arc<T>)> = self
            .by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
