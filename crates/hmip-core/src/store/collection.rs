// ── Generic reactive entity collection ──
//
// Concurrent storage with O(1) lookups and push-based change
// notification via `watch` channels.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

/// A reactive collection for a single entity type, keyed by id.
///
/// Every mutation rebuilds the snapshot that subscribers receive. The
/// snapshot is sorted by key so consumers see a stable order.
pub(crate) struct EntityCollection<T: Send + Sync + 'static> {
    by_key: DashMap<String, Arc<T>>,
    snapshot: watch::Sender<Arc<Vec<Arc<T>>>>,
}

impl<T: Send + Sync + 'static> EntityCollection<T> {
    pub(crate) fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_key: DashMap::new(),
            snapshot,
        }
    }

    /// Insert or replace an entity. Returns `true` if the key was new.
    pub(crate) fn upsert(&self, key: String, entity: T) -> bool {
        let is_new = self.by_key.insert(key, Arc::new(entity)).is_none();
        self.rebuild_snapshot();
        is_new
    }

    /// Read-modify-write one entry under its shard lock.
    ///
    /// `init` builds the starting value when the key is absent. Returns the
    /// stored result.
    pub(crate) fn update_or_insert(
        &self,
        key: &str,
        init: impl FnOnce() -> T,
        apply: impl FnOnce(&mut T),
    ) -> Arc<T>
    where
        T: Clone,
    {
        let stored = {
            let mut entry = self
                .by_key
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(init()));
            let mut next = T::clone(&entry);
            apply(&mut next);
            let next = Arc::new(next);
            *entry = Arc::clone(&next);
            next
        };
        // Shard guard must be released before iterating for the snapshot.
        self.rebuild_snapshot();
        stored
    }

    /// Remove an entity by key. Returns the removed entity if it existed.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<T>> {
        let removed = self.by_key.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
        }
        removed
    }

    pub(crate) fn get(&self, key: &str) -> Option<Arc<T>> {
        self.by_key.get(key).map(|r| Arc::clone(r.value()))
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Upsert all incoming entities, then prune keys not in the incoming
    /// set. Avoids the brief empty state a clear-then-insert would cause.
    pub(crate) fn replace_all(&self, items: impl IntoIterator<Item = (String, T)>) {
        let mut incoming = HashSet::new();
        for (key, entity) in items {
            incoming.insert(key.clone());
            self.by_key.insert(key, Arc::new(entity));
        }
        self.by_key.retain(|key, _| incoming.contains(key));
        self.rebuild_snapshot();
    }

    /// Get the current snapshot (cheap `Arc` clone).
    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to snapshot changes via a `watch::Receiver`.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<T>>>> {
        self.snapshot.subscribe()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Key/value pairs, cheap `Arc` clones.
    pub(crate) fn entries(&self) -> Vec<(String, Arc<T>)> {
        self.by_key
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut entries = self.entries();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let values: Vec<Arc<T>> = entries.into_iter().map(|(_, v)| v).collect();
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
