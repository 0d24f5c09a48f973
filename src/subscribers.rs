//! Concurrently-safe subscriber sets.

use std::sync::Arc;

use dashmap::DashMap;

/// A set of listeners keyed by plugin identity.
///
/// Backed by a sharded concurrent map, so registry notification threads can
/// add and remove members while an application thread iterates a dispatch.
/// Dispatch uses [`snapshot`](Self::snapshot): membership is copied out
/// first and callbacks run outside any shard lock, so a callback that
/// re-enters the set cannot deadlock. A mutation racing a snapshot may or
/// may not be observed by that dispatch; there is no ordering guarantee
/// between the two.
pub struct SubscriberSet<L: ?Sized> {
    entries: DashMap<String, Arc<L>>,
}

impl<L: ?Sized> SubscriberSet<L> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Add a listener under the given identity, replacing any previous
    /// listener with the same identity.
    pub fn insert(&self, id: impl Into<String>, listener: Arc<L>) {
        self.entries.insert(id.into(), listener);
    }

    /// Remove the listener with the given identity, if present.
    pub fn remove(&self, id: &str) -> Option<Arc<L>> {
        self.entries.remove(id).map(|(_, listener)| listener)
    }

    /// Whether a listener with the given identity is a member.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Copy the current membership out for iteration.
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.entries.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<L: ?Sized> Default for SubscriberSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for SubscriberSet<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.entries.len())
            .finish()
    }
}
