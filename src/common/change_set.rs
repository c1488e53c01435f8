//! Immutable records of what a mutating call changed.

use crate::common::{Activity, BitString};

/// Items added, removed and updated by one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<T = Activity> {
    added: Vec<T>,
    removed: Vec<T>,
    updated: Vec<T>,
}

impl<T> ChangeSet<T> {
    pub fn new(added: Vec<T>, removed: Vec<T>, updated: Vec<T>) -> Self {
        Self {
            added,
            removed,
            updated,
        }
    }

    /// Nothing changed.
    pub fn none() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn only_added(items: Vec<T>) -> Self {
        Self::new(items, Vec::new(), Vec::new())
    }

    pub fn only_removed(items: Vec<T>) -> Self {
        Self::new(Vec::new(), items, Vec::new())
    }

    pub fn only_updated(items: Vec<T>) -> Self {
        Self::new(Vec::new(), Vec::new(), items)
    }

    // === Getters ===

    pub fn added(&self) -> &[T] {
        &self.added
    }

    pub fn removed(&self) -> &[T] {
        &self.removed
    }

    pub fn updated(&self) -> &[T] {
        &self.updated
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }

    // === Public Methods ===

    /// Concatenate two change sets, `self` first.
    pub fn merge(mut self, other: ChangeSet<T>) -> Self {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.updated.extend(other.updated);
        self
    }
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self::none()
    }
}

/// Changes to a bucket's working set and to its replacement cache.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KBucketChangeSet {
    pub bucket: ChangeSet,
    pub cache: ChangeSet,
}

impl KBucketChangeSet {
    pub fn new(bucket: ChangeSet, cache: ChangeSet) -> Self {
        Self { bucket, cache }
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty() && self.cache.is_empty()
    }
}

/// Changes to the bucket with `prefix` inside a route tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTreeChangeSet {
    pub prefix: BitString,
    pub kbucket: KBucketChangeSet,
}

/// Changes a router applied to its route tree and to both near sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterChangeSet {
    pub route_tree: RouteTreeChangeSet,
    /// Near set of ids numerically lower than the base id.
    pub before: ChangeSet,
    /// Near set of ids numerically higher than the base id.
    pub after: ChangeSet,
}
