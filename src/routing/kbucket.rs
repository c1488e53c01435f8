//! K-bucket with a replacement cache.

use std::collections::VecDeque;
use std::time::Instant;

use crate::common::{Activity, BitString, ChangeSet, Id, KBucketChangeSet, Node};
use crate::{Error, Result};

/// Kbuckets are similar to LRU caches that keep responsive nodes and only
/// evict unresponsive (stale) ones once a replacement is available.
///
/// The bucket holds at most `bucket_size` nodes, least recently seen first.
/// Nodes that arrive while it is full wait in the cache, most recently seen
/// first. A node id lives in at most one of the two.
#[derive(Debug, Clone)]
pub struct KBucket {
    base_id: Id,
    prefix: BitString,
    bucket: Vec<Activity>,
    bucket_size: usize,
    cache: VecDeque<Activity>,
    cache_size: usize,
    /// Ids in `bucket` that were marked stale, oldest mark first.
    stale: Vec<Id>,
    last_touch: Option<Instant>,
}

impl KBucket {
    pub fn new(
        base_id: Id,
        prefix: BitString,
        bucket_size: usize,
        cache_size: usize,
    ) -> Result<Self> {
        if prefix.bit_len() > base_id.bit_len() {
            return Err(Error::InvalidBitRange {
                offset: 0,
                count: prefix.bit_len(),
                bit_len: base_id.bit_len(),
            });
        }

        Ok(KBucket {
            base_id,
            prefix,
            bucket: Vec::with_capacity(bucket_size),
            bucket_size,
            cache: VecDeque::with_capacity(cache_size),
            cache_size,
            stale: Vec::new(),
            last_touch: None,
        })
    }

    // === Getters ===

    pub fn prefix(&self) -> &BitString {
        &self.prefix
    }

    /// Number of nodes in the bucket, excluding the cache.
    pub fn len(&self) -> usize {
        self.bucket.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.is_empty() && self.cache.is_empty()
    }

    pub fn is_stale(&self, id: &Id) -> bool {
        self.stale.contains(id)
    }

    /// Time of the most recent activity in the bucket (not the cache).
    pub fn latest_bucket_activity(&self) -> Option<Instant> {
        self.bucket.iter().map(|activity| activity.time).max()
    }

    /// Nodes in the bucket, least recently seen first.
    pub fn dump_bucket(&self, include_stale: bool) -> Vec<Activity> {
        self.bucket
            .iter()
            .filter(|activity| include_stale || !self.is_stale(activity.id()))
            .cloned()
            .collect()
    }

    /// Nodes in the cache, most recently seen first.
    pub fn dump_cache(&self) -> Vec<Activity> {
        self.cache.iter().cloned().collect()
    }

    // === Public Methods ===

    pub fn touch(&mut self, time: Instant, node: Node) -> Result<KBucketChangeSet> {
        self.validate(&node)?;
        if self.last_touch.is_some_and(|last| time < last) {
            return Err(Error::BackwardTime);
        }
        self.check_link(&node)?;
        self.last_touch = Some(time);

        // Already in the bucket, refresh it and clear any stale mark.
        if let Some(index) = self.bucket_position(&node.id) {
            self.bucket.remove(index);
            let activity = Activity::new(node, time);
            self.bucket.push(activity.clone());
            self.stale.retain(|id| id != activity.id());

            return Ok(KBucketChangeSet::new(
                ChangeSet::only_updated(vec![activity]),
                ChangeSet::none(),
            ));
        }

        if self.bucket.len() < self.bucket_size {
            let mut cache_changes = ChangeSet::none();
            if let Some(index) = self.cache_position(&node.id) {
                if let Some(cached) = self.cache.remove(index) {
                    cache_changes = ChangeSet::only_removed(vec![cached]);
                }
            }

            let activity = Activity::new(node, time);
            self.bucket.push(activity.clone());

            return Ok(KBucketChangeSet::new(
                ChangeSet::only_added(vec![activity]),
                cache_changes,
            ));
        }

        let cache_changes = self.touch_cache(Activity::new(node, time));

        // A stale node is only kept while nothing can replace it.
        if let Some((removed, added)) = self.replace_oldest_stale() {
            return Ok(KBucketChangeSet::new(
                ChangeSet::new(vec![added], vec![removed], Vec::new()),
                ChangeSet::none(),
            ));
        }

        Ok(KBucketChangeSet::new(ChangeSet::none(), cache_changes))
    }

    /// Mark a node in the bucket as stale.
    ///
    /// The oldest stale node is replaced right away if the cache has a
    /// candidate, otherwise the node stays in the bucket until one arrives.
    pub fn stale(&mut self, node: &Node) -> Result<KBucketChangeSet> {
        self.validate(node)?;

        let index = self
            .bucket_position(&node.id)
            .ok_or_else(|| Error::NodeNotFound(node.id.clone()))?;
        if let Some(existing) = self.bucket.get(index) {
            existing.node.check_link(node)?;
        }

        if !self.is_stale(&node.id) {
            self.stale.push(node.id.clone());
        }

        match self.replace_oldest_stale() {
            Some((removed, added)) => Ok(KBucketChangeSet::new(
                ChangeSet::new(vec![added.clone()], vec![removed], Vec::new()),
                ChangeSet::only_removed(vec![added]),
            )),
            None => Ok(KBucketChangeSet::default()),
        }
    }

    // === Private Methods ===

    fn validate(&self, node: &Node) -> Result<()> {
        self.base_id.check_len(&node.id)?;

        if node.id == self.base_id {
            return Err(Error::BaseIdMatch(node.id.clone()));
        }
        if !node.id.starts_with(&self.prefix) {
            return Err(Error::IdPrefixMismatch {
                prefix: self.prefix.clone(),
                id: node.id.clone(),
            });
        }

        Ok(())
    }

    fn check_link(&self, node: &Node) -> Result<()> {
        self.bucket
            .iter()
            .chain(self.cache.iter())
            .try_for_each(|activity| activity.node.check_link(node))
    }

    fn bucket_position(&self, id: &Id) -> Option<usize> {
        self.bucket.iter().position(|activity| activity.id() == id)
    }

    fn cache_position(&self, id: &Id) -> Option<usize> {
        self.cache.iter().position(|activity| activity.id() == id)
    }

    fn touch_cache(&mut self, activity: Activity) -> ChangeSet {
        if self.cache_size == 0 {
            return ChangeSet::none();
        }

        if let Some(index) = self.cache_position(activity.id()) {
            self.cache.remove(index);
            self.cache.push_front(activity.clone());

            return ChangeSet::only_updated(vec![activity]);
        }

        self.cache.push_front(activity.clone());

        let mut removed = Vec::new();
        while self.cache.len() > self.cache_size {
            if let Some(evicted) = self.cache.pop_back() {
                removed.push(evicted);
            }
        }

        ChangeSet::new(vec![activity], removed, Vec::new())
    }

    /// Swap the oldest stale node for the most recent cache entry.
    ///
    /// Returns `(removed, added)`.
    fn replace_oldest_stale(&mut self) -> Option<(Activity, Activity)> {
        let stale_id = self.stale.first()?.clone();
        let index = self.bucket_position(&stale_id)?;
        let replacement = self.cache.pop_front()?;

        self.stale.remove(0);
        let removed = self.bucket.remove(index);
        self.bucket.push(replacement.clone());

        Some((removed, replacement))
    }
}
