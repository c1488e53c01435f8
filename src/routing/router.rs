//! Routing table facade over the route tree and the near sets.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::trace;

use crate::common::{Activity, BitString, ChangeSet, Id, Node, RouterChangeSet};
use crate::routing::{NodeNearSet, RouteTree, TreeLayout};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
}

impl Side {
    fn of(base_id: &Id, id: &Id) -> Side {
        if id < base_id {
            Side::Before
        } else {
            Side::After
        }
    }
}

/// Kademlia routing table.
///
/// Nodes are routed into a [RouteTree], and mirrored into two
/// [NodeNearSet]s, one for ids numerically below the base id and one for
/// ids above it. The near sets remember the globally closest nodes even when
/// the bucket they belong to is full, so [Router::find] can return them.
#[derive(Debug, Clone)]
pub struct Router {
    base_id: Id,
    route_tree: RouteTree,
    before: NodeNearSet,
    after: NodeNearSet,
    /// Nodes currently held in a tree bucket, used to refill the near sets.
    active: BTreeMap<Id, Activity>,
    last_touch: Option<Instant>,
}

impl Router {
    /// Create a new [Router] around `base_id`.
    pub fn new<L: TreeLayout + ?Sized>(
        base_id: Id,
        layout: &L,
        near_set_size: usize,
    ) -> Result<Self> {
        Ok(Router {
            route_tree: RouteTree::new(base_id.clone(), layout)?,
            before: NodeNearSet::new(base_id.clone(), near_set_size),
            after: NodeNearSet::new(base_id.clone(), near_set_size),
            active: BTreeMap::new(),
            last_touch: None,
            base_id,
        })
    }

    // === Getters ===

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn base_id(&self) -> &Id {
        &self.base_id
    }

    /// Number of nodes in the route tree's buckets.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty() && self.before.is_empty() && self.after.is_empty()
    }

    pub fn dump_bucket_prefixes(&self) -> Vec<BitString> {
        self.route_tree.dump_bucket_prefixes()
    }

    pub fn dump_bucket(&self, prefix: &BitString) -> Result<Vec<Activity>> {
        self.route_tree.dump_bucket(prefix)
    }

    /// Both near sets, the lower one first.
    pub fn dump_near_set(&self) -> Vec<Activity> {
        let mut nodes = self.before.dump();
        nodes.extend(self.after.dump());
        nodes
    }

    pub fn stagnant_buckets(&self, older_than: Instant) -> Vec<BitString> {
        self.route_tree.stagnant_buckets(older_than)
    }

    // === Public Methods ===

    /// Record that `node` was seen at `time`.
    pub fn touch(&mut self, time: Instant, node: Node) -> Result<RouterChangeSet> {
        if self.last_touch.is_some_and(|last| time < last) {
            return Err(Error::BackwardTime);
        }
        self.validate(&node.id)?;

        // Reject before the tree is modified.
        match Side::of(&self.base_id, &node.id) {
            Side::Before => self.before.check_link(&node)?,
            Side::After => self.after.check_link(&node)?,
        }

        let route_tree = self.route_tree.touch(time, node.clone())?;
        self.last_touch = Some(time);

        let (mut before, mut after) = self.sync(&route_tree.kbucket.bucket)?;

        // Went to the cache or nowhere, it may still be one of the closest.
        let bucket = &route_tree.kbucket.bucket;
        if bucket.added().is_empty() && bucket.updated().is_empty() {
            match Side::of(&self.base_id, &node.id) {
                Side::Before => before = before.merge(self.before.touch(time, node)?),
                Side::After => after = after.merge(self.after.touch(time, node)?),
            }
        }

        trace!(context = "router_touch", prefix = %route_tree.prefix);

        Ok(RouterChangeSet {
            route_tree,
            before,
            after,
        })
    }

    /// Mark `node` as unresponsive.
    ///
    /// It is replaced right away if its bucket has a cached replacement,
    /// otherwise it stays findable until one shows up.
    pub fn stale(&mut self, node: &Node) -> Result<RouterChangeSet> {
        self.validate(&node.id)?;

        let route_tree = self.route_tree.stale(node)?;
        let (before, after) = self.sync(&route_tree.kbucket.bucket)?;

        Ok(RouterChangeSet {
            route_tree,
            before,
            after,
        })
    }

    /// Up to `max` known nodes closest to `target`, closest first.
    ///
    /// Never includes the base id.
    pub fn find(&self, target: &Id, max: usize, include_stale: bool) -> Result<Vec<Node>> {
        self.base_id.check_len(target)?;

        let mut candidates = self.route_tree.find(target, max, include_stale)?;
        candidates.extend(
            self.dump_near_set()
                .into_iter()
                .filter(|activity| include_stale || !self.route_tree.is_stale(activity.id())),
        );

        candidates.sort_by(|a, b| target.cmp_distance(a.id(), b.id()));
        candidates.dedup_by(|a, b| a.id() == b.id());

        Ok(candidates
            .into_iter()
            .filter(|activity| *activity.id() != self.base_id)
            .take(max)
            .map(|activity| activity.node)
            .collect())
    }

    /// Resize both near sets, refilling them from the route tree if they grow.
    pub fn resize_near_sets(&mut self, max_size: usize) -> (ChangeSet, ChangeSet) {
        let before = self.before.resize(max_size);
        let after = self.after.resize(max_size);

        let (filled_before, filled_after) = self.refill();

        (before.merge(filled_before), after.merge(filled_after))
    }

    // === Private Methods ===

    fn validate(&self, id: &Id) -> Result<()> {
        self.base_id.check_len(id)?;

        if *id == self.base_id {
            return Err(Error::BaseIdMatch(id.clone()));
        }

        Ok(())
    }

    /// Mirror bucket changes into the near sets.
    fn sync(&mut self, bucket: &ChangeSet) -> Result<(ChangeSet, ChangeSet)> {
        let mut before = ChangeSet::none();
        let mut after = ChangeSet::none();

        for activity in bucket.removed() {
            self.active.remove(activity.id());

            match Side::of(&self.base_id, activity.id()) {
                Side::Before => before = before.merge(self.before.remove(&activity.node)?),
                Side::After => after = after.merge(self.after.remove(&activity.node)?),
            }
        }

        for activity in bucket.added().iter().chain(bucket.updated()) {
            self.active
                .insert(activity.id().clone(), activity.clone());

            let (time, node) = (activity.time, activity.node.clone());
            match Side::of(&self.base_id, activity.id()) {
                Side::Before => before = before.merge(self.before.touch(time, node)?),
                Side::After => after = after.merge(self.after.touch(time, node)?),
            }
        }

        if !bucket.removed().is_empty() {
            let (filled_before, filled_after) = self.refill();
            before = before.merge(filled_before);
            after = after.merge(filled_after);
        }

        Ok((before, after))
    }

    /// Promote bucket nodes into near sets that have room.
    fn refill(&mut self) -> (ChangeSet, ChangeSet) {
        let base_id = &self.base_id;
        let active = &self.active;

        let candidates = |side: Side| {
            active
                .values()
                .filter(move |activity| Side::of(base_id, activity.id()) == side)
                .cloned()
        };

        (
            self.before.fill(candidates(Side::Before)),
            self.after.fill(candidates(Side::After)),
        )
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::routing::SimpleTreeLayout;

    fn id(bits: &str) -> Id {
        bits.parse().unwrap()
    }

    fn node(bits: &str) -> Node {
        Node::new(id(bits), bits)
    }

    fn router(near_set_size: usize) -> Router {
        Router::new(
            id("0100"),
            &SimpleTreeLayout::new(2, 2, 2).unwrap(),
            near_set_size,
        )
        .unwrap()
    }

    #[test]
    fn near_sets_split_around_base() {
        let mut router = router(2);
        let now = Instant::now();

        let changes = router.touch(now, node("0011")).unwrap();
        assert_eq!(changes.before.added().len(), 1);
        assert!(changes.after.is_empty());

        let changes = router.touch(now, node("0110")).unwrap();
        assert!(changes.before.is_empty());
        assert_eq!(changes.after.added().len(), 1);

        let near = router
            .dump_near_set()
            .iter()
            .map(|a| a.id().to_string())
            .collect::<Vec<_>>();
        assert_eq!(near, vec!["0011", "0110"]);
    }

    #[test]
    fn link_mismatch_leaves_router_untouched() {
        let mut router = router(2);
        let now = Instant::now();

        router.touch(now, node("1000")).unwrap();
        let imposter = Node::new(id("1000"), "elsewhere");

        assert!(matches!(
            router.touch(now + Duration::from_secs(1), imposter),
            Err(Error::LinkMismatch { .. })
        ));
        assert_eq!(router.find(&id("1000"), 10, true).unwrap(), vec![node("1000")]);
    }

    #[test]
    fn base_id_is_rejected() {
        let mut router = router(2);

        assert!(matches!(
            router.touch(Instant::now(), node("0100")),
            Err(Error::BaseIdMatch(_))
        ));
        assert!(matches!(
            router.stale(&node("0100")),
            Err(Error::BaseIdMatch(_))
        ));
        assert!(router.find(&id("0100"), 10, true).unwrap().is_empty());
    }

    #[test]
    fn touch_time_cannot_go_backwards() {
        let mut router = router(2);
        let now = Instant::now();

        router
            .touch(now + Duration::from_secs(1), node("1000"))
            .unwrap();

        assert!(matches!(
            router.touch(now, node("1001")),
            Err(Error::BackwardTime)
        ));
    }

    #[test]
    fn resize_near_sets_refills_from_buckets() {
        let mut router = router(1);
        let now = Instant::now();

        router.touch(now, node("0110")).unwrap();
        router.touch(now, node("0111")).unwrap();
        assert_eq!(router.dump_near_set().len(), 1);

        let (_, after) = router.resize_near_sets(2);

        assert_eq!(after.added().len(), 1);
        assert_eq!(router.dump_near_set().len(), 2);

        let (_, after) = router.resize_near_sets(0);
        assert_eq!(after.removed().len(), 2);
        assert!(router.dump_near_set().is_empty());
    }
}
