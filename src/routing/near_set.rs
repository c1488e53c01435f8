//! Bounded set of the nodes closest to the base id.

use std::time::Instant;

use crate::common::{Activity, ChangeSet, Id, Node};
use crate::Result;

/// The `max_size` closest known nodes to a base id, regardless of which
/// bucket they would fall into.
///
/// Kept sorted by XOR distance to the base id, closest first.
#[derive(Debug, Clone)]
pub struct NodeNearSet {
    base_id: Id,
    max_size: usize,
    nodes: Vec<Activity>,
}

impl NodeNearSet {
    pub fn new(base_id: Id, max_size: usize) -> Self {
        NodeNearSet {
            base_id,
            max_size,
            nodes: Vec::with_capacity(max_size),
        }
    }

    // === Getters ===

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.position(id).is_ok()
    }

    /// Tracked nodes, closest to the base id first.
    pub fn dump(&self) -> Vec<Activity> {
        self.nodes.clone()
    }

    // === Public Methods ===

    /// Error if `node`'s id is tracked under another link.
    pub fn check_link(&self, node: &Node) -> Result<()> {
        self.base_id.check_len(&node.id)?;

        match self.position(&node.id) {
            Ok(index) => match self.nodes.get(index) {
                Some(existing) => existing.node.check_link(node),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }

    pub fn touch(&mut self, time: Instant, node: Node) -> Result<ChangeSet> {
        self.check_link(&node)?;

        if self.max_size == 0 {
            return Ok(ChangeSet::none());
        }

        let activity = Activity::new(node, time);

        match self.position(activity.id()) {
            Ok(index) => {
                if let Some(existing) = self.nodes.get_mut(index) {
                    existing.time = time;
                }
                Ok(ChangeSet::only_updated(vec![activity]))
            }
            Err(index) => {
                if index >= self.max_size {
                    // Farther than everything in a full set.
                    return Ok(ChangeSet::none());
                }

                self.nodes.insert(index, activity.clone());
                let removed = self.trim();

                Ok(ChangeSet::new(vec![activity], removed, Vec::new()))
            }
        }
    }

    /// Drop `node` if tracked. Not tracked is not an error.
    pub fn remove(&mut self, node: &Node) -> Result<ChangeSet> {
        self.check_link(node)?;

        match self.position(&node.id) {
            Ok(index) => Ok(ChangeSet::only_removed(vec![self.nodes.remove(index)])),
            Err(_) => Ok(ChangeSet::none()),
        }
    }

    /// Change the capacity, dropping the farthest nodes if it shrinks.
    pub fn resize(&mut self, max_size: usize) -> ChangeSet {
        self.max_size = max_size;

        ChangeSet::only_removed(self.trim())
    }

    /// Top up a set that is under capacity with the closest of `candidates`.
    ///
    /// Candidates already tracked, of the wrong length, or with a conflicting
    /// link are skipped.
    pub fn fill(&mut self, candidates: impl IntoIterator<Item = Activity>) -> ChangeSet {
        let mut candidates = candidates
            .into_iter()
            .filter(|candidate| {
                !self.contains(candidate.id()) && self.check_link(&candidate.node).is_ok()
            })
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| self.base_id.cmp_distance(a.id(), b.id()));

        let mut added = Vec::new();
        for candidate in candidates {
            if self.nodes.len() >= self.max_size {
                break;
            }
            if let Err(index) = self.position(candidate.id()) {
                self.nodes.insert(index, candidate.clone());
                added.push(candidate);
            }
        }

        ChangeSet::only_added(added)
    }

    // === Private Methods ===

    fn position(&self, id: &Id) -> std::result::Result<usize, usize> {
        self.nodes
            .binary_search_by(|probe| self.base_id.cmp_distance(probe.id(), id))
    }

    fn trim(&mut self) -> Vec<Activity> {
        if self.nodes.len() <= self.max_size {
            return Vec::new();
        }

        self.nodes.split_off(self.max_size)
    }
}

#[cfg(test)]
mod test {
    use std::time::Instant;

    use super::*;
    use crate::Error;

    fn node(bits: &str) -> Node {
        Node::new(bits.parse().unwrap(), bits)
    }

    fn ids(activities: &[Activity]) -> Vec<String> {
        activities.iter().map(|a| a.id().to_string()).collect()
    }

    fn near_set(max_size: usize) -> NodeNearSet {
        NodeNearSet::new("0000".parse().unwrap(), max_size)
    }

    #[test]
    fn keeps_closest_to_base() {
        let mut set = near_set(2);
        let now = Instant::now();

        set.touch(now, node("1111")).unwrap();
        set.touch(now, node("0110")).unwrap();
        let changes = set.touch(now, node("0011")).unwrap();

        assert_eq!(ids(changes.added()), vec!["0011"]);
        assert_eq!(ids(changes.removed()), vec!["1111"]);
        assert_eq!(ids(&set.dump()), vec!["0011", "0110"]);
    }

    #[test]
    fn farther_than_full_set_is_no_change() {
        let mut set = near_set(2);
        let now = Instant::now();

        set.touch(now, node("0001")).unwrap();
        set.touch(now, node("0010")).unwrap();

        assert!(set.touch(now, node("1000")).unwrap().is_empty());
        assert_eq!(ids(&set.dump()), vec!["0001", "0010"]);
    }

    #[test]
    fn ties_on_shared_prefix_resolved_by_xor() {
        let mut set = near_set(1);
        let now = Instant::now();

        // Both share one leading bit with 0000.
        set.touch(now, node("0110")).unwrap();
        set.touch(now, node("0100")).unwrap();

        assert_eq!(ids(&set.dump()), vec!["0100"]);
    }

    #[test]
    fn retouch_updates() {
        let mut set = near_set(2);
        let now = Instant::now();

        set.touch(now, node("0001")).unwrap();
        let changes = set.touch(now, node("0001")).unwrap();

        assert_eq!(ids(changes.updated()), vec!["0001"]);
        assert!(changes.added().is_empty());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn link_mismatch() {
        let mut set = near_set(2);
        let now = Instant::now();
        set.touch(now, node("0001")).unwrap();

        let imposter = Node::new("0001".parse().unwrap(), "elsewhere");

        assert!(matches!(
            set.touch(now, imposter.clone()),
            Err(Error::LinkMismatch { .. })
        ));
        assert!(matches!(
            set.remove(&imposter),
            Err(Error::LinkMismatch { .. })
        ));
    }

    #[test]
    fn zero_capacity_tracks_nothing() {
        let mut set = near_set(0);

        assert!(set.touch(Instant::now(), node("0001")).unwrap().is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let mut set = near_set(2);
        let now = Instant::now();
        set.touch(now, node("0001")).unwrap();

        assert!(set.remove(&node("0010")).unwrap().is_empty());
        assert_eq!(ids(set.remove(&node("0001")).unwrap().removed()), vec!["0001"]);
        assert!(set.is_empty());
    }

    #[test]
    fn resize_drops_farthest() {
        let mut set = near_set(4);
        let now = Instant::now();
        for bits in ["0001", "0010", "0100", "1000"] {
            set.touch(now, node(bits)).unwrap();
        }

        let changes = set.resize(2);

        assert_eq!(ids(changes.removed()), vec!["0100", "1000"]);
        assert_eq!(ids(&set.dump()), vec!["0001", "0010"]);
        assert_eq!(set.max_size(), 2);
        assert!(set.resize(3).is_empty());
    }

    #[test]
    fn fill_promotes_closest_candidates() {
        let mut set = near_set(2);
        let now = Instant::now();
        set.touch(now, node("1000")).unwrap();

        let candidates = ["0100", "0010", "1000"]
            .iter()
            .map(|bits| Activity::new(node(bits), now));

        let changes = set.fill(candidates);

        assert_eq!(ids(changes.added()), vec!["0010"]);
        assert_eq!(ids(&set.dump()), vec!["0010", "1000"]);
    }
}
