//! Prefix tree of k-buckets, split finer towards the base id.

use std::time::Instant;

use tracing::trace;

use crate::common::{Activity, BitString, Id, Node, RouteTreeChangeSet};
use crate::routing::{KBucket, TreeLayout};
use crate::{Error, Result};

/// A trie over the id space whose leaves are [KBucket]s.
///
/// The tree is fully grown at construction: each level splits the branch that
/// contains the base id, until the prefix reaches the id length. Regions far
/// from the base id stay in a few wide buckets, regions near it get many
/// narrow ones.
#[derive(Debug, Clone)]
pub struct RouteTree {
    base_id: Id,
    root: TreeNode,
    last_touch: Option<Instant>,
}

#[derive(Debug, Clone)]
struct TreeNode {
    prefix: BitString,
    /// Bits consumed by this level, `branches.len() == 1 << suffix_len`.
    suffix_len: usize,
    branches: Vec<Branch>,
}

#[derive(Debug, Clone)]
enum Branch {
    Bucket(KBucket),
    Node(Box<TreeNode>),
}

impl RouteTree {
    pub fn new<L: TreeLayout + ?Sized>(base_id: Id, layout: &L) -> Result<Self> {
        let root = build_level(&base_id, BitString::empty(), layout, true)?;

        trace!(?base_id, "New route tree");

        Ok(RouteTree {
            base_id,
            root,
            last_touch: None,
        })
    }

    // === Getters ===

    pub fn base_id(&self) -> &Id {
        &self.base_id
    }

    /// Number of nodes in all buckets, caches excluded.
    pub fn len(&self) -> usize {
        self.buckets().iter().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets().iter().all(|bucket| bucket.is_empty())
    }

    pub fn is_stale(&self, id: &Id) -> bool {
        self.bucket_for(id).is_ok_and(|bucket| bucket.is_stale(id))
    }

    /// Prefixes of every bucket, in branch order.
    pub fn dump_bucket_prefixes(&self) -> Vec<BitString> {
        self.buckets()
            .iter()
            .map(|bucket| bucket.prefix().clone())
            .collect()
    }

    /// Nodes (stale included) of the bucket with exactly `prefix`.
    pub fn dump_bucket(&self, prefix: &BitString) -> Result<Vec<Activity>> {
        self.buckets()
            .into_iter()
            .find(|bucket| bucket.prefix() == prefix)
            .map(|bucket| bucket.dump_bucket(true))
            .ok_or_else(|| Error::NoSuchBucket(prefix.clone()))
    }

    // === Public Methods ===

    pub fn touch(&mut self, time: Instant, node: Node) -> Result<RouteTreeChangeSet> {
        self.validate(&node.id)?;
        if self.last_touch.is_some_and(|last| time < last) {
            return Err(Error::BackwardTime);
        }

        let bucket = self.bucket_for_mut(&node.id)?;
        let kbucket = bucket.touch(time, node)?;
        let prefix = bucket.prefix().clone();

        self.last_touch = Some(time);

        Ok(RouteTreeChangeSet { prefix, kbucket })
    }

    pub fn stale(&mut self, node: &Node) -> Result<RouteTreeChangeSet> {
        self.validate(&node.id)?;

        let bucket = self.bucket_for_mut(&node.id)?;
        let kbucket = bucket.stale(node)?;

        Ok(RouteTreeChangeSet {
            prefix: bucket.prefix().clone(),
            kbucket,
        })
    }

    /// Up to `max` nodes closest to `target` by XOR distance, closest first.
    ///
    /// Branches are visited in the order of their XOR distance to the target,
    /// so buckets come out in non-decreasing distance and the walk stops as
    /// soon as `max` nodes are collected.
    pub fn find(&self, target: &Id, max: usize, include_stale: bool) -> Result<Vec<Activity>> {
        self.base_id.check_len(target)?;

        let mut output = Vec::with_capacity(max);
        collect_closest(&self.root, target, max, include_stale, &mut output)?;

        Ok(output)
    }

    /// Prefixes of buckets not touched since `older_than` (inclusive),
    /// least recently touched first. Never touched buckets come first.
    pub fn stagnant_buckets(&self, older_than: Instant) -> Vec<BitString> {
        let mut stagnant = self
            .buckets()
            .into_iter()
            .filter(|bucket| bucket.prefix() != self.base_id.as_bits())
            .map(|bucket| (bucket.latest_bucket_activity(), bucket.prefix().clone()))
            .filter(|(time, _)| time.map_or(true, |time| time <= older_than))
            .collect::<Vec<_>>();

        stagnant.sort_by_key(|(time, _)| *time);

        stagnant.into_iter().map(|(_, prefix)| prefix).collect()
    }

    // === Private Methods ===

    fn validate(&self, id: &Id) -> Result<()> {
        self.base_id.check_len(id)?;

        if *id == self.base_id {
            return Err(Error::BaseIdMatch(id.clone()));
        }

        Ok(())
    }

    fn buckets(&self) -> Vec<&KBucket> {
        let mut buckets = Vec::new();
        collect_buckets(&self.root, &mut buckets);
        buckets
    }

    fn bucket_for(&self, id: &Id) -> Result<&KBucket> {
        let mut node = &self.root;

        loop {
            match node.branches.get(branch_index(node, id)?) {
                Some(Branch::Bucket(bucket)) => return Ok(bucket),
                Some(Branch::Node(child)) => node = &**child,
                None => return Err(Error::NodeNotFound(id.clone())),
            }
        }
    }

    fn bucket_for_mut(&mut self, id: &Id) -> Result<&mut KBucket> {
        let mut node = &mut self.root;

        loop {
            let index = branch_index(node, id)?;
            match node.branches.get_mut(index) {
                Some(Branch::Bucket(bucket)) => return Ok(bucket),
                Some(Branch::Node(child)) => node = &mut **child,
                None => return Err(Error::NodeNotFound(id.clone())),
            }
        }
    }
}

fn build_level<L: TreeLayout + ?Sized>(
    base_id: &Id,
    prefix: BitString,
    layout: &L,
    is_root: bool,
) -> Result<TreeNode> {
    let count = layout.branch_count(&prefix);
    let min = if is_root { 1 } else { 2 };

    if count < min || !count.is_power_of_two() {
        return Err(Error::InvalidLayout(format!(
            "{count} branches at prefix {prefix:?}, need a power of two of at least {min}"
        )));
    }

    let suffix_len = count.trailing_zeros() as usize;
    let depth = prefix.bit_len() + suffix_len;

    if depth > base_id.bit_len() {
        return Err(Error::InvalidLayout(format!(
            "{count} branches at prefix {prefix:?} extend past {} bits",
            base_id.bit_len()
        )));
    }

    // The branch holding the base id keeps splitting until the id runs out.
    let split_index = if depth < base_id.bit_len() {
        Some(base_id.as_bits().bits_as_u64(prefix.bit_len(), suffix_len)? as usize)
    } else {
        None
    };

    let mut branches = Vec::with_capacity(count);
    for index in 0..count {
        let branch_prefix = prefix.append(&BitString::from_u64(index as u64, suffix_len)?);

        if Some(index) == split_index {
            let child = build_level(base_id, branch_prefix, layout, false)?;
            branches.push(Branch::Node(Box::new(child)));
        } else {
            let params = layout.bucket_params(&branch_prefix);
            branches.push(Branch::Bucket(KBucket::new(
                base_id.clone(),
                branch_prefix,
                params.bucket_size,
                params.cache_size,
            )?));
        }
    }

    Ok(TreeNode {
        prefix,
        suffix_len,
        branches,
    })
}

fn branch_index(node: &TreeNode, id: &Id) -> Result<usize> {
    Ok(id
        .as_bits()
        .bits_as_u64(node.prefix.bit_len(), node.suffix_len)? as usize)
}

fn collect_buckets<'a>(node: &'a TreeNode, output: &mut Vec<&'a KBucket>) {
    for branch in &node.branches {
        match branch {
            Branch::Bucket(bucket) => output.push(bucket),
            Branch::Node(child) => collect_buckets(child, output),
        }
    }
}

fn collect_closest(
    node: &TreeNode,
    target: &Id,
    max: usize,
    include_stale: bool,
    output: &mut Vec<Activity>,
) -> Result<()> {
    let target_index = branch_index(node, target)?;

    for step in 0..node.branches.len() {
        if output.len() >= max {
            break;
        }

        match node.branches.get(step ^ target_index) {
            Some(Branch::Bucket(bucket)) => {
                let mut nodes = bucket.dump_bucket(include_stale);
                nodes.sort_by(|a, b| target.cmp_distance(a.id(), b.id()));

                let remaining = max - output.len();
                output.extend(nodes.into_iter().take(remaining));
            }
            Some(Branch::Node(child)) => {
                collect_closest(child, target, max, include_stale, output)?;
            }
            None => {}
        }
    }

    Ok(())
}
