use std::vec::IntoIter;

use crate::common::{Id, Node};

/// Candidates of a lookup, sorted by XOR distance to its target.
#[derive(Debug, Clone)]
pub struct ClosestNodes {
    target: Id,
    nodes: Vec<Node>,
}

impl ClosestNodes {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            nodes: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn target(&self) -> &Id {
        &self.target
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // === Public Methods ===

    /// Insert `node` at its place, ignoring ids already present or of the
    /// wrong length.
    ///
    /// Returns `true` if the node was inserted.
    pub fn add(&mut self, node: Node) -> bool {
        if self.target.check_len(&node.id).is_err() {
            return false;
        }

        match self
            .nodes
            .binary_search_by(|probe| self.target.cmp_distance(&probe.id, &node.id))
        {
            Err(pos) => {
                self.nodes.insert(pos, node);
                true
            }
            Ok(_) => false,
        }
    }

    /// Ids of the `count` closest nodes.
    pub fn closest_ids(&self, count: usize) -> Vec<Id> {
        self.nodes
            .iter()
            .take(count)
            .map(|node| node.id.clone())
            .collect()
    }
}

impl IntoIterator for ClosestNodes {
    type Item = Node;
    type IntoIter = IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestNodes {
    type Item = &'a Node;
    type IntoIter = std::slice::Iter<'a, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
