//! Struct and implementation of the Node entry in the Kademlia routing table
use std::time::Instant;

use crate::common::Id;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Node entry in Kademlia routing table
///
/// The `link` is an opaque contact string handed to the
/// [Transport](crate::rpc::Transport) when talking to this node.
pub struct Node {
    pub id: Id,
    pub link: String,
}

impl Node {
    /// Creates a new Node from an id and a link.
    pub fn new(id: Id, link: impl Into<String>) -> Node {
        Node {
            id,
            link: link.into(),
        }
    }

    /// Error if `other` claims this node's id with a different link.
    pub fn check_link(&self, other: &Node) -> Result<()> {
        if self.id == other.id && self.link != other.link {
            return Err(Error::LinkMismatch {
                id: self.id.clone(),
                existing: self.link.clone(),
                attempted: other.link.clone(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A node and the last time it was touched.
pub struct Activity {
    pub node: Node,
    pub time: Instant,
}

impl Activity {
    pub fn new(node: Node, time: Instant) -> Activity {
        Activity { node, time }
    }

    pub fn id(&self) -> &Id {
        &self.node.id
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn link_mismatch() {
        let a = Node::new("0101".parse().unwrap(), "a");
        let b = Node::new("0101".parse().unwrap(), "b");
        let c = Node::new("0110".parse().unwrap(), "b");

        assert!(a.check_link(&a.clone()).is_ok());
        assert!(a.check_link(&c).is_ok());
        assert_eq!(
            a.check_link(&b),
            Err(Error::LinkMismatch {
                id: a.id.clone(),
                existing: "a".into(),
                attempted: "b".into()
            })
        );
    }
}
