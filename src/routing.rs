//! Kademlia routing table: buckets arranged in a route tree, plus near sets.

mod kbucket;
mod layout;
mod near_set;
mod route_tree;
mod router;

pub use kbucket::KBucket;
pub use layout::{BucketParams, SimpleTreeLayout, TreeLayout};
pub use near_set::NodeNearSet;
pub use route_tree::RouteTree;
pub use router::Router;
