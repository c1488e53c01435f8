use crate::common::Id;

use super::Rpc;

/// Information and statistics about this Kademlia node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    id: Id,
    routing_table_size: usize,
    near_set_size: usize,
    bucket_count: usize,
    running_queries: usize,
    inflight_requests: usize,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Number of nodes in the route tree's buckets.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Number of nodes tracked in both near sets.
    pub fn near_set_size(&self) -> usize {
        self.near_set_size
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Lookups currently running, searches and maintenance alike.
    pub fn running_queries(&self) -> usize {
        self.running_queries
    }

    pub fn inflight_requests(&self) -> usize {
        self.inflight_requests
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        Self {
            id: rpc.id().clone(),
            routing_table_size: rpc.router().len(),
            near_set_size: rpc.router().dump_near_set().len(),
            bucket_count: rpc.router().dump_bucket_prefixes().len(),
            running_queries: rpc.running_queries(),
            inflight_requests: rpc.inflight_requests(),
        }
    }
}
