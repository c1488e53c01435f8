//! How a route tree branches and how big its buckets are.

use crate::common::BitString;
use crate::{Error, Result};

/// Capacities of the bucket created at some prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    /// Maximum number of nodes in the bucket (K).
    pub bucket_size: usize,
    /// Maximum number of nodes waiting in the replacement cache.
    pub cache_size: usize,
}

/// Shape of a [RouteTree](crate::routing::RouteTree).
///
/// Consulted once per level while the tree is built. Branch counts must be
/// powers of two; the root may have a single branch, deeper levels need two or
/// more.
pub trait TreeLayout {
    /// Number of branches to split the bucket at `prefix` into.
    fn branch_count(&self, prefix: &BitString) -> usize;

    fn bucket_params(&self, prefix: &BitString) -> BucketParams;
}

/// Same branching factor and bucket capacities at every level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleTreeLayout {
    pub branches_per_level: usize,
    pub bucket_size: usize,
    pub cache_size: usize,
}

impl SimpleTreeLayout {
    pub fn new(branches_per_level: usize, bucket_size: usize, cache_size: usize) -> Result<Self> {
        if branches_per_level < 2 || !branches_per_level.is_power_of_two() {
            return Err(Error::InvalidLayout(format!(
                "branches per level must be a power of two of at least 2, got {branches_per_level}"
            )));
        }

        Ok(Self {
            branches_per_level,
            bucket_size,
            cache_size,
        })
    }
}

impl TreeLayout for SimpleTreeLayout {
    fn branch_count(&self, _prefix: &BitString) -> usize {
        self.branches_per_level
    }

    fn bucket_params(&self, _prefix: &BitString) -> BucketParams {
        BucketParams {
            bucket_size: self.bucket_size,
            cache_size: self.cache_size,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn branches_must_be_power_of_two() {
        assert!(SimpleTreeLayout::new(0, 20, 20).is_err());
        assert!(SimpleTreeLayout::new(1, 20, 20).is_err());
        assert!(SimpleTreeLayout::new(6, 20, 20).is_err());
        assert!(SimpleTreeLayout::new(8, 20, 20).is_ok());
    }
}
