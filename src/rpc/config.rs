use std::time::Duration;

use rand::rngs::OsRng;

use crate::common::{Id, ID_BITS};
use crate::{Error, Result};

/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// The maximum duration to block waiting for inbound messages when there are none.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Minimum number of bytes in [Config::seed].
pub const MIN_SEED_SIZE: usize = 32;

#[derive(Debug, Clone)]
/// Kademlia node configurations
pub struct Config {
    /// This node's id. Every id in the network must have the same bit length.
    ///
    /// Defaults to a random 160 bit id.
    pub base_id: Id,
    /// Link of a node already in the network to join through.
    ///
    /// Defaults to None, where this node is the first in its network.
    pub bootstrap: Option<String>,
    /// How many times the bootstrap node is pinged before giving up.
    ///
    /// Defaults to `5`
    pub bootstrap_attempts: usize,
    /// Branching factor of each level of the route tree.
    ///
    /// Defaults to `2`
    pub branches_per_level: usize,
    /// Maximum number of nodes per bucket (K).
    ///
    /// Defaults to `20`
    pub bucket_size: usize,
    /// Maximum number of replacement candidates per bucket.
    ///
    /// Defaults to `20`
    pub cache_size: usize,
    /// Number of closest nodes tracked on each side of the base id.
    ///
    /// Defaults to `20`
    pub near_set_size: usize,
    /// Concurrent requests per lookup round.
    ///
    /// Defaults to `3`
    pub fan_out: usize,
    /// Maximum number of nodes returned for a lookup, and in responses.
    ///
    /// Defaults to `20`
    pub find_result_count: usize,
    /// Request timeout duration.
    ///
    /// The longer this duration is, the longer lookups take until they are deemed "done".
    /// The shorter this duration is, the more responses from busy nodes we miss out on.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// How long a tick waits for an inbound message. Zero never blocks.
    ///
    /// Defaults to [DEFAULT_POLL_INTERVAL]
    pub poll_interval: Duration,
    /// How often this node looks itself up to advertise its presence.
    ///
    /// Defaults to 5 seconds
    pub advertise_interval: Duration,
    /// How often stagnant buckets are refreshed.
    ///
    /// Defaults to 5 seconds
    pub refresh_interval: Duration,
    /// How often a handful of known nodes are pinged.
    ///
    /// Defaults to 5 seconds
    pub ping_interval: Duration,
    /// Number of nodes pinged per ping sweep.
    ///
    /// Defaults to `5`
    pub ping_sweep_size: usize,
    /// A bucket untouched for this long is refreshed.
    ///
    /// Defaults to 60 seconds
    pub stagnation_threshold: Duration,
    /// Maximum number of buckets refreshed at once.
    ///
    /// Defaults to `8`
    pub refresh_batch: usize,
    /// Seed for the random ids generated by maintenance, at least [MIN_SEED_SIZE] bytes.
    ///
    /// Defaults to None, where the generator is seeded from entropy.
    pub seed: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_id: Id::random(ID_BITS, &mut OsRng),
            bootstrap: None,
            bootstrap_attempts: 5,
            branches_per_level: 2,
            bucket_size: 20,
            cache_size: 20,
            near_set_size: 20,
            fan_out: 3,
            find_result_count: 20,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            advertise_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(5),
            ping_interval: Duration::from_secs(5),
            ping_sweep_size: 5,
            stagnation_threshold: Duration::from_secs(60),
            refresh_batch: 8,
            seed: None,
        }
    }
}

impl Config {
    /// Check the values that [Rpc::new](crate::rpc::Rpc::new) can not work with.
    pub fn validate(&self) -> Result<()> {
        if let Some(seed) = &self.seed {
            if seed.len() < MIN_SEED_SIZE {
                return Err(Error::SeedTooSmall {
                    minimum: MIN_SEED_SIZE,
                    actual: seed.len(),
                });
            }
        }

        let positive = [
            ("bucket_size", self.bucket_size),
            ("fan_out", self.fan_out),
            ("find_result_count", self.find_result_count),
            ("bootstrap_attempts", self.bootstrap_attempts),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be at least 1")));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "request_timeout must not be zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.base_id.bit_len(), ID_BITS);
    }

    #[test]
    fn short_seed() {
        let config = Config {
            seed: Some(vec![0; 8]),
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(Error::SeedTooSmall {
                minimum: MIN_SEED_SIZE,
                actual: 8
            })
        );
    }

    #[test]
    fn zero_fan_out() {
        let config = Config {
            fan_out: 0,
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
