//! Routing table maintenance logic.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::common::BitString;

use super::Config;

/// Routing table maintenance state
#[derive(Debug)]
pub struct Maintenance {
    advertise_interval: Duration,
    refresh_interval: Duration,
    ping_interval: Duration,
    last_advertise: Instant,
    last_refresh: Instant,
    last_ping: Instant,
}

/// Decisions about routing table maintenance
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MaintenanceDecisions {
    /// Whether to look up our own id
    pub should_advertise: bool,

    /// Whether to refresh stagnant buckets
    pub should_refresh: bool,

    /// Whether to ping a sample of known nodes
    pub should_ping: bool,
}

impl Maintenance {
    /// Create new routing maintenance tracker, with every interval starting at `now`.
    pub fn new(config: &Config, now: Instant) -> Self {
        Maintenance {
            advertise_interval: config.advertise_interval,
            refresh_interval: config.refresh_interval,
            ping_interval: config.ping_interval,
            last_advertise: now,
            last_refresh: now,
            last_ping: now,
        }
    }

    /// Determine what maintenance operations should be performed.
    ///
    /// Resets the timer of every interval that elapsed.
    pub fn decisions_at(&mut self, now: Instant) -> MaintenanceDecisions {
        MaintenanceDecisions {
            should_advertise: is_due(&mut self.last_advertise, self.advertise_interval, now),
            should_refresh: is_due(&mut self.last_refresh, self.refresh_interval, now),
            should_ping: is_due(&mut self.last_ping, self.ping_interval, now),
        }
    }
}

fn is_due(last: &mut Instant, interval: Duration, now: Instant) -> bool {
    if now.saturating_duration_since(*last) < interval {
        return false;
    }

    *last = now;
    true
}

/// Pick up to `batch` of the `stagnant` prefixes, skipping those already
/// being refreshed.
///
/// `stagnant` is most stagnant first, each prefix paired with whether its
/// bucket holds any node. Buckets with nodes go first, in their order, so
/// the empty buckets next to the base id never starve them.
pub fn refresh_candidates(
    stagnant: Vec<(BitString, bool)>,
    running: &HashSet<BitString>,
    batch: usize,
) -> Vec<BitString> {
    let (populated, empty): (Vec<_>, Vec<_>) =
        stagnant.into_iter().partition(|(_, populated)| *populated);

    populated
        .into_iter()
        .chain(empty)
        .map(|(prefix, _)| prefix)
        .filter(|prefix| !running.contains(prefix))
        .take(batch)
        .collect()
}
