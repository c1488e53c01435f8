//! Main Crate Error

use crate::common::{BitString, Id};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Kademlia routing crate error enum.
pub enum Error {
    /// Two identifiers (or an identifier and a table) disagree on bit length.
    #[error("Id length mismatch: expected {expected} bits, got {actual}")]
    IdLengthMismatch { expected: usize, actual: usize },

    /// The id does not fall inside the range of the bucket it was given to.
    #[error("Id {id} does not start with prefix {prefix}")]
    IdPrefixMismatch { prefix: BitString, id: Id },

    /// The local node's own id can never be stored in its routing table.
    #[error("Id {0} is the base id of this routing table")]
    BaseIdMatch(Id),

    /// Same id, different contact.
    #[error("Link mismatch for {id}: known as {existing:?}, attempted {attempted:?}")]
    LinkMismatch {
        id: Id,
        existing: String,
        attempted: String,
    },

    /// Touch times must never go backwards.
    #[error("Touch time is earlier than the previous touch")]
    BackwardTime,

    #[error("Node {0} not found in bucket")]
    NodeNotFound(Id),

    #[error("No bucket with prefix {0}")]
    NoSuchBucket(BitString),

    #[error("Bit range {offset}+{count} out of bounds for a {bit_len} bit string")]
    InvalidBitRange {
        offset: usize,
        count: usize,
        bit_len: usize,
    },

    #[error("Invalid bit string: {0}")]
    InvalidBitString(String),

    #[error("Invalid route tree layout: {0}")]
    InvalidLayout(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Seeds shorter than [MIN_SEED_SIZE](crate::rpc::config::MIN_SEED_SIZE) are rejected.
    #[error("Seed too small: need at least {minimum} bytes, got {actual}")]
    SeedTooSmall { minimum: usize, actual: usize },

    /// A [Testnet](crate::Testnet) link is already bound to another node.
    #[error("Link {0:?} is already in use")]
    LinkInUse(String),

    #[error("Could not spawn the actor thread: {0}")]
    ThreadSpawn(String),

    /// The actor thread behind a [Kademlia](crate::Kademlia) handle is gone.
    #[error("Kademlia actor is not running")]
    ActorShutdown,
}

/// Alias for results in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
