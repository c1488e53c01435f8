//! Kademlia node Id or a lookup target
use std::cmp::Ordering;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use rand::RngCore;

use crate::common::BitString;
use crate::{Error, Result};

/// The default size of node IDs in bits.
pub const ID_BITS: usize = 160;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Kademlia node Id or a lookup target.
///
/// Every Id in one routing table has the same bit length. Ordering (`Ord`) is
/// numeric, closeness is XOR distance, see [Id::cmp_distance].
pub struct Id(BitString);

impl Id {
    /// Wrap a non-empty bit string.
    pub fn new(bits: BitString) -> Result<Id> {
        if bits.is_empty() {
            return Err(Error::InvalidBitString("an Id needs at least one bit".into()));
        }

        Ok(Id(bits))
    }

    /// Create a new Id from the first `bit_len` bits of `bytes`.
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T, bit_len: usize) -> Result<Id> {
        Id::new(BitString::from_bytes(bytes.as_ref(), bit_len)?)
    }

    /// Create a new Id from the lowest `bit_len` bits of `value`.
    pub fn from_u64(value: u64, bit_len: usize) -> Result<Id> {
        Id::new(BitString::from_u64(value, bit_len)?)
    }

    pub fn random<R: RngCore + ?Sized>(bit_len: usize, rng: &mut R) -> Id {
        let mut bytes = vec![0; bit_len.div_ceil(8)];
        rng.fill_bytes(&mut bytes);

        Id(BitString::from_bytes(&bytes, bit_len).unwrap_or_else(|_| BitString::empty()))
    }

    /// A random Id of `bit_len` bits that starts with `prefix`.
    pub fn random_with_prefix<R: RngCore + ?Sized>(
        prefix: &BitString,
        bit_len: usize,
        rng: &mut R,
    ) -> Result<Id> {
        Id::new(Id::random(bit_len, rng).0.with_prefix(prefix)?)
    }

    // === Getters ===

    pub fn bit_len(&self) -> usize {
        self.0.bit_len()
    }

    pub fn as_bits(&self) -> &BitString {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    // === Public Methods ===

    pub fn prefix(&self, len: usize) -> Result<BitString> {
        self.0.prefix(len)
    }

    pub fn starts_with(&self, prefix: &BitString) -> bool {
        self.0.starts_with(prefix)
    }

    /// Number of leading bits this Id shares with `other`.
    ///
    /// Errors if the two ids have different lengths.
    pub fn shared_prefix_len(&self, other: &Id) -> Result<usize> {
        self.0.shared_prefix_len(&other.0)
    }

    pub fn xor(&self, other: &Id) -> Result<BitString> {
        self.0.xor(&other.0)
    }

    /// Error unless `other` has the same bit length as this Id.
    pub fn check_len(&self, other: &Id) -> Result<()> {
        self.0.check_same_len(&other.0)
    }

    /// Compare `a` and `b` by their XOR distance to this Id, closest first.
    ///
    /// The XOR results are compared from the most significant bit down, so
    /// between two ids sharing the same prefix length with `self`, the one
    /// whose first bit after the divergence agrees with `self` is closer.
    /// Ids are expected to share one length; a length difference only breaks
    /// otherwise equal distances.
    pub fn cmp_distance(&self, a: &Id, b: &Id) -> Ordering {
        let target = self.as_bytes().iter();

        for ((t, x), y) in target.zip(a.as_bytes()).zip(b.as_bytes()) {
            match (x ^ t).cmp(&(y ^ t)) {
                Ordering::Equal => continue,
                ordering => return ordering,
            }
        }

        a.bit_len().cmp(&b.bit_len())
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Parse a string of `0` and `1` characters, e.g. `"0110"`.
    fn from_str(s: &str) -> Result<Self> {
        Id::new(s.parse()?)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.bit_len() <= 32 {
            return write!(f, "{}", self.0);
        }

        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}
