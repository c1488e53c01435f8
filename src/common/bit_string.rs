//! Immutable bit strings, stored most significant bit first.

use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

/// An arbitrary length (possibly empty) sequence of bits.
///
/// Bits are packed most significant bit first, and any padding bits in the
/// last byte are always zero, so two bit strings of the same length compare
/// (and order) exactly like the unsigned integers they spell.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitString {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitString {
    /// The empty bit string, prefix of everything.
    pub fn empty() -> Self {
        Self {
            bytes: Vec::new(),
            bit_len: 0,
        }
    }

    /// Read the first `bit_len` bits out of `bytes`.
    pub fn from_bytes(bytes: &[u8], bit_len: usize) -> Result<Self> {
        let available = bytes.len() * 8;
        if bit_len > available {
            return Err(Error::InvalidBitRange {
                offset: 0,
                count: bit_len,
                bit_len: available,
            });
        }

        let mut bytes = bytes[..bit_len.div_ceil(8)].to_vec();
        mask_tail(&mut bytes, bit_len);

        Ok(Self { bytes, bit_len })
    }

    /// The lowest `bit_len` bits of `value`, e.g. `from_u64(0b0101, 4)` is `0101`.
    pub fn from_u64(value: u64, bit_len: usize) -> Result<Self> {
        if bit_len > 64 {
            return Err(Error::InvalidBitRange {
                offset: 0,
                count: bit_len,
                bit_len: 64,
            });
        }
        if bit_len < 64 && value >> bit_len != 0 {
            return Err(Error::InvalidBitString(format!(
                "{value} does not fit in {bit_len} bits"
            )));
        }

        let aligned = if bit_len == 0 {
            0
        } else {
            value << (64 - bit_len)
        };

        Self::from_bytes(&aligned.to_be_bytes(), bit_len)
    }

    // === Getters ===

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    /// Packed bytes, padding bits zeroed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Bit at `index`, counting from the most significant bit.
    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.bit_len {
            return None;
        }

        self.bytes
            .get(index / 8)
            .map(|byte| byte >> (7 - index % 8) & 1 == 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.bit_len).map(move |index| self.bit(index).unwrap_or(false))
    }

    // === Public Methods ===

    /// Copy of `count` bits starting at `offset`.
    pub fn bits(&self, offset: usize, count: usize) -> Result<BitString> {
        self.check_range(offset, count)?;

        Ok(Self::from_bits(self.iter().skip(offset).take(count)))
    }

    /// Read `count` (at most 64) bits starting at `offset` as an unsigned integer.
    pub fn bits_as_u64(&self, offset: usize, count: usize) -> Result<u64> {
        if count > 64 {
            return Err(Error::InvalidBitRange {
                offset,
                count,
                bit_len: self.bit_len,
            });
        }
        self.check_range(offset, count)?;

        Ok(self
            .iter()
            .skip(offset)
            .take(count)
            .fold(0, |acc, bit| acc << 1 | u64::from(bit)))
    }

    /// The first `len` bits.
    pub fn prefix(&self, len: usize) -> Result<BitString> {
        self.bits(0, len)
    }

    /// `self` followed by `other`.
    pub fn append(&self, other: &BitString) -> BitString {
        Self::from_bits(self.iter().chain(other.iter()))
    }

    pub fn starts_with(&self, prefix: &BitString) -> bool {
        prefix.bit_len <= self.bit_len && self.iter().zip(prefix.iter()).all(|(a, b)| a == b)
    }

    /// Copy of `self` with its leading bits overwritten by `prefix`.
    pub fn with_prefix(&self, prefix: &BitString) -> Result<BitString> {
        if prefix.bit_len > self.bit_len {
            return Err(Error::InvalidBitRange {
                offset: 0,
                count: prefix.bit_len,
                bit_len: self.bit_len,
            });
        }

        Ok(Self::from_bits(
            prefix.iter().chain(self.iter().skip(prefix.bit_len)),
        ))
    }

    /// Number of leading bits shared with `other`.
    pub fn shared_prefix_len(&self, other: &BitString) -> Result<usize> {
        self.check_same_len(other)?;

        for (index, (a, b)) in self.bytes.iter().zip(&other.bytes).enumerate() {
            if a != b {
                return Ok(index * 8 + (a ^ b).leading_zeros() as usize);
            }
        }

        Ok(self.bit_len)
    }

    pub fn xor(&self, other: &BitString) -> Result<BitString> {
        self.check_same_len(other)?;

        Ok(Self {
            bytes: self
                .bytes
                .iter()
                .zip(&other.bytes)
                .map(|(a, b)| a ^ b)
                .collect(),
            bit_len: self.bit_len,
        })
    }

    pub fn check_same_len(&self, other: &BitString) -> Result<()> {
        if self.bit_len != other.bit_len {
            return Err(Error::IdLengthMismatch {
                expected: self.bit_len,
                actual: other.bit_len,
            });
        }

        Ok(())
    }

    // === Private Methods ===

    fn check_range(&self, offset: usize, count: usize) -> Result<()> {
        match offset.checked_add(count) {
            Some(end) if end <= self.bit_len => Ok(()),
            _ => Err(Error::InvalidBitRange {
                offset,
                count,
                bit_len: self.bit_len,
            }),
        }
    }

    fn from_bits(bits: impl Iterator<Item = bool>) -> BitString {
        let mut bytes = Vec::new();
        let mut bit_len = 0;

        for bit in bits {
            if bit_len % 8 == 0 {
                bytes.push(0);
            }
            if bit {
                if let Some(last) = bytes.last_mut() {
                    *last |= 0x80 >> (bit_len % 8);
                }
            }
            bit_len += 1;
        }

        BitString { bytes, bit_len }
    }
}

fn mask_tail(bytes: &mut [u8], bit_len: usize) {
    let used = bit_len % 8;
    if used != 0 {
        if let Some(last) = bytes.last_mut() {
            *last &= 0xFF << (8 - used);
        }
    }
}

impl FromStr for BitString {
    type Err = Error;

    /// Parse a string of `0` and `1` characters, e.g. `"0110"`.
    fn from_str(s: &str) -> Result<Self> {
        let bits = s
            .chars()
            .map(|c| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                _ => Err(Error::InvalidBitString(s.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::from_bits(bits.into_iter()))
    }
}

impl Display for BitString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for bit in self.iter() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl Debug for BitString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BitString({self})")
    }
}
