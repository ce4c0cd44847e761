//! Hash values and digest primitives
//!
//! A `Hash256` is held in natural (big-endian) order: the order used for
//! display and for numeric comparison against a target difficulty.  The wire
//! protocol serializes hashes with the bytes reversed, so encoders and
//! decoders reverse at the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// A 256-bit hash in natural (big-endian) byte order
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// The all-zero sentinel hash
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Wraps raw bytes already in natural order
    pub fn from_bytes(bytes: [u8; 32]) -> Hash256 {
        Hash256(bytes)
    }

    /// Builds a hash from its wire representation (reversed byte order)
    pub fn from_wire_bytes(bytes: &[u8]) -> Hash256 {
        let mut out = [0u8; 32];
        for (i, b) in bytes.iter().take(32).enumerate() {
            out[31 - i] = *b;
        }
        Hash256(out)
    }

    /// Parses the big-endian hex display form
    pub fn from_hex(s: &str) -> Option<Hash256> {
        let bytes = hex::decode(s).ok()?;
        if bytes.len() != 32 {
            return None;
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Hash256(out))
    }

    /// The hash bytes in natural order
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The hash bytes in wire order (reversed)
    pub fn to_wire_bytes(&self) -> [u8; 32] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// Checks for the all-zero sentinel
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Numeric view for target-difficulty comparison
    pub fn to_u256(&self) -> U256 {
        U256::from_be_bytes(&self.0)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(self.0))
    }
}

/// Single SHA-256 digest
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Double SHA-256 digest
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(Sha256::digest(data)));
    out
}

/// Double SHA-256 over the concatenation of several buffers
pub fn double_sha256_list(buffers: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for buf in buffers {
        hasher.update(buf);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(hasher.finalize()));
    out
}

/// RIPEMD-160 of SHA-256, used for address hashing
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(Sha256::digest(data)));
    out
}

/// Returns a new buffer with the bytes reversed
pub fn reverse_bytes(data: &[u8]) -> Vec<u8> {
    data.iter().rev().copied().collect()
}

/// Hashes serialized data and returns the result in natural order.
///
/// Protocol object identifiers (transaction hashes, block hashes) are the
/// double SHA-256 of the serialization with the bytes reversed.
pub fn object_hash(data: &[u8]) -> Hash256 {
    Hash256::from_wire_bytes(&double_sha256(data))
}

/// 256-bit unsigned integer used for proof-of-work target arithmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U256([u64; 4]); // little-endian words

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);

    pub fn from_u64(value: u64) -> U256 {
        U256([value, 0, 0, 0])
    }

    /// Builds from 32 big-endian bytes
    pub fn from_be_bytes(bytes: &[u8; 32]) -> U256 {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = (3 - i) * 8;
            let mut chunk = [0u8; 8];
            chunk.copy_from_slice(&bytes[start..start + 8]);
            *word = u64::from_be_bytes(chunk);
        }
        U256(words)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    pub fn shl(&self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }
        result
    }

    pub fn shr(&self, shift: u32) -> U256 {
        if shift >= 256 {
            return U256::ZERO;
        }
        let mut result = U256::ZERO;
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;
        for i in 0..4 {
            if i >= word_shift {
                result.0[i - word_shift] |= self.0[i] >> bit_shift;
                if bit_shift > 0 && i - word_shift >= 1 {
                    result.0[i - word_shift - 1] |= self.0[i] << (64 - bit_shift);
                }
            }
        }
        result
    }

    fn bit(&self, index: u32) -> bool {
        (self.0[(index / 64) as usize] >> (index % 64)) & 1 == 1
    }

    fn set_bit(&mut self, index: u32) {
        self.0[(index / 64) as usize] |= 1 << (index % 64);
    }

    fn overflowing_sub(&self, other: &U256) -> U256 {
        let mut result = U256::ZERO;
        let mut borrow = 0u64;
        for i in 0..4 {
            let (d1, b1) = self.0[i].overflowing_sub(other.0[i]);
            let (d2, b2) = d1.overflowing_sub(borrow);
            result.0[i] = d2;
            borrow = (b1 as u64) + (b2 as u64);
        }
        result
    }

    fn checked_add_one(&self) -> Option<U256> {
        let mut result = *self;
        for word in result.0.iter_mut() {
            let (sum, carry) = word.overflowing_add(1);
            *word = sum;
            if !carry {
                return Some(result);
            }
        }
        None
    }

    /// Computes 2^256 / (self + 1), the amount of work a target represents
    pub fn work_from_target(&self) -> U256 {
        // (2^256 - divisor) / divisor + 1 avoids a 257-bit dividend
        let divisor = match self.checked_add_one() {
            Some(d) => d,
            None => return U256::from_u64(1), // target is all-ones
        };
        if divisor.is_zero() {
            return U256::ZERO;
        }
        let neg_divisor = U256::ZERO.overflowing_sub(&divisor);
        match neg_divisor.div(&divisor).checked_add_one() {
            Some(work) => work,
            None => U256::ZERO,
        }
    }

    fn div(&self, divisor: &U256) -> U256 {
        if divisor.is_zero() {
            return U256::ZERO;
        }
        let mut quotient = U256::ZERO;
        let mut remainder = U256::ZERO;
        for i in (0..256).rev() {
            remainder = remainder.shl(1);
            if self.bit(i) {
                remainder.0[0] |= 1;
            }
            if remainder >= *divisor {
                remainder = remainder.overflowing_sub(divisor);
                quotient.set_bit(i);
            }
        }
        quotient
    }

    /// Expands a compact-format target.
    ///
    /// Compact format is mantissa * 256^(exponent-3) with a sign bit at
    /// 0x00800000.  A negative or zero mantissa yields zero, which callers
    /// reject as a non-positive target.
    pub fn from_compact(bits: u32) -> U256 {
        let exponent = (bits >> 24) as u32;
        let mantissa = bits & 0x007fffff;
        if mantissa == 0 || bits & 0x0080_0000 != 0 {
            return U256::ZERO;
        }
        let value = U256::from_u64(mantissa as u64);
        if exponent <= 3 {
            value.shr(8 * (3 - exponent))
        } else {
            value.shl(8 * (exponent - 3))
        }
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                order => return order,
            }
        }
        std::cmp::Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_wire_round_trip() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let hash = Hash256::from_bytes(bytes);
        let wire = hash.to_wire_bytes();
        assert_eq!(wire[0], 31);
        assert_eq!(Hash256::from_wire_bytes(&wire), hash);
    }

    #[test]
    fn test_hash_display_is_big_endian_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let hash = Hash256::from_bytes(bytes);
        let text = hash.to_string();
        assert!(text.starts_with("ab"));
        assert!(text.ends_with("01"));
        assert_eq!(Hash256::from_hex(&text), Some(hash));
    }

    #[test]
    fn test_zero_hash() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256::from_bytes([1u8; 32]).is_zero());
    }

    #[test]
    fn test_double_sha256_empty() {
        // First four bytes are the well-known zero-payload checksum
        let digest = double_sha256(&[]);
        assert_eq!(&digest[0..4], &[0x5d, 0xf6, 0xe0, 0xe2]);
    }

    #[test]
    fn test_double_sha256_list_matches_concatenation() {
        let a = [1u8, 2, 3];
        let b = [4u8, 5];
        let whole = double_sha256(&[1, 2, 3, 4, 5]);
        assert_eq!(double_sha256_list(&[&a, &b]), whole);
    }

    #[test]
    fn test_hash160_length() {
        assert_eq!(hash160(&[0x04, 0xde, 0xad]).len(), 20);
    }

    #[test]
    fn test_reverse_bytes() {
        assert_eq!(reverse_bytes(&[1, 2, 3]), vec![3, 2, 1]);
        assert_eq!(reverse_bytes(&[]), Vec::<u8>::new());
    }

    #[test]
    fn test_u256_ordering() {
        let small = U256::from_u64(5);
        let large = U256::from_u64(6).shl(64);
        assert!(small < large);
        assert!(large > small);
        assert_eq!(small.cmp(&small), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_u256_from_be_bytes() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x2a;
        assert_eq!(U256::from_be_bytes(&bytes), U256::from_u64(42));
        let mut high = [0u8; 32];
        high[0] = 1;
        assert_eq!(U256::from_be_bytes(&high), U256::from_u64(1).shl(248));
    }

    #[test]
    fn test_u256_shifts_invert() {
        let value = U256::from_u64(0x0123_4567_89ab_cdef);
        assert_eq!(value.shl(100).shr(100), value);
        assert_eq!(value.shl(300), U256::ZERO);
        assert_eq!(value.shr(300), U256::ZERO);
    }

    #[test]
    fn test_from_compact_prodnet_limit() {
        // 0x1d00ffff == 0x00ffff * 256^(0x1d - 3)
        let target = U256::from_compact(0x1d00ffff);
        assert_eq!(target, U256::from_u64(0xffff).shl(8 * (0x1d - 3)));
    }

    #[test]
    fn test_from_compact_testnet_limit() {
        let target = U256::from_compact(0x207fffff);
        assert_eq!(target, U256::from_u64(0x7fffff).shl(8 * (0x20 - 3)));
    }

    #[test]
    fn test_from_compact_negative_or_zero() {
        assert!(U256::from_compact(0x1d800000).is_zero()); // sign bit set
        assert!(U256::from_compact(0x1d000000).is_zero()); // zero mantissa
    }

    #[test]
    fn test_from_compact_small_exponent() {
        // exponent 1 shifts the mantissa right two bytes
        assert_eq!(U256::from_compact(0x01110000), U256::from_u64(0x11));
    }

    #[test]
    fn test_div() {
        let hundred = U256::from_u64(100);
        assert_eq!(hundred.div(&U256::from_u64(7)), U256::from_u64(14));
        let big = U256::from_u64(1).shl(200);
        assert_eq!(big.div(&U256::from_u64(1).shl(100)), U256::from_u64(1).shl(100));
    }

    #[test]
    fn test_work_from_target() {
        // work = 2^256 / (target + 1); for target 2^255 - 1 the work is 2
        let target = U256::from_u64(1).shl(255).overflowing_sub(&U256::from_u64(1));
        assert_eq!(target.work_from_target(), U256::from_u64(2));
        // a lower target represents more work
        let easy = U256::from_compact(0x207fffff).work_from_target();
        let hard = U256::from_compact(0x1d00ffff).work_from_target();
        assert!(hard > easy);
    }
}
