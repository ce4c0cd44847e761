//! Bloom filter for transaction relay filtering
//!
//! A peer installs a Bloom filter with 'filterload' so that the remote node
//! only relays matching transactions and Merkle blocks.  The filter is
//! probabilistic: it can match objects that were never inserted (at the
//! configured false-positive rate) but never misses one that was.
//!
//! Wire form: var-int filter length, filter bytes, 4-byte hash function
//! count, 4-byte tweak, 1-byte update flags.

use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use rand::Rng;

/// Maximum filter size in bytes
pub const MAX_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions
pub const MAX_HASH_FUNCS: u32 = 50;

/// Default false-positive rate used when only an element count is given
pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.0005;

/// Controls how the remote node updates the filter when an output matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Filter is not adjusted for matching outputs
    None,
    /// Filter is adjusted for all matching outputs
    All,
    /// Filter is adjusted only for pay-to-pubkey and pay-to-multisig outputs
    P2PubkeyOnly,
}

impl UpdateMode {
    pub fn to_byte(self) -> u8 {
        match self {
            UpdateMode::None => 0,
            UpdateMode::All => 1,
            UpdateMode::P2PubkeyOnly => 2,
        }
    }

    pub fn from_byte(value: u8) -> Result<UpdateMode> {
        match value {
            0 => Ok(UpdateMode::None),
            1 => Ok(UpdateMode::All),
            2 => Ok(UpdateMode::P2PubkeyOnly),
            _ => Err(CoreError::malformed(format!(
                "filter update flags {} are not valid",
                value
            ))),
        }
    }
}

/// A BIP37 Bloom filter
#[derive(Debug, Clone)]
pub struct BloomFilter {
    filter: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: UpdateMode,
}

impl BloomFilter {
    /// Creates a filter sized for `elements` insertions at the default
    /// false-positive rate, with a random tweak
    pub fn new(elements: usize) -> BloomFilter {
        BloomFilter::with_rate(
            elements,
            DEFAULT_FALSE_POSITIVE_RATE,
            rand::thread_rng().gen(),
            UpdateMode::P2PubkeyOnly,
        )
    }

    /// Creates a filter sized for `elements` insertions at the given
    /// false-positive rate
    pub fn with_rate(elements: usize, rate: f64, tweak: u32, flags: UpdateMode) -> BloomFilter {
        let elements = elements.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bits = (-elements * rate.ln() / (ln2 * ln2)).ceil();
        let bits = bits.min((MAX_FILTER_SIZE * 8) as f64).max(8.0);
        let size = (bits as usize) / 8;
        let size = size.max(1);
        let hash_funcs = ((size * 8) as f64 / elements * ln2) as u32;
        let hash_funcs = hash_funcs.clamp(1, MAX_HASH_FUNCS);
        BloomFilter {
            filter: vec![0u8; size],
            hash_funcs,
            tweak,
            flags,
        }
    }

    /// Reconstructs a filter from its wire form, enforcing the size caps
    pub fn read(buffer: &mut SerializedBuffer) -> Result<BloomFilter> {
        let filter = buffer.get_var_bytes()?;
        if filter.is_empty() || filter.len() > MAX_FILTER_SIZE {
            return Err(CoreError::malformed(format!(
                "filter length {} is not valid",
                filter.len()
            )));
        }
        let hash_funcs = buffer.get_u32()?;
        if hash_funcs == 0 || hash_funcs > MAX_HASH_FUNCS {
            return Err(CoreError::malformed(format!(
                "filter hash function count {} is not valid",
                hash_funcs
            )));
        }
        let tweak = buffer.get_u32()?;
        let flags = UpdateMode::from_byte(buffer.get_u8()?)?;
        Ok(BloomFilter {
            filter,
            hash_funcs,
            tweak,
            flags,
        })
    }

    /// Writes the filter in its wire form
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer
            .put_var_bytes(&self.filter)
            .put_u32(self.hash_funcs)
            .put_u32(self.tweak)
            .put_u8(self.flags.to_byte());
    }

    /// Inserts an object into the filter
    pub fn insert(&mut self, object: &[u8]) {
        for i in 0..self.hash_funcs {
            let bit = self.hash(i, object);
            self.filter[(bit >> 3) as usize] |= 1 << (bit & 7);
        }
    }

    /// Checks if the filter contains the object
    pub fn contains(&self, object: &[u8]) -> bool {
        (0..self.hash_funcs).all(|i| {
            let bit = self.hash(i, object);
            self.filter[(bit >> 3) as usize] & (1 << (bit & 7)) != 0
        })
    }

    pub fn flags(&self) -> UpdateMode {
        self.flags
    }

    pub fn tweak(&self) -> u32 {
        self.tweak
    }

    pub fn hash_funcs(&self) -> u32 {
        self.hash_funcs
    }

    pub fn filter_bytes(&self) -> &[u8] {
        &self.filter
    }

    /// MurmurHash3 (32-bit) with the seed for hash function `num`, reduced
    /// modulo the filter size in bits
    fn hash(&self, num: u32, object: &[u8]) -> u32 {
        let mut h1 = num.wrapping_mul(0xFBA4_C795).wrapping_add(self.tweak);
        const C1: u32 = 0xcc9e_2d51;
        const C2: u32 = 0x1b87_3593;
        let blocks = object.len() / 4 * 4;
        for chunk in object[..blocks].chunks_exact(4) {
            let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
            h1 = h1.rotate_left(13);
            h1 = h1.wrapping_mul(5).wrapping_add(0xe654_6b64);
        }
        let mut k1 = 0u32;
        let tail = &object[blocks..];
        if tail.len() >= 3 {
            k1 ^= (tail[2] as u32) << 16;
        }
        if tail.len() >= 2 {
            k1 ^= (tail[1] as u32) << 8;
        }
        if !tail.is_empty() {
            k1 ^= tail[0] as u32;
            k1 = k1.wrapping_mul(C1);
            k1 = k1.rotate_left(15);
            k1 = k1.wrapping_mul(C2);
            h1 ^= k1;
        }
        h1 ^= object.len() as u32;
        h1 ^= h1 >> 16;
        h1 = h1.wrapping_mul(0x85eb_ca6b);
        h1 ^= h1 >> 13;
        h1 = h1.wrapping_mul(0xc2b2_ae35);
        h1 ^= h1 >> 16;
        h1 % (self.filter.len() as u32 * 8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_elements_match() {
        let mut filter = BloomFilter::with_rate(3, 0.0005, 12345, UpdateMode::None);
        let elements: [&[u8]; 3] = [b"first element", b"second", &[0u8; 20]];
        for element in elements {
            filter.insert(element);
        }
        for element in elements {
            assert!(filter.contains(element));
        }
    }

    #[test]
    fn test_missing_element_usually_absent() {
        let mut filter = BloomFilter::with_rate(2, 0.0005, 0, UpdateMode::All);
        filter.insert(b"present");
        assert!(!filter.contains(b"definitely not present"));
    }

    #[test]
    fn test_wire_round_trip() {
        let mut filter = BloomFilter::with_rate(10, 0.001, 0xdeadbeef, UpdateMode::P2PubkeyOnly);
        filter.insert(b"element");
        let mut buffer = SerializedBuffer::new();
        filter.write(&mut buffer);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        let decoded = BloomFilter::read(&mut buffer).unwrap();
        assert_eq!(decoded.filter_bytes(), filter.filter_bytes());
        assert_eq!(decoded.hash_funcs(), filter.hash_funcs());
        assert_eq!(decoded.tweak(), 0xdeadbeef);
        assert_eq!(decoded.flags(), UpdateMode::P2PubkeyOnly);
        assert!(decoded.contains(b"element"));
    }

    #[test]
    fn test_read_rejects_oversized_filter() {
        let mut buffer = SerializedBuffer::new();
        buffer.put_var_bytes(&vec![0u8; MAX_FILTER_SIZE + 1]);
        buffer.put_u32(10).put_u32(0).put_u8(0);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert!(BloomFilter::read(&mut buffer).is_err());
    }

    #[test]
    fn test_read_rejects_too_many_hash_funcs() {
        let mut buffer = SerializedBuffer::new();
        buffer.put_var_bytes(&[0u8; 8]);
        buffer.put_u32(MAX_HASH_FUNCS + 1).put_u32(0).put_u8(0);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert!(BloomFilter::read(&mut buffer).is_err());
    }

    #[test]
    fn test_sizing_respects_caps() {
        let filter = BloomFilter::with_rate(10_000_000, 0.000001, 0, UpdateMode::None);
        assert!(filter.filter_bytes().len() <= MAX_FILTER_SIZE);
        assert!(filter.hash_funcs() <= MAX_HASH_FUNCS);
        let tiny = BloomFilter::with_rate(1, 0.5, 0, UpdateMode::None);
        assert!(!tiny.filter_bytes().is_empty());
        assert!(tiny.hash_funcs() >= 1);
    }

    #[test]
    fn test_false_positive_rate() {
        // Insert 1000 elements at p = 0.001, then probe 10,000 elements that
        // were never inserted; the observed rate should stay well below 1%
        let mut filter = BloomFilter::with_rate(1000, 0.001, 99, UpdateMode::None);
        for i in 0u32..1000 {
            let mut element = [0u8; 32];
            element[0..4].copy_from_slice(&i.to_le_bytes());
            element[4] = 0x01;
            filter.insert(&element);
        }
        let mut false_positives = 0;
        for i in 0u32..10_000 {
            let mut element = [0u8; 32];
            element[0..4].copy_from_slice(&i.to_le_bytes());
            element[4] = 0x02;
            if filter.contains(&element) {
                false_positives += 1;
            }
        }
        assert!(
            false_positives < 100,
            "false positive rate too high: {}/10000",
            false_positives
        );
    }

    #[test]
    fn test_update_mode_round_trip() {
        for mode in [UpdateMode::None, UpdateMode::All, UpdateMode::P2PubkeyOnly] {
            assert_eq!(UpdateMode::from_byte(mode.to_byte()).unwrap(), mode);
        }
        assert!(UpdateMode::from_byte(3).is_err());
    }
}
