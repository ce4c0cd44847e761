//! Serialized byte buffer
//!
//! A single growable cursor backs both message encoding and decoding.  All
//! integers are little-endian on the wire.  Every `get` operation checks the
//! remaining length and fails with an end-of-data error rather than panic.

use crate::error::{CoreError, Result};
use crate::hash::Hash256;

/// Byte cursor used for wire encoding and decoding
#[derive(Debug, Clone, Default)]
pub struct SerializedBuffer {
    bytes: Vec<u8>,
    offset: usize,
    start: usize,
}

impl SerializedBuffer {
    /// Creates an empty buffer for encoding
    pub fn new() -> SerializedBuffer {
        SerializedBuffer::default()
    }

    /// Creates an empty buffer with the given capacity
    pub fn with_capacity(capacity: usize) -> SerializedBuffer {
        SerializedBuffer {
            bytes: Vec::with_capacity(capacity),
            offset: 0,
            start: 0,
        }
    }

    /// Wraps existing bytes for decoding
    pub fn from_bytes(bytes: Vec<u8>) -> SerializedBuffer {
        SerializedBuffer {
            bytes,
            offset: 0,
            start: 0,
        }
    }

    /// Current cursor position
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Repositions the cursor
    pub fn set_position(&mut self, position: usize) {
        self.offset = position.min(self.bytes.len());
    }

    /// Number of bytes between the cursor and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    /// Marks the current position as the start of a segment
    pub fn set_start(&mut self) {
        self.start = self.offset;
    }

    /// The bytes between the segment start mark and the cursor
    pub fn segment(&self) -> &[u8] {
        &self.bytes[self.start..self.offset]
    }

    /// The entire buffer contents
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the buffer and returns its contents
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn require(&self, count: usize, context: &str) -> Result<()> {
        if self.remaining() < count {
            return Err(CoreError::EndOfData(format!(
                "{} requires {} bytes, {} available",
                context,
                count,
                self.remaining()
            )));
        }
        Ok(())
    }

    /// Skips over bytes without reading them
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.require(count, "skip")?;
        self.offset += count;
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.require(1, "u8")?;
        let value = self.bytes[self.offset];
        self.offset += 1;
        Ok(value)
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        self.require(2, "u16")?;
        let mut chunk = [0u8; 2];
        chunk.copy_from_slice(&self.bytes[self.offset..self.offset + 2]);
        self.offset += 2;
        Ok(u16::from_le_bytes(chunk))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.require(4, "u32")?;
        let mut chunk = [0u8; 4];
        chunk.copy_from_slice(&self.bytes[self.offset..self.offset + 4]);
        self.offset += 4;
        Ok(u32::from_le_bytes(chunk))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.require(8, "u64")?;
        let mut chunk = [0u8; 8];
        chunk.copy_from_slice(&self.bytes[self.offset..self.offset + 8]);
        self.offset += 8;
        Ok(u64::from_le_bytes(chunk))
    }

    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    /// Reads a fixed number of bytes
    pub fn get_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        self.require(count, "byte array")?;
        let bytes = self.bytes[self.offset..self.offset + count].to_vec();
        self.offset += count;
        Ok(bytes)
    }

    /// Reads bytes into a fixed-size slice
    pub fn get_into(&mut self, out: &mut [u8]) -> Result<()> {
        self.require(out.len(), "byte array")?;
        out.copy_from_slice(&self.bytes[self.offset..self.offset + out.len()]);
        self.offset += out.len();
        Ok(())
    }

    /// Decodes a variable-length integer.
    ///
    /// Non-minimal encodings are rejected: a value below the threshold of
    /// its prefix could have been encoded in a shorter form and a conforming
    /// peer never sends one.
    pub fn get_var_int(&mut self) -> Result<u64> {
        let first = self.get_u8()?;
        match first {
            0xfd => {
                let value = self.get_u16()? as u64;
                if value < 0xfd {
                    return Err(CoreError::malformed("non-minimal var-int encoding"));
                }
                Ok(value)
            }
            0xfe => {
                let value = self.get_u32()? as u64;
                if value <= 0xffff {
                    return Err(CoreError::malformed("non-minimal var-int encoding"));
                }
                Ok(value)
            }
            0xff => {
                let value = self.get_u64()?;
                if value <= 0xffff_ffff {
                    return Err(CoreError::malformed("non-minimal var-int encoding"));
                }
                Ok(value)
            }
            value => Ok(value as u64),
        }
    }

    /// Reads a length-prefixed byte string
    pub fn get_var_bytes(&mut self) -> Result<Vec<u8>> {
        let length = self.get_var_int()? as usize;
        self.require(length, "var-bytes")?;
        self.get_bytes(length)
    }

    /// Reads a length-prefixed UTF-8 string no longer than `max_length`
    pub fn get_var_string(&mut self, max_length: usize) -> Result<String> {
        let length = self.get_var_int()? as usize;
        if length > max_length {
            return Err(CoreError::malformed(format!(
                "string length {} exceeds maximum {}",
                length, max_length
            )));
        }
        let bytes = self.get_bytes(length)?;
        String::from_utf8(bytes).map_err(|_| CoreError::malformed("string is not valid UTF-8"))
    }

    /// Reads a 256-bit hash in wire (reversed) order
    pub fn get_hash(&mut self) -> Result<Hash256> {
        let mut bytes = [0u8; 32];
        self.get_into(&mut bytes)?;
        Ok(Hash256::from_wire_bytes(&bytes))
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self.offset = self.bytes.len();
        self
    }

    pub fn put_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self.offset = self.bytes.len();
        self
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self.offset = self.bytes.len();
        self
    }

    pub fn put_i32(&mut self, value: i32) -> &mut Self {
        self.put_u32(value as u32)
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self.offset = self.bytes.len();
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.put_u64(value as u64)
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self.offset = self.bytes.len();
        self
    }

    /// Encodes a variable-length integer in its canonical form
    pub fn put_var_int(&mut self, value: u64) -> &mut Self {
        if value < 0xfd {
            self.put_u8(value as u8)
        } else if value <= 0xffff {
            self.put_u8(0xfd).put_u16(value as u16)
        } else if value <= 0xffff_ffff {
            self.put_u8(0xfe).put_u32(value as u32)
        } else {
            self.put_u8(0xff).put_u64(value)
        }
    }

    /// Writes a length-prefixed byte string
    pub fn put_var_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_var_int(bytes.len() as u64).put_bytes(bytes)
    }

    /// Writes a length-prefixed UTF-8 string
    pub fn put_var_string(&mut self, value: &str) -> &mut Self {
        self.put_var_bytes(value.as_bytes())
    }

    /// Writes a 256-bit hash in wire (reversed) order
    pub fn put_hash(&mut self, hash: &Hash256) -> &mut Self {
        self.put_bytes(&hash.to_wire_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_round_trip() {
        let mut buffer = SerializedBuffer::new();
        buffer
            .put_u8(0x12)
            .put_u16(0x3456)
            .put_u32(0x789abcde)
            .put_u64(0x0123456789abcdef)
            .put_i32(-2)
            .put_i64(-3);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert_eq!(buffer.get_u8().unwrap(), 0x12);
        assert_eq!(buffer.get_u16().unwrap(), 0x3456);
        assert_eq!(buffer.get_u32().unwrap(), 0x789abcde);
        assert_eq!(buffer.get_u64().unwrap(), 0x0123456789abcdef);
        assert_eq!(buffer.get_i32().unwrap(), -2);
        assert_eq!(buffer.get_i64().unwrap(), -3);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buffer = SerializedBuffer::new();
        buffer.put_u32(0x01020304);
        assert_eq!(buffer.as_slice(), &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_var_int_boundaries() {
        let cases: &[(u64, usize, Option<u8>)] = &[
            (0, 1, None),
            (0xfc, 1, None),
            (0xfd, 3, Some(0xfd)),
            (0xffff, 3, Some(0xfd)),
            (0x10000, 5, Some(0xfe)),
            (0xffff_ffff, 5, Some(0xfe)),
            (0x1_0000_0000, 9, Some(0xff)),
        ];
        for &(value, length, prefix) in cases {
            let mut buffer = SerializedBuffer::new();
            buffer.put_var_int(value);
            assert_eq!(buffer.as_slice().len(), length, "length of {:#x}", value);
            if let Some(prefix) = prefix {
                assert_eq!(buffer.as_slice()[0], prefix, "prefix of {:#x}", value);
            }
            let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
            assert_eq!(buffer.get_var_int().unwrap(), value);
        }
    }

    #[test]
    fn test_var_int_rejects_non_minimal() {
        // 0x20 encoded with the 0xfd prefix
        let mut buffer = SerializedBuffer::from_bytes(vec![0xfd, 0x20, 0x00]);
        assert!(matches!(
            buffer.get_var_int(),
            Err(CoreError::Malformed { .. })
        ));
        // 0xffff encoded with the 0xfe prefix
        let mut buffer = SerializedBuffer::from_bytes(vec![0xfe, 0xff, 0xff, 0x00, 0x00]);
        assert!(buffer.get_var_int().is_err());
        // 0xffffffff encoded with the 0xff prefix
        let mut buffer =
            SerializedBuffer::from_bytes(vec![0xff, 0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
        assert!(buffer.get_var_int().is_err());
    }

    #[test]
    fn test_var_bytes_round_trip() {
        let mut buffer = SerializedBuffer::new();
        buffer.put_var_bytes(&[9, 8, 7]);
        buffer.put_var_bytes(&[]);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert_eq!(buffer.get_var_bytes().unwrap(), vec![9, 8, 7]);
        assert_eq!(buffer.get_var_bytes().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_var_string() {
        let mut buffer = SerializedBuffer::new();
        buffer.put_var_string("/app/peercore:0.1.0/");
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert_eq!(buffer.get_var_string(255).unwrap(), "/app/peercore:0.1.0/");
    }

    #[test]
    fn test_var_string_too_long() {
        let mut buffer = SerializedBuffer::new();
        buffer.put_var_string("abcdef");
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert!(buffer.get_var_string(3).is_err());
    }

    #[test]
    fn test_end_of_data() {
        let mut buffer = SerializedBuffer::from_bytes(vec![1, 2]);
        assert!(matches!(buffer.get_u32(), Err(CoreError::EndOfData(_))));
        // The failed read must not consume anything
        assert_eq!(buffer.get_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_var_bytes_length_beyond_end() {
        let mut buffer = SerializedBuffer::from_bytes(vec![0x05, 1, 2]);
        assert!(buffer.get_var_bytes().is_err());
    }

    #[test]
    fn test_hash_wire_order() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xaa; // most significant in natural order
        let hash = Hash256::from_bytes(bytes);
        let mut buffer = SerializedBuffer::new();
        buffer.put_hash(&hash);
        assert_eq!(buffer.as_slice()[31], 0xaa);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        assert_eq!(buffer.get_hash().unwrap(), hash);
    }

    #[test]
    fn test_segment_capture() {
        let mut buffer = SerializedBuffer::from_bytes(vec![0, 1, 2, 3, 4, 5]);
        buffer.skip(2).unwrap();
        buffer.set_start();
        buffer.get_u16().unwrap();
        assert_eq!(buffer.segment(), &[2, 3]);
    }

    #[test]
    fn test_skip_past_end() {
        let mut buffer = SerializedBuffer::from_bytes(vec![1]);
        assert!(buffer.skip(2).is_err());
    }
}
