//! Serialized memory
//!
//! Every record that ends up in an archive is first turned into a `SerializedBlob`:
//! an immutable, reference-counted byte buffer with a cached 64-bit hash. Descriptor
//! structs are written field by field in declaration order, little-endian, with
//! strings and arrays prefixed by their `u32` length, so the same description always
//! produces the same bytes.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Version of the serialized encoding
///
/// Seeds the blob hash and is written into the archive header, so archives and hashes
/// produced by incompatible encoders never compare equal.
pub const SERIALIZATION_VERSION: u32 = 3;

/// Hashes a byte slice with the archive's stable, seeded hash
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(bytes, SERIALIZATION_VERSION as u64)
}

/// Immutable byte buffer with a cached content hash
#[derive(Clone)]
pub struct SerializedBlob {
    bytes: Bytes,
    hash: u64,
}

impl SerializedBlob {
    /// Wraps bytes into a blob, computing the hash once
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let hash = hash_bytes(&bytes);
        Self { bytes, hash }
    }

    /// Creates an empty blob
    pub fn empty() -> Self {
        Self::new(Bytes::new())
    }

    /// Serializes a value into a blob
    pub fn from_value<T: Serializable + ?Sized>(value: &T) -> Self {
        let mut serializer = Serializer::new();
        value.serialize(&mut serializer);
        serializer.finish()
    }

    /// Concatenates blobs in order
    pub fn concat<'a>(blobs: impl IntoIterator<Item = &'a SerializedBlob>) -> Self {
        let mut buf = BytesMut::new();
        for blob in blobs {
            buf.extend_from_slice(blob.as_bytes());
        }
        Self::new(buf.freeze())
    }

    /// The cached content hash
    pub fn content_hash(&self) -> u64 {
        self.hash
    }

    /// The blob contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A cheap reference-counted handle to the contents
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for SerializedBlob {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for SerializedBlob {}

impl Hash for SerializedBlob {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for SerializedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedBlob").field("len", &self.bytes.len()).field("hash", &format_args!("{:016x}", self.hash)).finish()
    }
}

/// Types with a stable binary encoding
pub trait Serializable {
    /// Appends the encoding of `self` to the serializer
    fn serialize(&self, s: &mut Serializer);
}

/// Little-endian writer producing `SerializedBlob`s
#[derive(Debug, Default)]
pub struct Serializer {
    buf: BytesMut,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write position in bytes
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    /// Floats are written as their IEEE-754 bit pattern
    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_u32_le(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    /// Writes a count or length prefix
    ///
    /// Lengths above `u32::MAX` cannot be represented in the format; they are clamped,
    /// which the archive size check later rejects.
    pub fn write_len(&mut self, len: usize) {
        self.write_u32(u32::try_from(len).unwrap_or(u32::MAX));
    }

    /// Writes a length-prefixed UTF-8 string
    pub fn write_str(&mut self, value: &str) {
        self.write_len(value.len());
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Writes a length-prefixed byte array
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_len(value.len());
        self.buf.extend_from_slice(value);
    }

    /// Writes bytes without a length prefix
    pub fn write_raw(&mut self, value: &[u8]) {
        self.buf.extend_from_slice(value);
    }

    /// Writes a count-prefixed array of 32-bit words
    pub fn write_words(&mut self, words: &[u32]) {
        self.write_len(words.len());
        for &word in words {
            self.buf.put_u32_le(word);
        }
    }

    /// Writes a count-prefixed array of serializable values
    pub fn write_slice<T: Serializable>(&mut self, values: &[T]) {
        self.write_len(values.len());
        for value in values {
            value.serialize(self);
        }
    }

    /// Writes an optional child; an absent child is a zero count
    pub fn write_option<T: Serializable>(&mut self, value: Option<&T>) {
        match value {
            Some(value) => {
                self.write_u32(1);
                value.serialize(self);
            }
            None => self.write_u32(0),
        }
    }

    pub fn write<T: Serializable + ?Sized>(&mut self, value: &T) {
        value.serialize(self);
    }

    /// Pads with zeros up to a multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        let padding = self.buf.len().next_multiple_of(alignment) - self.buf.len();
        self.buf.put_bytes(0, padding);
    }

    /// Overwrites a previously written `u32` at `position`
    pub fn patch_u32(&mut self, position: usize, value: u32) {
        self.buf[position..position + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Freezes the written bytes into a blob
    pub fn finish(self) -> SerializedBlob {
        SerializedBlob::new(self.buf.freeze())
    }

    /// Freezes the written bytes without hashing them
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Serializable for str {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(self);
    }
}

impl Serializable for String {
    fn serialize(&self, s: &mut Serializer) {
        s.write_str(self);
    }
}

impl Serializable for u32 {
    fn serialize(&self, s: &mut Serializer) {
        s.write_u32(*self);
    }
}

impl Serializable for SerializedBlob {
    fn serialize(&self, s: &mut Serializer) {
        s.write_bytes(self.as_bytes());
    }
}

/// Error raised when decoding malformed serialized data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed data at offset {offset}: {reason}")]
pub struct DeserializeError {
    pub offset: usize,
    pub reason: String,
}

/// Bounds-checked reader for data written by `Serializer`
#[derive(Debug, Clone)]
pub struct Deserializer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn error(&self, reason: impl Into<String>) -> DeserializeError {
        DeserializeError { offset: self.pos, reason: reason.into() }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DeserializeError> {
        if len > self.remaining() {
            return Err(self.error(format!("need {len} bytes, {} remaining", self.remaining())));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DeserializeError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.take(N)?);
        Ok(array)
    }

    pub fn read_u8(&mut self) -> Result<u8, DeserializeError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, DeserializeError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, DeserializeError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, DeserializeError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, DeserializeError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, DeserializeError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.error(format!("invalid bool value {other}"))),
        }
    }

    /// Reads a count prefix, rejecting counts that cannot fit in the remaining data
    pub fn read_count(&mut self, min_element_size: usize) -> Result<usize, DeserializeError> {
        let count = self.read_u32()? as usize;
        if count.saturating_mul(min_element_size.max(1)) > self.remaining() && min_element_size > 0 {
            return Err(self.error(format!("count {count} exceeds remaining data")));
        }
        Ok(count)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], DeserializeError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str, DeserializeError> {
        let start = self.pos;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|e| DeserializeError { offset: start, reason: format!("invalid UTF-8: {e}") })
    }

    pub fn read_words(&mut self) -> Result<Vec<u32>, DeserializeError> {
        let count = self.read_count(4)?;
        (0..count).map(|_| self.read_u32()).collect()
    }

    /// Reads bytes without a length prefix
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8], DeserializeError> {
        self.take(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializer_layout_is_little_endian_and_length_prefixed() {
        let mut s = Serializer::new();
        s.write_u32(0x0102_0304);
        s.write_str("ab");
        s.write_option::<u32>(None);
        let blob = s.finish();
        assert_eq!(blob.as_bytes(), &[4, 3, 2, 1, 2, 0, 0, 0, b'a', b'b', 0, 0, 0, 0]);
    }

    #[test]
    fn test_align_pads_with_zeros() {
        let mut s = Serializer::new();
        s.write_u8(7);
        s.align(4);
        assert_eq!(s.position(), 4);
        assert_eq!(s.finish().as_bytes(), &[7, 0, 0, 0]);
    }

    #[test]
    fn test_blob_equality_and_hash() {
        let a = SerializedBlob::new(vec![1u8, 2, 3]);
        let b = SerializedBlob::new(vec![1u8, 2, 3]);
        let c = SerializedBlob::new(vec![1u8, 2, 4]);
        assert_eq!(a, b);
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a, c);
        assert_eq!(a.content_hash(), hash_bytes(&[1, 2, 3]));
    }

    #[test]
    fn test_concat() {
        let a = SerializedBlob::new(vec![1u8]);
        let b = SerializedBlob::new(vec![2u8, 3]);
        assert_eq!(SerializedBlob::concat([&a, &b]).as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_deserializer_reads_back() {
        let mut s = Serializer::new();
        s.write_str("name");
        s.write_words(&[7, 8]);
        s.write_f32(1.5);
        s.write_bool(true);
        let blob = s.finish();

        let mut d = Deserializer::new(blob.as_bytes());
        assert_eq!(d.read_str().unwrap(), "name");
        assert_eq!(d.read_words().unwrap(), vec![7, 8]);
        assert_eq!(d.read_f32().unwrap(), 1.5);
        assert!(d.read_bool().unwrap());
        assert!(d.is_empty());
        assert!(d.read_u32().is_err());
    }

    #[test]
    fn test_deserializer_rejects_oversized_lengths() {
        let mut s = Serializer::new();
        s.write_u32(1000);
        let blob = s.finish();
        assert!(Deserializer::new(blob.as_bytes()).read_bytes().is_err());
        assert!(Deserializer::new(blob.as_bytes()).read_words().is_err());
    }
}
