//! RODATA constant pool: a deduplicated, offset-addressed blob of constant
//! byte values.
//!
//! Each entry is stored as a LEB128 byte-count prefix followed by the raw
//! bytes, so a reader can walk the blob without an external index. Interning
//! is by content: adding the same bytes twice returns the same offset and
//! leaves the blob untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bytecode::error::StructuralError;

/// Offset of an interned constant within the pool blob.
///
/// Symbol ids travel inside instructions (selectors, local names, string
/// constants) and survive container round-trips unchanged, since they are
/// absolute positions in the serialized RODATA section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    data: Vec<u8>,
    offsets: HashMap<Vec<u8>, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of distinct entries in the pool.
    pub fn entry_count(&self) -> usize {
        self.offsets.len()
    }

    /// The serialized pool: exactly the bytes of the RODATA section.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Intern a byte value, returning its offset in the blob.
    ///
    /// Idempotent: equal content always maps to the offset recorded on
    /// first insertion, and repeated calls do not grow the pool.
    pub fn add(&mut self, bytes: &[u8]) -> SymbolId {
        if let Some(&offset) = self.offsets.get(bytes) {
            return SymbolId(offset);
        }
        let offset = self.data.len() as u32;
        write_len_prefix(&mut self.data, bytes.len());
        self.data.extend_from_slice(bytes);
        self.offsets.insert(bytes.to_vec(), offset);
        SymbolId(offset)
    }

    /// Intern a UTF-8 string value.
    pub fn add_str(&mut self, s: &str) -> SymbolId {
        self.add(s.as_bytes())
    }

    /// Read the entry starting at `id`. The offset must be in range and
    /// the entry's length prefix must stay within the pool.
    pub fn get(&self, id: SymbolId) -> Result<&[u8], StructuralError> {
        let at = id.0 as usize;
        if at >= self.data.len() {
            return Err(StructuralError::BadConstant { offset: id.0 });
        }
        let (len, consumed) =
            read_len_prefix(&self.data, at).map_err(|_| StructuralError::BadConstant { offset: id.0 })?;
        let start = at + consumed;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or(StructuralError::PoolOverrun { offset: id.0 })?;
        Ok(&self.data[start..end])
    }

    /// Read the entry at `id` as a UTF-8 string.
    pub fn get_str(&self, id: SymbolId) -> Result<&str, StructuralError> {
        std::str::from_utf8(self.get(id)?)
            .map_err(|_| StructuralError::NonUtf8Constant { offset: id.0 })
    }

    /// Rebuild a pool from its serialized bytes by walking the
    /// self-describing entries.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StructuralError> {
        let mut pool = Self::new();
        let mut at = 0usize;
        while at < bytes.len() {
            let (len, consumed) = read_len_prefix(bytes, at)?;
            let start = at + consumed;
            let end = start
                .checked_add(len)
                .filter(|&e| e <= bytes.len())
                .ok_or(StructuralError::PoolOverrun { offset: at as u32 })?;
            pool.offsets
                .entry(bytes[start..end].to_vec())
                .or_insert(at as u32);
            at = end;
        }
        pool.data = bytes.to_vec();
        Ok(pool)
    }
}

/// Append a LEB128-encoded length.
fn write_len_prefix(buf: &mut Vec<u8>, mut n: usize) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Decode a LEB128 length at `at`, returning (value, bytes consumed).
fn read_len_prefix(bytes: &[u8], at: usize) -> Result<(usize, usize), StructuralError> {
    let mut value = 0usize;
    let mut shift = 0u32;
    let mut consumed = 0usize;
    loop {
        let byte = *bytes
            .get(at + consumed)
            .ok_or(StructuralError::PoolOverrun { offset: at as u32 })?;
        value |= ((byte & 0x7f) as usize) << shift;
        consumed += 1;
        if byte & 0x80 == 0 {
            return Ok((value, consumed));
        }
        shift += 7;
        if shift >= usize::BITS {
            return Err(StructuralError::PoolOverrun { offset: at as u32 });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut pool = ConstantPool::new();
        let a = pool.add(b"hello");
        let size = pool.as_bytes().len();
        let b = pool.add(b"hello");
        assert_eq!(a, b);
        assert_eq!(pool.as_bytes().len(), size);
        assert_eq!(pool.entry_count(), 1);
    }

    #[test]
    fn distinct_values_get_distinct_offsets() {
        let mut pool = ConstantPool::new();
        let a = pool.add_str("+");
        let b = pool.add_str("-");
        assert_ne!(a, b);
        assert_eq!(pool.get_str(a).unwrap(), "+");
        assert_eq!(pool.get_str(b).unwrap(), "-");
    }

    #[test]
    fn round_trips_through_bytes() {
        let mut pool = ConstantPool::new();
        let a = pool.add_str("ifTrue:");
        let b = pool.add(&[0u8, 1, 2, 255]);
        let rebuilt = ConstantPool::from_bytes(pool.as_bytes()).unwrap();
        assert_eq!(rebuilt.as_bytes(), pool.as_bytes());
        assert_eq!(rebuilt.get_str(a).unwrap(), "ifTrue:");
        assert_eq!(rebuilt.get(b).unwrap(), &[0u8, 1, 2, 255]);
        // Interning into the rebuilt pool reuses the recorded offsets.
        let mut rebuilt = rebuilt;
        assert_eq!(rebuilt.add_str("ifTrue:"), a);
    }

    #[test]
    fn long_entries_use_multibyte_prefixes() {
        let mut pool = ConstantPool::new();
        let big = vec![7u8; 300];
        let id = pool.add(&big);
        assert_eq!(pool.get(id).unwrap(), &big[..]);
        // 300 needs two LEB128 bytes.
        assert_eq!(pool.as_bytes().len(), 2 + 300);
    }

    #[test]
    fn bad_offsets_are_rejected() {
        let mut pool = ConstantPool::new();
        pool.add_str("x");
        assert!(pool.get(SymbolId(999)).is_err());
    }

    #[test]
    fn truncated_pool_is_rejected() {
        let mut pool = ConstantPool::new();
        pool.add(&[1, 2, 3, 4]);
        let bytes = pool.as_bytes();
        assert!(ConstantPool::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
