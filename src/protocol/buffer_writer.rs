//! Bounds-checked append cursor over a caller-owned region.
//!
//! Every encode path writes through [`BufferWriter`]; it is the only place
//! that checks for overflow. The writer borrows the region and never owns
//! it, so the same code writes into a stack array, a `Vec`, or a slot buffer
//! lent out by the shared-memory transport.
//!
//! # Example
//!
//! ```
//! use groupwire::protocol::BufferWriter;
//!
//! let mut region = [0u8; 8];
//! let mut writer = BufferWriter::new(&mut region);
//! writer.append_u32_be(7).unwrap();
//! assert_eq!(writer.size(), 4);
//! assert_eq!(writer.remaining(), 4);
//! assert!(writer.append(&[0; 5]).is_err());
//! ```

use crate::error::{GroupwireError, Result};

/// Append cursor over a borrowed byte region.
#[derive(Debug)]
pub struct BufferWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> BufferWriter<'a> {
    /// Wrap a region, starting at offset 0.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Wrap a region whose first `offset` bytes are already filled.
    ///
    /// An offset past the end is clamped to the capacity.
    pub fn with_offset(buf: &'a mut [u8], offset: usize) -> Self {
        let offset = offset.min(buf.len());
        Self { buf, offset }
    }

    /// Append raw bytes, or fail without writing anything.
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let dst = self.claim_space(data.len())?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Append a big-endian `u32`.
    #[inline]
    pub fn append_u32_be(&mut self, value: u32) -> Result<()> {
        self.append(&value.to_be_bytes())
    }

    /// Append two raw tag bytes, unswapped.
    #[inline]
    pub fn append_tag(&mut self, tag: [u8; 2]) -> Result<()> {
        self.append(&tag)
    }

    /// Append the UTF-8 bytes of a string (no length prefix).
    #[inline]
    pub fn append_str(&mut self, s: &str) -> Result<()> {
        self.append(s.as_bytes())
    }

    /// Reserve `n` bytes and hand them out for direct filling.
    ///
    /// The cursor advances past the claimed range immediately; the caller is
    /// expected to fill all of it.
    pub fn claim_space(&mut self, n: usize) -> Result<&mut [u8]> {
        if !self.can_write(n) {
            return Err(GroupwireError::capacity(n, self.remaining()));
        }
        let start = self.offset;
        self.offset += n;
        Ok(&mut self.buf[start..start + n])
    }

    /// Check that `n` more bytes fit.
    #[inline]
    pub fn can_write(&self, n: usize) -> bool {
        n <= self.remaining()
    }

    /// Bytes written so far.
    #[inline]
    pub fn size(&self) -> usize {
        self.offset
    }

    /// Bytes still available.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Total region size.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The filled prefix of the region.
    #[inline]
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_within_capacity() {
        let mut region = [0u8; 6];
        let mut writer = BufferWriter::new(&mut region);

        writer.append(b"ab").unwrap();
        writer.append_tag(*b"TX").unwrap();

        assert_eq!(writer.size(), 4);
        assert_eq!(writer.remaining(), 2);
        assert_eq!(writer.capacity(), 6);
        assert_eq!(writer.written(), b"abTX");
    }

    #[test]
    fn test_append_overflow_is_rejected_without_partial_write() {
        let mut region = [0u8; 3];
        let mut writer = BufferWriter::new(&mut region);
        writer.append(b"x").unwrap();

        let err = writer.append(b"yyy").unwrap_err();
        assert!(matches!(
            err,
            GroupwireError::Capacity {
                needed: 3,
                remaining: 2
            }
        ));
        assert_eq!(writer.size(), 1);
        assert_eq!(region, [b'x', 0, 0]);
    }

    #[test]
    fn test_append_u32_big_endian() {
        let mut region = [0u8; 4];
        let mut writer = BufferWriter::new(&mut region);
        writer.append_u32_be(0x0102_0304).unwrap();
        assert_eq!(region, [1, 2, 3, 4]);
    }

    #[test]
    fn test_claim_space_fill_directly() {
        let mut region = [0u8; 5];
        let mut writer = BufferWriter::new(&mut region);
        writer.append(b"h").unwrap();

        let dst = writer.claim_space(4).unwrap();
        dst.copy_from_slice(b"ello");

        assert_eq!(writer.remaining(), 0);
        assert_eq!(writer.written(), b"hello");
        assert!(writer.claim_space(1).is_err());
    }

    #[test]
    fn test_claim_zero_bytes_on_full_writer() {
        let mut region = [0u8; 1];
        let mut writer = BufferWriter::new(&mut region);
        writer.append(b"z").unwrap();
        assert!(writer.claim_space(0).unwrap().is_empty());
    }

    #[test]
    fn test_with_offset() {
        let mut region = *b"abc\0\0";
        let mut writer = BufferWriter::with_offset(&mut region, 3);
        writer.append(b"de").unwrap();
        assert_eq!(writer.written(), b"abcde");

        let mut small = [0u8; 2];
        let writer = BufferWriter::with_offset(&mut small, 10);
        assert_eq!(writer.size(), 2);
        assert_eq!(writer.remaining(), 0);
    }

    #[test]
    fn test_empty_region() {
        let mut region: [u8; 0] = [];
        let mut writer = BufferWriter::new(&mut region);
        assert!(writer.append(b"").is_ok());
        assert!(writer.append(b"a").is_err());
        assert_eq!(writer.capacity(), 0);
    }
}
