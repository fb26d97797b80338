//! Owned byte blocks.
//!
//! A [`ByteBlock`] is an owned contiguous sequence of bytes with a known
//! length. Blocks move by ownership transfer and are never copied across the
//! channel boundary: the read path allocates a buffer, fills it, and hands the
//! same allocation to the inbound channel; the write path keeps the block
//! alive until the OS write completion releases it.

use core::fmt;
use core::ops::Deref;

/// An owned contiguous sequence of bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteBlock {
    data: Box<[u8]>,
}

impl ByteBlock {
    /// Creates a block from an owned buffer, taking over its allocation.
    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
        }
    }

    /// Creates a block holding the first `len` bytes of `buf`.
    ///
    /// This is the read-completion path: the reactor filled `len` bytes of a
    /// buffer allocated at `suggested` size, and the surplus capacity is
    /// returned to the allocator here.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds `buf.len()`.
    #[must_use]
    pub fn from_filled(mut buf: Vec<u8>, len: usize) -> Self {
        assert!(len <= buf.len(), "filled length exceeds buffer");
        buf.truncate(len);
        Self::from_vec(buf)
    }

    /// Returns the number of bytes in the block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the block holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the bytes as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the block, returning the underlying allocation.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_vec()
    }
}

impl Deref for ByteBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for ByteBlock {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for ByteBlock {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for ByteBlock {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

impl fmt::Debug for ByteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteBlock({} bytes)", self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_filled_truncates_to_read_length() {
        let buf = vec![1, 2, 3, 4, 5, 0, 0, 0];
        let block = ByteBlock::from_filled(buf, 5);
        assert_eq!(block.len(), 5);
        assert_eq!(block.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    #[should_panic(expected = "filled length exceeds buffer")]
    fn from_filled_rejects_overlong_length() {
        let _ = ByteBlock::from_filled(vec![0; 4], 5);
    }

    #[test]
    fn round_trips_the_allocation() {
        let block = ByteBlock::from_vec(vec![9, 8, 7]);
        assert_eq!(block.into_vec(), vec![9, 8, 7]);
    }

    #[test]
    fn empty_block() {
        let block = ByteBlock::from_vec(Vec::new());
        assert!(block.is_empty());
        assert_eq!(block.len(), 0);
    }
}
