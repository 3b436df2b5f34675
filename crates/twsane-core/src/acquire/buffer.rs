//! Append-only scan buffer.
//!
//! Capacity grows by the size the buffer was created with, never
//! exponentially. Scan sizes are predictable enough from resolution and
//! area that the first guess is usually right.

use tracing::debug;

use crate::error::TwainError;

#[derive(Debug)]
pub struct Buffer {
    /// Zero-filled up to the current capacity.
    data: Vec<u8>,
    increment: usize,
    offset: usize,
    claimed: bool,
}

impl Buffer {
    pub fn new(size: usize) -> Result<Self, TwainError> {
        let mut buffer = Self {
            data: Vec::new(),
            increment: size.max(1),
            offset: 0,
            claimed: false,
        };
        buffer.grow_to(buffer.increment)?;
        Ok(buffer)
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.offset]
    }

    fn grow_to(&mut self, needed: usize) -> Result<(), TwainError> {
        if needed <= self.data.len() {
            return Ok(());
        }
        let steps = (needed - self.data.len()).div_ceil(self.increment);
        let target = steps
            .checked_mul(self.increment)
            .and_then(|extra| extra.checked_add(self.data.len()))
            .ok_or(TwainError::ResourceExhaustion { requested: needed })?;
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| TwainError::ResourceExhaustion { requested: target })?;
        self.data.resize(target, 0);
        debug!(capacity = target, "Scan buffer grown");
        Ok(())
    }

    /// Writable space for at least `n` more bytes. The write offset does
    /// not move until [`release`](Self::release) is called.
    pub fn reserve(&mut self, n: usize) -> Result<&mut [u8], TwainError> {
        if self.claimed {
            return Ok(&mut []);
        }
        let needed = self
            .offset
            .checked_add(n)
            .ok_or(TwainError::ResourceExhaustion { requested: n })?;
        self.grow_to(needed)?;
        Ok(&mut self.data[self.offset..])
    }

    /// Commit `n` bytes written into the last reserved space.
    pub fn release(&mut self, n: usize) {
        if !self.claimed {
            self.offset = (self.offset + n).min(self.data.len());
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), TwainError> {
        if self.claimed {
            return Ok(());
        }
        let n = bytes.len();
        self.reserve(n)?[..n].copy_from_slice(bytes);
        self.release(n);
        Ok(())
    }

    /// Take the written bytes, trimmed to their exact length. Later writes
    /// are ignored.
    pub fn claim(&mut self) -> Vec<u8> {
        if self.claimed {
            return Vec::new();
        }
        self.claimed = true;
        let mut data = std::mem::take(&mut self.data);
        data.truncate(self.offset);
        data.shrink_to_fit();
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn test_growth_preserves_data() {
        let input = pattern(10_000);
        for chunk in [1, 7, 64, 333, 1000, 4096] {
            let mut buffer = Buffer::new(1024).unwrap();
            for part in input.chunks(chunk) {
                buffer.write(part).unwrap();
            }
            assert_eq!(buffer.len(), input.len());
            assert_eq!(buffer.claim(), input, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_constant_increment() {
        let mut buffer = Buffer::new(100).unwrap();
        assert_eq!(buffer.capacity(), 100);
        buffer.write(&[1; 101]).unwrap();
        assert_eq!(buffer.capacity(), 200);
        buffer.write(&[2; 250]).unwrap();
        assert_eq!(buffer.capacity(), 400);
    }

    #[test]
    fn test_reserve_does_not_advance() {
        let mut buffer = Buffer::new(16).unwrap();
        let space = buffer.reserve(40).unwrap();
        assert!(space.len() >= 40);
        space[..3].copy_from_slice(b"abc");
        assert_eq!(buffer.len(), 0);
        buffer.release(3);
        assert_eq!(buffer.as_slice(), b"abc");
    }

    #[test]
    fn test_claim_is_one_shot() {
        let mut buffer = Buffer::new(8).unwrap();
        buffer.write(b"scan").unwrap();
        let data = buffer.claim();
        assert_eq!(data, b"scan");
        assert_eq!(data.capacity(), 4);

        buffer.write(b"more").unwrap();
        assert!(buffer.reserve(10).unwrap().is_empty());
        buffer.release(10);
        assert!(buffer.is_claimed());
        assert!(buffer.claim().is_empty());
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let err = Buffer::new(isize::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, TwainError::ResourceExhaustion { .. }));
    }
}
