//! Growable output buffer shared by both encoders.
//!
//! Wraps the destination vector so every write goes through one growth
//! policy: on insufficient capacity, reserve to `max(8, ceil(1.5 x
//! required))`. Works over an encoder-owned vector or a caller-supplied
//! one written from a chosen offset ("encode into" mode).

use crate::error::{bail, Result};

/// Default initial reservation for an encode call.
pub(crate) const DEFAULT_WRITE_BUFFER: usize = 512;
/// Smallest configurable reservation.
pub(crate) const MIN_WRITE_BUFFER: usize = 32;

pub(crate) struct OutBuf<'a> {
    vec: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> OutBuf<'a> {
    pub(crate) fn new(vec: &'a mut Vec<u8>, reserve: usize) -> Self {
        let start = vec.len();
        let mut buf = OutBuf { vec, start };
        buf.grow(reserve);
        buf
    }

    /// Start writing into `vec` at `offset`: `-1` appends, larger-than-len
    /// clamps to the end. The tail past the write position is discarded;
    /// on success the vector's length is exactly offset + written.
    pub(crate) fn at_offset(
        vec: &'a mut Vec<u8>,
        offset: isize,
        reserve: usize,
    ) -> Result<Self> {
        let start = match offset {
            -1 => vec.len(),
            o if o < 0 => bail!(Encode, "invalid buffer offset {}", o),
            o => (o as usize).min(vec.len()),
        };
        vec.truncate(start);
        let mut buf = OutBuf { vec, start };
        buf.grow(reserve);
        Ok(buf)
    }

    fn grow(&mut self, additional: usize) {
        let required = self.vec.len() + additional;
        if required > self.vec.capacity() {
            // ceil(1.5 x required), floor 8
            let target = usize::max(8, required + (required + 1) / 2);
            self.vec.reserve_exact(target - self.vec.len());
        }
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.grow(1);
        self.vec.push(byte);
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.grow(bytes.len());
        self.vec.extend_from_slice(bytes);
    }

    pub(crate) fn written(&self) -> usize {
        self.vec.len() - self.start
    }

    /// Last byte written through this buffer, if any.
    pub(crate) fn last(&self) -> Option<u8> {
        if self.vec.len() > self.start {
            self.vec.last().copied()
        } else {
            None
        }
    }

    pub(crate) fn overwrite_last(&mut self, byte: u8) {
        debug_assert!(self.vec.len() > self.start);
        if let Some(slot) = self.vec.last_mut() {
            *slot = byte;
        }
    }

    /// Error path: roll the vector back to the write offset.
    pub(crate) fn rewind(&mut self) {
        self.vec.truncate(self.start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_policy() {
        let mut vec = Vec::new();
        let mut buf = OutBuf::new(&mut vec, 0);
        buf.push(1);
        // 1 required -> max(8, 2) = 8
        assert_eq!(vec.capacity(), 8);
        let mut buf = OutBuf::new(&mut vec, 0);
        buf.extend(&[0; 19]);
        // 20 required -> 30
        assert_eq!(vec.capacity(), 30);
    }

    #[test]
    fn test_offset_modes() {
        let mut vec = vec![1, 2, 3, 4];
        let mut buf = OutBuf::at_offset(&mut vec, -1, 0).unwrap();
        buf.extend(&[9]);
        assert_eq!(vec, [1, 2, 3, 4, 9]);

        let mut buf = OutBuf::at_offset(&mut vec, 2, 0).unwrap();
        buf.extend(&[7, 8]);
        assert_eq!(buf.written(), 2);
        assert_eq!(vec, [1, 2, 7, 8]);

        // beyond-the-end offsets clamp to the end
        let mut buf = OutBuf::at_offset(&mut vec, 100, 0).unwrap();
        buf.push(5);
        assert_eq!(vec, [1, 2, 7, 8, 5]);

        assert!(OutBuf::at_offset(&mut vec, -2, 0).is_err());
    }

    #[test]
    fn test_rewind() {
        let mut vec = vec![1, 2];
        let mut buf = OutBuf::at_offset(&mut vec, -1, 0).unwrap();
        buf.extend(&[3, 4]);
        buf.rewind();
        assert_eq!(vec, [1, 2]);
    }
}
