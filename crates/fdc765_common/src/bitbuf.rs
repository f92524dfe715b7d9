/*
    fdc765
    NEC uPD765 floppy disk controller emulator

    Copyright 2025 The fdc765 Authors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    common::bitbuf.rs

    A byte buffer view that is also addressable per bit.

    The disk surface keeps a clock plane, an FM mark plane and a weak-bit plane
    alongside the raw track bytes. Each plane holds one bit per track byte, so
    bit n of a plane describes byte n of the track.
*/

use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum BitBufferError {
    #[error("index {index} out of range for buffer of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

/// A window of `len` bytes starting at `start` within some backing storage `B`.
///
/// Byte accessors take an index relative to the window. Bit accessors take a bit
/// index where `byte = bit >> 3` and `mask = 1 << (bit & 7)`.
#[derive(Clone, Debug)]
pub struct BitBuffer<B> {
    buf:   B,
    start: usize,
    len:   usize,
}

impl<B: AsRef<[u8]>> BitBuffer<B> {
    pub fn new(buf: B, start: usize, len: usize) -> Result<Self, BitBufferError> {
        let backing_len = buf.as_ref().len();
        if start.checked_add(len).map_or(true, |end| end > backing_len) {
            return Err(BitBufferError::IndexOutOfRange {
                index: start.saturating_add(len),
                len:   backing_len,
            });
        }
        Ok(Self { buf, start, len })
    }

    /// Wrap the entirety of `buf`.
    pub fn whole(buf: B) -> Self {
        let len = buf.as_ref().len();
        Self { buf, start: 0, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn bit_len(&self) -> usize {
        self.len * 8
    }

    #[inline]
    fn check(&self, index: usize) -> Result<usize, BitBufferError> {
        if index >= self.len {
            return Err(BitBufferError::IndexOutOfRange { index, len: self.len });
        }
        Ok(self.start + index)
    }

    pub fn get(&self, index: usize) -> Result<u8, BitBufferError> {
        let offset = self.check(index)?;
        Ok(self.buf.as_ref()[offset])
    }

    /// Return the addressed bit as 0 or 1.
    pub fn get_bit(&self, bit: usize) -> Result<u8, BitBufferError> {
        let byte = self.check(bit >> 3).map_err(|_| BitBufferError::IndexOutOfRange {
            index: bit,
            len:   self.bit_len(),
        })?;
        Ok((self.buf.as_ref()[byte] >> (bit & 7)) & 0x01)
    }

    pub fn test_bit(&self, bit: usize) -> Result<bool, BitBufferError> {
        Ok(self.get_bit(bit)? != 0)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BitBuffer<B> {
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), BitBufferError> {
        let offset = self.check(index)?;
        self.buf.as_mut()[offset] = value;
        Ok(())
    }

    pub fn set_bit(&mut self, bit: usize, value: bool) -> Result<(), BitBufferError> {
        let byte = self.check(bit >> 3).map_err(|_| BitBufferError::IndexOutOfRange {
            index: bit,
            len:   self.bit_len(),
        })?;
        let mask = 1u8 << (bit & 7);
        if value {
            self.buf.as_mut()[byte] |= mask;
        }
        else {
            self.buf.as_mut()[byte] &= !mask;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitbuf_window_is_relative() {
        let mut backing = vec![0u8; 16];
        let mut bb = BitBuffer::new(&mut backing[..], 4, 8).unwrap();
        bb.set(0, 0xAA).unwrap();
        bb.set_bit(9, true).unwrap();
        assert_eq!(bb.get(0).unwrap(), 0xAA);
        assert_eq!(bb.get(1).unwrap(), 0x02);
        assert!(bb.test_bit(9).unwrap());
        assert!(!bb.test_bit(8).unwrap());
        drop(bb);
        assert_eq!(backing[4], 0xAA);
        assert_eq!(backing[5], 0x02);
    }

    #[test]
    fn bitbuf_clear_bit() {
        let mut bb = BitBuffer::whole(vec![0xFFu8; 2]);
        bb.set_bit(3, false).unwrap();
        assert_eq!(bb.get(0).unwrap(), 0xF7);
        assert_eq!(bb.get_bit(3).unwrap(), 0);
        assert_eq!(bb.get_bit(4).unwrap(), 1);
    }

    #[test]
    fn bitbuf_out_of_range() {
        let bb = BitBuffer::whole([0u8; 2]);
        assert_eq!(bb.get(2), Err(BitBufferError::IndexOutOfRange { index: 2, len: 2 }));
        assert_eq!(bb.get_bit(16), Err(BitBufferError::IndexOutOfRange { index: 16, len: 16 }));
        assert!(BitBuffer::new([0u8; 4], 2, 3).is_err());
        assert!(BitBuffer::new([0u8; 4], 2, 2).is_ok());
    }
}
