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

    device_types::chs.rs

    Sector identifier as recorded in a floppy ID field.
*/

//! Define a [DiskChsn] that represents the cylinder, head, record and size code
//! fields of a sector ID, exactly as they are written in an ID address field.
//! None of these fields need to match the physical location of the sector.

use std::fmt::Display;

/// A structure representing a sector ID
///  - Cylinder (c)
///  - Head (h)
///  - Record, or sector ID (r)
///  - Size code (n), where the sector size is `128 << n`
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct DiskChsn {
    pub(crate) c: u8,
    pub(crate) h: u8,
    pub(crate) r: u8,
    pub(crate) n: u8,
}

impl Default for DiskChsn {
    fn default() -> Self {
        Self { c: 0, h: 0, r: 1, n: 2 }
    }
}

impl From<(u8, u8, u8, u8)> for DiskChsn {
    fn from((c, h, r, n): (u8, u8, u8, u8)) -> Self {
        Self { c, h, r, n }
    }
}

impl From<DiskChsn> for (u8, u8, u8, u8) {
    fn from(chsn: DiskChsn) -> Self {
        (chsn.c, chsn.h, chsn.r, chsn.n)
    }
}

impl From<[u8; 4]> for DiskChsn {
    fn from(bytes: [u8; 4]) -> Self {
        Self {
            c: bytes[0],
            h: bytes[1],
            r: bytes[2],
            n: bytes[3],
        }
    }
}

impl Display for DiskChsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{:2} h:{} r:{:3} n:{}]", self.c, self.h, self.r, self.n)
    }
}

impl DiskChsn {
    /// Create a new `DiskChsn` structure from cylinder, head, record and size code components.
    pub fn new(c: u8, h: u8, r: u8, n: u8) -> Self {
        Self { c, h, r, n }
    }
    /// Return the cylinder (c) field.
    #[inline]
    pub fn c(&self) -> u8 {
        self.c
    }
    /// Return the head (h) field.
    #[inline]
    pub fn h(&self) -> u8 {
        self.h
    }
    /// Return the record (r) field.
    #[inline]
    pub fn r(&self) -> u8 {
        self.r
    }
    /// Return the size code (n) field.
    #[inline]
    pub fn n(&self) -> u8 {
        self.n
    }
    #[inline]
    pub fn set_c(&mut self, c: u8) {
        self.c = c;
    }
    #[inline]
    pub fn set_h(&mut self, h: u8) {
        self.h = h;
    }
    #[inline]
    pub fn set_r(&mut self, r: u8) {
        self.r = r;
    }
    /// Return the four ID bytes in recording order.
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.c, self.h, self.r, self.n]
    }
    /// Return the size in bytes implied by the size code. Codes above 8 are clamped, as the
    /// controller only decodes the low bits of N.
    pub fn n_size(&self) -> usize {
        n_to_bytes(self.n)
    }
}

/// Convert a sector size code into a byte length.
#[inline]
pub fn n_to_bytes(n: u8) -> usize {
    0x80usize << n.min(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chsn_size_codes() {
        assert_eq!(DiskChsn::new(0, 0, 1, 0).n_size(), 128);
        assert_eq!(DiskChsn::new(0, 0, 1, 2).n_size(), 512);
        assert_eq!(DiskChsn::new(0, 0, 1, 6).n_size(), 8192);
        assert_eq!(DiskChsn::new(0, 0, 1, 0xff).n_size(), 0x8000);
    }

    #[test]
    fn chsn_display() {
        let chsn = DiskChsn::from([10, 1, 0xC1, 2]);
        assert_eq!(chsn.to_string(), "[c:10 h:1 r:193 n:2]");
        assert_eq!(<(u8, u8, u8, u8)>::from(chsn), (10, 1, 0xC1, 2));
    }
}
