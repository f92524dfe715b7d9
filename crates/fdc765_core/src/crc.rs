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

    crc.rs

    CRC16 engine used by the FM/MFM address and data fields.
*/

//! The floppy controller protects each ID field and each data field with a CRC-CCITT
//! checksum (polynomial 0x1021, MSB first). The accumulator is preset to 0xFFFF at the
//! start of every field, including the address mark bytes. Folding the two stored CRC
//! bytes into the accumulator leaves a zero residual when the field is intact.

pub const CRC_PRESET: u16 = 0xFFFF;
const CRC_POLY: u16 = 0x1021;

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ CRC_POLY } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u16; 256] = build_table();

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self { value: CRC_PRESET }
    }
}

impl Crc16 {
    pub fn new() -> Self {
        Default::default()
    }

    /// Preset the accumulator for a new field.
    #[inline]
    pub fn reset(&mut self) {
        self.value = CRC_PRESET;
    }

    #[inline]
    pub fn add(&mut self, byte: u8) {
        let idx = ((self.value >> 8) as u8 ^ byte) as usize;
        self.value = (self.value << 8) ^ CRC_TABLE[idx];
    }

    pub fn add_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.add(b);
        }
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.value
    }

    /// High byte, written first on the media.
    #[inline]
    pub fn msb(&self) -> u8 {
        (self.value >> 8) as u8
    }

    #[inline]
    pub fn lsb(&self) -> u8 {
        self.value as u8
    }

    /// True once the two trailing CRC bytes of an intact field have been folded in.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.value == 0
    }
}

/// Compute the CRC of a complete byte run from the preset value.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.add_slice(bytes);
    crc.value()
}
