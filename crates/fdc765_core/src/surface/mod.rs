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

    surface::mod.rs

    Physical representation of a disk surface.

    A Surface holds one TrackSurface per track. Every track buffer has the same
    length, fixed by the disk density, and carries three parallel bit planes
    after the raw bytes:

      [ track bytes (bpt) | clock plane | FM mark plane | weak plane ]

    Each plane holds one bit per track byte. The clock plane flags bytes written
    with a missing clock (address marks), the FM plane flags bytes recorded in FM,
    and the weak plane flags bytes belonging to weak sector copies.
*/

mod decode;
mod writer;

pub use writer::{TrackWriter, MAX_SIDES, MAX_TRACKS_PER_SIDE};

use crate::{crc::Crc16, device_types::chs::DiskChsn};
use fdc765_common::BitBuffer;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use thiserror::Error;

pub const MARK_INDEX: u8 = 0xFC;
pub const MARK_ID: u8 = 0xFE;
pub const MARK_DATA: u8 = 0xFB;
pub const MARK_DELETED: u8 = 0xF8;
pub const MFM_SYNC_MARK: u8 = 0xA1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("unsupported disk geometry: {0}")]
    Geometry(String),
    #[error("malformed track or sector: {0}")]
    Format(String),
    #[error("track length of {0} bytes exceeds the highest supported density")]
    UnsupportedDensity(usize),
}

/// Densities in ascending order of track capacity.
#[derive(Copy, Clone, Debug, Display, EnumIter, PartialEq, Eq)]
pub enum Density {
    #[strum(serialize = "SD")]
    Sd,
    #[strum(serialize = "8\" SD")]
    Sd8,
    #[strum(serialize = "DD")]
    Dd,
    #[strum(serialize = "DD+")]
    DdPlus,
    #[strum(serialize = "8\" DD")]
    Dd8,
    #[strum(serialize = "HD")]
    Hd,
}

impl Density {
    /// Canonical track length in bytes for this density.
    pub fn bytes_per_track(&self) -> usize {
        match self {
            Density::Sd => 3125,
            Density::Sd8 => 5208,
            Density::Dd => 6250,
            Density::DdPlus => 6500,
            Density::Dd8 => 10416,
            Density::Hd => 12500,
        }
    }

    /// Select the lowest density able to hold a track of `len` bytes.
    pub fn from_track_length(len: usize) -> Result<Density, SurfaceError> {
        Density::iter()
            .find(|d| len <= d.bytes_per_track())
            .ok_or(SurfaceError::UnsupportedDensity(len))
    }
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Encoding {
    #[strum(serialize = "FM")]
    Fm,
    #[strum(serialize = "MFM")]
    Mfm,
}

/// Gap, sync and mark layout for one encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GapProfile {
    pub encoding: Encoding,
    pub gap_byte: u8,
    pub sync_byte: u8,
    pub sync_len: usize,
    /// Sync mark preceding each address mark, repeated three times. FM has none.
    pub mark: Option<u8>,
    /// Gap lengths: [GAP0, GAP1, GAP2, GAP3].
    pub len: [usize; 4],
}

impl GapProfile {
    pub const FM: GapProfile = GapProfile {
        encoding: Encoding::Fm,
        gap_byte: 0xFF,
        sync_byte: 0x00,
        sync_len: 6,
        mark: None,
        len: [0, 16, 11, 10],
    };

    pub const MFM: GapProfile = GapProfile {
        encoding: Encoding::Mfm,
        gap_byte: 0x4E,
        sync_byte: 0x00,
        sync_len: 12,
        mark: Some(MFM_SYNC_MARK),
        len: [0, 32, 22, 24],
    };

    pub fn for_encoding(encoding: Encoding) -> GapProfile {
        match encoding {
            Encoding::Fm => GapProfile::FM,
            Encoding::Mfm => GapProfile::MFM,
        }
    }

    /// A GAP3 byte of 0xFF in an image selects FM.
    pub fn from_gap3(gap3: u8) -> GapProfile {
        if gap3 == 0xFF {
            GapProfile::FM
        }
        else {
            GapProfile::MFM
        }
    }

    #[inline]
    pub fn mark_len(&self) -> usize {
        if self.mark.is_some() {
            3
        }
        else {
            0
        }
    }

    /// Sync, index mark and GAP1 at the start of a track.
    pub fn track_header_len(&self) -> usize {
        self.sync_len + self.mark_len() + 1 + self.len[1]
    }

    /// Full length of a sector: ID block, GAP2, data block and GAP3.
    pub fn sector_len(&self, block_len: usize) -> usize {
        self.sync_len + self.mark_len() + 7 + self.len[2] + self.sync_len + self.mark_len() + 1 + block_len + 2 + self.len[3]
    }
}

/// A byte range within a track. Ranges may wrap past the end of the track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

impl Span {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MarkKind {
    Index,
    Id,
    Data,
    Deleted,
    Other(u8),
}

impl From<u8> for MarkKind {
    fn from(byte: u8) -> Self {
        match byte {
            MARK_INDEX => MarkKind::Index,
            MARK_ID => MarkKind::Id,
            MARK_DATA => MarkKind::Data,
            MARK_DELETED => MarkKind::Deleted,
            b => MarkKind::Other(b),
        }
    }
}

/// An address mark located on a track.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressMark {
    pub kind: MarkKind,
    /// Offset of the first mark byte (the first 0xA1 in MFM). CRC accumulation starts here.
    pub offset: usize,
    /// Offset of the first byte after the mark.
    pub field: usize,
}

#[derive(Clone, Debug, Default)]
pub struct SectorSurface {
    pub id: DiskChsn,
    /// Sync, ID address mark, ID field, CRC and GAP2.
    pub header: Span,
    /// ID address mark through the ID CRC.
    pub id_field: Span,
    /// Sync and data address mark.
    pub prefix: Span,
    /// Data area of the declared size.
    pub data: Span,
    /// Data CRC and GAP3.
    pub tail: Span,
    pub deleted: bool,
    pub weak_copies: usize,
    pub copy_index: usize,
    /// Bytes stored in the data block, covering every weak copy.
    pub stored_len: usize,
}

impl SectorSurface {
    /// Return the offset of the copy to be read next and advance the copy index.
    pub fn next_copy_offset(&mut self) -> usize {
        let copies = self.weak_copies.max(1);
        let offset = self.data.start + (self.copy_index % copies) * self.data.len;
        self.copy_index = (self.copy_index + 1) % copies;
        offset
    }

    pub fn is_weak(&self) -> bool {
        self.weak_copies > 1
    }

    /// Offset of the data CRC.
    pub fn crc_offset(&self) -> usize {
        self.data.start + self.data.len.max(self.stored_len)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Plane {
    Clock,
    FmMark,
    Weak,
}

#[derive(Clone, Debug)]
pub struct TrackSurface {
    raw: Vec<u8>,
    bpt: usize,
    pub(crate) encoding: Encoding,
    pub(crate) formatted: bool,
    pub(crate) header: Span,
    pub(crate) sectors: Vec<SectorSurface>,
}

#[inline]
fn plane_len(bpt: usize) -> usize {
    bpt.div_ceil(8)
}

impl TrackSurface {
    /// Create a blank, unformatted track filled with the encoding's gap byte.
    pub fn new(bpt: usize, encoding: Encoding) -> Self {
        let mut raw = vec![0u8; bpt + 3 * plane_len(bpt)];
        raw[..bpt].fill(GapProfile::for_encoding(encoding).gap_byte);
        Self {
            raw,
            bpt,
            encoding,
            formatted: false,
            header: Span::default(),
            sectors: Vec::new(),
        }
    }

    #[inline]
    pub fn bytes_per_track(&self) -> usize {
        self.bpt
    }

    /// Total buffer length, including the bit planes.
    pub fn buffer_len(&self) -> usize {
        self.raw.len()
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn profile(&self) -> GapProfile {
        GapProfile::for_encoding(self.encoding)
    }

    pub fn is_formatted(&self) -> bool {
        self.formatted
    }

    pub fn header(&self) -> Span {
        self.header
    }

    pub fn sectors(&self) -> &[SectorSurface] {
        &self.sectors
    }

    pub fn sectors_mut(&mut self) -> &mut [SectorSurface] {
        &mut self.sectors
    }

    /// Raw track bytes, without the bit planes.
    pub fn data(&self) -> &[u8] {
        &self.raw[..self.bpt]
    }

    fn plane_range(&self, plane: Plane) -> std::ops::Range<usize> {
        let pl = plane_len(self.bpt);
        let base = self.bpt
            + match plane {
                Plane::Clock => 0,
                Plane::FmMark => pl,
                Plane::Weak => 2 * pl,
            };
        base..base + pl
    }

    pub fn plane(&self, plane: Plane) -> BitBuffer<&[u8]> {
        let range = self.plane_range(plane);
        BitBuffer::whole(&self.raw[range])
    }

    pub fn plane_mut(&mut self, plane: Plane) -> BitBuffer<&mut [u8]> {
        let range = self.plane_range(plane);
        BitBuffer::whole(&mut self.raw[range])
    }

    #[inline]
    pub fn read(&self, offset: usize) -> u8 {
        self.raw[offset % self.bpt]
    }

    #[inline]
    pub fn write(&mut self, offset: usize, byte: u8) {
        let bpt = self.bpt;
        self.raw[offset % bpt] = byte;
    }

    #[inline]
    pub fn test(&self, plane: Plane, offset: usize) -> bool {
        self.plane(plane).test_bit(offset % self.bpt).unwrap_or(false)
    }

    pub fn mark(&mut self, plane: Plane, offset: usize, value: bool) {
        let bit = offset % self.bpt;
        if let Err(e) = self.plane_mut(plane).set_bit(bit, value) {
            log::error!("TrackSurface::mark(): {}", e);
        }
    }

    /// Copy `span` out of the track, following wraparound.
    pub fn read_span(&self, span: Span) -> Vec<u8> {
        (span.start..span.end()).map(|o| self.read(o)).collect()
    }

    /// Return the address mark beginning at `offset`, if any.
    ///
    /// In FM an address mark is a single byte with a missing clock. In MFM it is three
    /// clock-flagged 0xA1 sync marks followed by the mark byte.
    pub fn mark_at(&self, offset: usize) -> Option<AddressMark> {
        if !self.test(Plane::Clock, offset) {
            return None;
        }
        match self.encoding {
            Encoding::Fm => Some(AddressMark {
                kind: MarkKind::from(self.read(offset)),
                offset,
                field: offset + 1,
            }),
            Encoding::Mfm => {
                for i in 0..3 {
                    if !self.test(Plane::Clock, offset + i) || self.read(offset + i) != MFM_SYNC_MARK {
                        return None;
                    }
                }
                Some(AddressMark {
                    kind: MarkKind::from(self.read(offset + 3)),
                    offset,
                    field: offset + 4,
                })
            }
        }
    }

    /// Run the CRC over `len` bytes starting at `offset` and report whether the residual is zero.
    pub fn crc_valid(&self, offset: usize, len: usize) -> bool {
        let mut crc = Crc16::new();
        for o in offset..offset + len {
            crc.add(self.read(o));
        }
        crc.is_valid()
    }

    /// Erase the track to an unformatted state.
    pub fn erase(&mut self) {
        let gap = self.profile().gap_byte;
        let bpt = self.bpt;
        self.raw[..bpt].fill(gap);
        self.raw[bpt..].fill(0);
        self.sectors.clear();
        self.header = Span::default();
        self.formatted = false;
    }
}

#[derive(Clone, Debug)]
pub struct Surface {
    pub(crate) density: Density,
    pub(crate) encoding: Encoding,
    pub(crate) bytes_per_track: usize,
    pub(crate) sides: u8,
    pub(crate) tracks_per_side: u8,
    pub(crate) format: crate::device_types::disk::DiskFormat,
    pub(crate) creator: Option<String>,
    pub(crate) tracks: Vec<TrackSurface>,
    pub(crate) dirty: bool,
}

impl Surface {
    pub fn density(&self) -> Density {
        self.density
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn bytes_per_track(&self) -> usize {
        self.bytes_per_track
    }

    pub fn sides(&self) -> u8 {
        self.sides
    }

    pub fn tracks_per_side(&self) -> u8 {
        self.tracks_per_side
    }

    pub fn creator(&self) -> Option<&str> {
        self.creator.as_deref()
    }

    pub fn tracks(&self) -> &[TrackSurface] {
        &self.tracks
    }

    /// True once the surface has been written to since it was created.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    pub fn track_index(&self, cylinder: u8, head: u8) -> Option<usize> {
        if head >= self.sides || cylinder >= self.tracks_per_side {
            return None;
        }
        Some(cylinder as usize * self.sides as usize + head as usize)
    }

    pub fn track(&self, cylinder: u8, head: u8) -> Option<&TrackSurface> {
        self.track_index(cylinder, head).and_then(|i| self.tracks.get(i))
    }

    pub fn track_mut(&mut self, cylinder: u8, head: u8) -> Option<&mut TrackSurface> {
        self.track_index(cylinder, head).and_then(move |i| self.tracks.get_mut(i))
    }
}
