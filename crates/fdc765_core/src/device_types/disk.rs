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

    device_types::disk.rs

    Structured disk description produced by an image parser and consumed by
    the surface encoder.
*/

//! A [DiskDescription] is the logical view of a disk: a list of tracks, each with a list of
//! sectors carrying their ID fields, status hints and data. It is produced once when an image
//! is loaded and is never mutated afterwards. The physical view lives in [crate::surface].

use crate::device_types::chs::{n_to_bytes, DiskChsn};

/// The container a description was read from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DiskFormat {
    #[default]
    Standard,
    Extended,
}

/// Recording hints carried by some image formats. These are informational; the encoding
/// actually used is selected from the first track's GAP3 byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum RecordingMode {
    #[default]
    Unknown,
    Fm,
    Mfm,
}

#[derive(Clone, Debug, Default)]
pub struct SectorDescription {
    pub id: DiskChsn,
    /// The sector carries a deleted data address mark.
    pub deleted: bool,
    /// The data field CRC is recorded as bad.
    pub data_crc_error: bool,
    /// The ID field CRC is recorded as bad.
    pub id_crc_error: bool,
    /// Stored data length. For weak sectors this covers every copy.
    pub actual_len: usize,
    pub data: Vec<u8>,
    /// Number of physical copies stored back to back. 1 for an ordinary sector.
    pub weak_copies: usize,
    /// Copy returned by the next read of a weak sector.
    pub copy_index: usize,
}

impl SectorDescription {
    /// Build an ordinary sector whose stored length matches its data.
    pub fn new(id: DiskChsn, data: Vec<u8>) -> Self {
        Self {
            id,
            actual_len: data.len(),
            data,
            weak_copies: 1,
            ..Default::default()
        }
    }

    pub fn with_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }

    pub fn with_data_crc_error(mut self, error: bool) -> Self {
        self.data_crc_error = error;
        self
    }

    pub fn with_id_crc_error(mut self, error: bool) -> Self {
        self.id_crc_error = error;
        self
    }

    /// Mark the sector as holding `copies` weak copies of its declared size.
    pub fn with_weak_copies(mut self, copies: usize) -> Self {
        self.weak_copies = copies.max(1);
        self
    }

    /// Size implied by the ID field's size code.
    pub fn declared_len(&self) -> usize {
        self.id.n_size()
    }

    pub fn is_weak(&self) -> bool {
        self.weak_copies > 1
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrackDescription {
    pub unformatted: bool,
    pub track_number: u8,
    pub side_number: u8,
    /// Data rate hint (0 unknown, 1 SD/DD, 2 HD, 3 ED).
    pub data_rate: u8,
    pub recording_mode: RecordingMode,
    /// Nominal sector size code for the track.
    pub sector_size: u8,
    pub sector_count: u8,
    pub gap3: u8,
    pub filler: u8,
    pub sectors: Vec<SectorDescription>,
}

impl TrackDescription {
    /// Build a formatted track from a list of sectors, with MFM defaults.
    pub fn new(track_number: u8, side_number: u8, sectors: Vec<SectorDescription>) -> Self {
        let sector_size = sectors.first().map(|s| s.id.n).unwrap_or(2);
        Self {
            unformatted: false,
            track_number,
            side_number,
            sector_size,
            sector_count: sectors.len() as u8,
            gap3: 0x4e,
            filler: 0xe5,
            sectors,
            ..Default::default()
        }
    }

    pub fn unformatted(track_number: u8, side_number: u8) -> Self {
        Self {
            unformatted: true,
            track_number,
            side_number,
            gap3: 0x4e,
            filler: 0xe5,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiskDescription {
    pub format: DiskFormat,
    pub sides: u8,
    pub tracks_per_side: u8,
    pub creator: Option<String>,
    /// Tracks in cylinder-major order: index = cylinder * sides + side.
    pub tracks: Vec<TrackDescription>,
}

impl DiskDescription {
    pub fn track(&self, cylinder: u8, side: u8) -> Option<&TrackDescription> {
        if side >= self.sides {
            return None;
        }
        self.tracks
            .get(cylinder as usize * self.sides as usize + side as usize)
    }

    /// Build a uniformly formatted disk. Sector data is filled with `filler`.
    /// Sector IDs are numbered from `first_sector`.
    pub fn uniform(sides: u8, tracks_per_side: u8, sectors: u8, n: u8, first_sector: u8, filler: u8) -> Self {
        let mut tracks = Vec::with_capacity(sides as usize * tracks_per_side as usize);
        for c in 0..tracks_per_side {
            for h in 0..sides {
                let sector_list = (0..sectors)
                    .map(|s| {
                        SectorDescription::new(
                            DiskChsn::new(c, h, first_sector.wrapping_add(s), n),
                            vec![filler; n_to_bytes(n)],
                        )
                    })
                    .collect();
                let mut track = TrackDescription::new(c, h, sector_list);
                track.filler = filler;
                tracks.push(track);
            }
        }
        Self {
            format: DiskFormat::Standard,
            sides,
            tracks_per_side,
            creator: None,
            tracks,
        }
    }
}
