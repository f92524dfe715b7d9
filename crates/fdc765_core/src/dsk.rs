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

    dsk.rs

    Parser for the CPCEMU DSK and Extended DSK disk image containers.

*/

//! A DSK image is a 256-byte disk header followed by one block per track. Each track block
//! opens with a 256-byte "Track-Info" header listing the sector IDs, FDC status bytes and
//! (for Extended DSK) stored lengths, followed by the sector data in the listed order.

use thiserror::Error;

use crate::{
    device_types::{
        chs::{n_to_bytes, DiskChsn},
        disk::{DiskDescription, DiskFormat, RecordingMode, SectorDescription, TrackDescription},
    },
    surface::{Surface, SurfaceError, MAX_SIDES, MAX_TRACKS_PER_SIDE},
};

pub const DSK_HEADER: &[u8] = b"MV - CPC";
pub const EDSK_HEADER: &[u8] = b"EXTENDED CPC DSK File\r\n";
pub const TRACK_INFO: &[u8] = b"Track-Info";

pub const DISK_HEADER_LEN: usize = 0x100;
pub const TRACK_HEADER_LEN: usize = 0x100;
const SECTOR_INFO_BASE: usize = 0x18;
const SECTOR_INFO_LEN: usize = 8;
const MAX_SECTORS: usize = (TRACK_HEADER_LEN - SECTOR_INFO_BASE) / SECTOR_INFO_LEN;

const FDC_ST1_DATA_ERROR: u8 = 0x20;
const FDC_ST2_DATA_ERROR: u8 = 0x20;
const FDC_ST2_CONTROL_MARK: u8 = 0x40;

#[derive(Debug, Error)]
pub enum DiskImageError {
    #[error("Unrecognized disk image header")]
    UnknownFormat,
    #[error("Unsupported geometry: {tracks} tracks, {sides} sides")]
    Geometry { tracks: u8, sides: u8 },
    #[error("Bad track header at offset {0:#x}")]
    BadTrackHeader(usize),
    #[error("Bad sector {sector} in track block at offset {offset:#x}: {reason}")]
    BadSectorHeader {
        offset: usize,
        sector: usize,
        reason: String,
    },
    #[error("Image truncated at offset {0:#x}")]
    Truncated(usize),
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Return true if `data` starts with a DSK or Extended DSK signature.
pub fn is_dsk(data: &[u8]) -> bool {
    data.starts_with(DSK_HEADER) || data.starts_with(EDSK_HEADER)
}

/// Parse a DSK image and encode it onto a disk surface.
pub fn load_dsk(data: &[u8]) -> Result<Surface, DiskImageError> {
    let desc = parse_dsk(data)?;
    Ok(Surface::encode(&desc)?)
}

fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], DiskImageError> {
    data.get(offset..offset + len).ok_or(DiskImageError::Truncated(offset))
}

/// Parse a DSK or Extended DSK image into a disk description.
pub fn parse_dsk(data: &[u8]) -> Result<DiskDescription, DiskImageError> {
    let format = if data.starts_with(EDSK_HEADER) {
        DiskFormat::Extended
    }
    else if data.starts_with(DSK_HEADER) {
        DiskFormat::Standard
    }
    else {
        return Err(DiskImageError::UnknownFormat);
    };

    let header = slice(data, 0, DISK_HEADER_LEN)?;
    let mut tracks_per_side = header[0x30];
    let sides = header[0x31];
    if sides < 1 || sides > MAX_SIDES || tracks_per_side < 1 || tracks_per_side > MAX_TRACKS_PER_SIDE {
        return Err(DiskImageError::Geometry {
            tracks: tracks_per_side,
            sides,
        });
    }

    let creator = String::from_utf8_lossy(&header[0x22..0x30])
        .trim_end_matches(['\0', ' '])
        .to_string();

    let track_ct = tracks_per_side as usize * sides as usize;
    let standard_size = u16::from_le_bytes([header[0x32], header[0x33]]) as usize;
    let block_size = |i: usize| match format {
        DiskFormat::Extended => header.get(0x34 + i).copied().unwrap_or(0) as usize * 0x100,
        DiskFormat::Standard => standard_size,
    };

    log::debug!(
        "parse_dsk(): {:?} image, {} tracks per side, {} sides, creator: {}",
        format,
        tracks_per_side,
        sides,
        creator
    );

    let mut slots: Vec<Option<TrackDescription>> = vec![None; track_ct];
    let mut offset = DISK_HEADER_LEN;

    for i in 0..track_ct {
        let size = block_size(i);
        if size == 0 {
            // Blank track in an Extended DSK.
            continue;
        }
        if offset >= data.len() {
            // The header may list more tracks than the file stores.
            let stored = i.div_ceil(sides as usize);
            log::warn!(
                "parse_dsk(): image holds {} of {} tracks, truncating to {} tracks per side",
                i,
                track_ct,
                stored
            );
            tracks_per_side = stored.max(1) as u8;
            break;
        }

        let block = slice(data, offset, size.max(TRACK_HEADER_LEN))?;
        let track = parse_track(block, offset, format)?;
        let slot = track.track_number as usize * sides as usize + track.side_number as usize;
        if track.side_number >= sides || slot >= track_ct {
            return Err(DiskImageError::BadTrackHeader(offset));
        }
        slots[slot] = Some(track);
        offset += size;
    }

    let tracks = slots
        .into_iter()
        .take(tracks_per_side as usize * sides as usize)
        .enumerate()
        .map(|(i, slot)| {
            slot.unwrap_or_else(|| {
                TrackDescription::unformatted((i / sides as usize) as u8, (i % sides as usize) as u8)
            })
        })
        .collect();

    Ok(DiskDescription {
        format,
        sides,
        tracks_per_side,
        creator: if creator.is_empty() { None } else { Some(creator) },
        tracks,
    })
}

fn parse_track(block: &[u8], offset: usize, format: DiskFormat) -> Result<TrackDescription, DiskImageError> {
    if !block.starts_with(TRACK_INFO) {
        return Err(DiskImageError::BadTrackHeader(offset));
    }

    let sector_ct = block[0x15] as usize;
    if sector_ct > MAX_SECTORS {
        return Err(DiskImageError::BadTrackHeader(offset));
    }

    let mut sectors = Vec::with_capacity(sector_ct);
    let mut data_pos = TRACK_HEADER_LEN;

    for j in 0..sector_ct {
        let info = &block[SECTOR_INFO_BASE + j * SECTOR_INFO_LEN..SECTOR_INFO_BASE + (j + 1) * SECTOR_INFO_LEN];
        let id = DiskChsn::new(info[0], info[1], info[2], info[3]);
        let (st1, st2) = (info[4], info[5]);
        let declared = n_to_bytes(id.n());
        let stored = match format {
            DiskFormat::Extended => u16::from_le_bytes([info[6], info[7]]) as usize,
            DiskFormat::Standard => declared,
        };

        let weak_copies = if stored > declared {
            if stored % declared != 0 {
                return Err(DiskImageError::BadSectorHeader {
                    offset,
                    sector: j,
                    reason: format!("stored length {} is not a multiple of {}", stored, declared),
                });
            }
            stored / declared
        }
        else {
            1
        };

        let data = block
            .get(data_pos..data_pos + stored)
            .ok_or(DiskImageError::Truncated(offset + data_pos))?
            .to_vec();
        data_pos += stored;

        let data_error = st1 & FDC_ST1_DATA_ERROR != 0;
        let data_crc_error = data_error && st2 & FDC_ST2_DATA_ERROR != 0;
        let id_crc_error = data_error && st2 & FDC_ST2_DATA_ERROR == 0;

        let mut sector = SectorDescription::new(id, data)
            .with_deleted(st2 & FDC_ST2_CONTROL_MARK != 0)
            .with_data_crc_error(data_crc_error)
            .with_id_crc_error(id_crc_error);
        if weak_copies > 1 {
            log::trace!("parse_track(): sector {} has {} weak copies", id, weak_copies);
            sector = sector.with_weak_copies(weak_copies);
        }
        sectors.push(sector);
    }

    let mut track = TrackDescription::new(block[0x10], block[0x11], sectors);
    track.data_rate = block[0x12];
    track.recording_mode = match block[0x13] {
        1 => RecordingMode::Fm,
        2 => RecordingMode::Mfm,
        _ => RecordingMode::Unknown,
    };
    track.sector_size = block[0x14];
    track.gap3 = block[0x16];
    track.filler = block[0x17];
    Ok(track)
}
