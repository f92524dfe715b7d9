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

    surface::writer.rs

    Track writer and the DiskDescription encoder.

    The TrackWriter lays down gaps, sync runs, address marks and CRC-protected
    fields at a running position. The encoder uses it to build a Surface from a
    DiskDescription, and the controller uses it to carry out Format commands.
*/

use crate::{
    crc::Crc16,
    device_types::{
        chs::DiskChsn,
        disk::{DiskDescription, SectorDescription, TrackDescription},
    },
    surface::{
        Density, Encoding, GapProfile, Plane, SectorSurface, Span, Surface, SurfaceError, TrackSurface,
        MARK_DATA, MARK_DELETED, MARK_ID, MARK_INDEX,
    },
};

pub const MAX_SIDES: u8 = 2;
pub const MAX_TRACKS_PER_SIDE: u8 = 85;

pub struct TrackWriter<'a> {
    track: &'a mut TrackSurface,
    profile: GapProfile,
    pos: usize,
    crc: Crc16,
    crc_enabled: bool,
}

impl<'a> TrackWriter<'a> {
    pub fn new(track: &'a mut TrackSurface, pos: usize) -> Self {
        let profile = track.profile();
        Self {
            track,
            profile,
            pos,
            crc: Crc16::new(),
            crc_enabled: true,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn profile(&self) -> GapProfile {
        self.profile
    }

    fn put(&mut self, byte: u8, missing_clock: bool) {
        let pos = self.pos;
        self.track.write(pos, byte);
        self.track.mark(Plane::Clock, pos, missing_clock);
        self.track.mark(Plane::FmMark, pos, self.profile.encoding == Encoding::Fm);
        self.track.mark(Plane::Weak, pos, false);
        if self.crc_enabled {
            self.crc.add(byte);
        }
        self.pos += 1;
    }

    pub fn gap(&mut self, len: usize, byte: u8) {
        for _ in 0..len {
            self.put(byte, false);
        }
    }

    pub fn sync(&mut self) {
        let (len, byte) = (self.profile.sync_len, self.profile.sync_byte);
        self.gap(len, byte);
    }

    /// Write an address mark and restart the CRC at its first byte.
    pub fn address_mark(&mut self, mark: u8) {
        self.crc.reset();
        self.crc_enabled = true;
        match self.profile.mark {
            Some(sync_mark) => {
                for _ in 0..3 {
                    self.put(sync_mark, true);
                }
                self.put(mark, false);
            }
            None => self.put(mark, true),
        }
    }

    pub fn bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.put(b, false);
        }
    }

    /// Write the two CRC bytes of the current field. An inverted CRC records a CRC error.
    pub fn crc(&mut self, invert: bool) {
        let value = if invert { !self.crc.value() } else { self.crc.value() };
        self.crc_enabled = false;
        self.put((value >> 8) as u8, false);
        self.put(value as u8, false);
    }

    /// Write the sync run, index address mark and GAP1 that open a track.
    pub fn track_header(&mut self) -> Span {
        let start = self.pos;
        self.sync();
        self.address_mark(MARK_INDEX);
        self.crc_enabled = false;
        let gap = self.profile.gap_byte;
        self.gap(self.profile.len[1], gap);
        Span::new(start, self.pos - start)
    }

    /// Write the ID block of a sector: sync, ID address mark, C/H/R/N, CRC and GAP2.
    /// Returns the header and ID field spans.
    pub fn id_block(&mut self, id: DiskChsn, crc_error: bool) -> (Span, Span) {
        let start = self.pos;
        self.sync();
        let id_start = self.pos;
        self.address_mark(MARK_ID);
        self.bytes(&id.to_bytes());
        self.crc(crc_error);
        let id_field = Span::new(id_start, self.pos - id_start);
        let gap = self.profile.gap_byte;
        self.gap(self.profile.len[2], gap);
        (Span::new(start, self.pos - start), id_field)
    }

    /// Write the sync and data address mark that open a data block.
    pub fn data_prefix(&mut self, deleted: bool) -> Span {
        let start = self.pos;
        self.sync();
        self.address_mark(if deleted { MARK_DELETED } else { MARK_DATA });
        Span::new(start, self.pos - start)
    }

    /// Write a data block body and its CRC.
    ///
    /// `data` is padded with zeros up to `declared`. When `crc_len` is shorter than the
    /// data, only the first `crc_len` bytes are folded into the CRC (weak sectors).
    pub fn data_body(&mut self, data: &[u8], declared: usize, crc_len: usize, crc_error: bool) -> Span {
        let start = self.pos;
        let block = declared.max(data.len());
        for i in 0..block {
            if i == crc_len {
                self.crc_enabled = false;
            }
            self.put(data.get(i).copied().unwrap_or(0), false);
        }
        self.crc_enabled = true;
        self.crc(crc_error);
        Span::new(start, declared)
    }

    /// Write a complete sector and return its layout.
    pub fn sector(&mut self, sector: &SectorDescription, gap3_len: usize) -> SectorSurface {
        let (header, id_field) = self.id_block(sector.id, sector.id_crc_error);
        let prefix = self.data_prefix(sector.deleted);
        let declared = sector.declared_len();
        let stored = &sector.data[..sector.actual_len.min(sector.data.len())];
        let crc_len = if sector.is_weak() { declared } else { stored.len().max(declared) };
        let data = self.data_body(stored, declared, crc_len, sector.data_crc_error);

        if sector.is_weak() {
            for o in data.start..data.start + stored.len() {
                self.track.mark(Plane::Weak, o, true);
            }
        }

        let tail_start = self.pos - 2;
        let gap = self.profile.gap_byte;
        self.gap(gap3_len, gap);

        SectorSurface {
            id: sector.id,
            header,
            id_field,
            prefix,
            data,
            tail: Span::new(tail_start, self.pos - tail_start),
            deleted: sector.deleted,
            weak_copies: sector.weak_copies.max(1),
            copy_index: 0,
            stored_len: stored.len(),
        }
    }

    /// Write a freshly formatted sector: `data_len` bytes of `filler` followed by a GAP3 of
    /// `gap3_len` bytes.
    pub fn format_sector(&mut self, id: DiskChsn, data_len: usize, filler: u8, gap3_len: usize) -> SectorSurface {
        let (header, id_field) = self.id_block(id, false);
        let prefix = self.data_prefix(false);
        let data = self.data_body(&vec![filler; data_len], data_len, data_len, false);
        let tail_start = self.pos - 2;
        let gap = self.profile.gap_byte;
        self.gap(gap3_len, gap);

        SectorSurface {
            id,
            header,
            id_field,
            prefix,
            data,
            tail: Span::new(tail_start, self.pos - tail_start),
            deleted: false,
            weak_copies: 1,
            copy_index: 0,
            stored_len: data_len,
        }
    }

    /// Fill with the gap byte up to the end of the track.
    pub fn fill_to_index(&mut self) {
        let bpt = self.track.bytes_per_track();
        let gap = self.profile.gap_byte;
        if self.pos < bpt {
            self.gap(bpt - self.pos, gap);
        }
    }

    pub fn track_mut(&mut self) -> &mut TrackSurface {
        self.track
    }
}

/// Length in bytes a track description needs on the surface.
pub fn track_length(profile: &GapProfile, track: &TrackDescription) -> usize {
    if track.unformatted {
        return 0;
    }
    profile.track_header_len()
        + track
            .sectors
            .iter()
            .map(|s| profile.sector_len(s.declared_len().max(s.actual_len)))
            .sum::<usize>()
}

fn check_sector(track: &TrackDescription, sector: &SectorDescription) -> Result<(), SurfaceError> {
    if sector.actual_len > sector.data.len() {
        return Err(SurfaceError::Format(format!(
            "sector {} on track {}:{} declares {} bytes but holds {}",
            sector.id,
            track.track_number,
            track.side_number,
            sector.actual_len,
            sector.data.len()
        )));
    }
    if sector.is_weak() && sector.actual_len != sector.weak_copies * sector.declared_len() {
        return Err(SurfaceError::Format(format!(
            "weak sector {} stores {} bytes, expected {} copies of {}",
            sector.id,
            sector.actual_len,
            sector.weak_copies,
            sector.declared_len()
        )));
    }
    Ok(())
}

impl Surface {
    /// Build a physical surface from a disk description.
    pub fn encode(desc: &DiskDescription) -> Result<Surface, SurfaceError> {
        if desc.sides < 1 || desc.sides > MAX_SIDES {
            return Err(SurfaceError::Geometry(format!("{} sides", desc.sides)));
        }
        if desc.tracks_per_side < 1 || desc.tracks_per_side > MAX_TRACKS_PER_SIDE {
            return Err(SurfaceError::Geometry(format!("{} tracks per side", desc.tracks_per_side)));
        }
        let track_ct = desc.sides as usize * desc.tracks_per_side as usize;
        if desc.tracks.len() > track_ct {
            return Err(SurfaceError::Geometry(format!(
                "{} tracks described for a {}x{} disk",
                desc.tracks.len(),
                desc.tracks_per_side,
                desc.sides
            )));
        }

        let profile = GapProfile::from_gap3(desc.tracks.first().map(|t| t.gap3).unwrap_or(0));

        let mut max_len = 0;
        for track in &desc.tracks {
            if !track.unformatted {
                for sector in &track.sectors {
                    check_sector(track, sector)?;
                }
            }
            max_len = max_len.max(track_length(&profile, track));
        }
        if max_len == 0 {
            return Err(SurfaceError::Geometry("disk has no formatted tracks".to_string()));
        }

        let density = Density::from_track_length(max_len)?;
        let bpt = density.bytes_per_track();
        log::debug!(
            "Surface::encode(): {} tracks, longest {} bytes, density {} ({} bytes per track), {}",
            track_ct,
            max_len,
            density,
            bpt,
            profile.encoding
        );

        let mut tracks = Vec::with_capacity(track_ct);
        for i in 0..track_ct {
            let mut surface = TrackSurface::new(bpt, profile.encoding);
            if let Some(track) = desc.tracks.get(i) {
                if !track.unformatted {
                    encode_track(&mut surface, track);
                }
            }
            tracks.push(surface);
        }

        Ok(Surface {
            density,
            encoding: profile.encoding,
            bytes_per_track: bpt,
            sides: desc.sides,
            tracks_per_side: desc.tracks_per_side,
            format: desc.format,
            creator: desc.creator.clone(),
            tracks,
            dirty: false,
        })
    }
}

fn encode_track(surface: &mut TrackSurface, track: &TrackDescription) {
    let mut writer = TrackWriter::new(surface, 0);
    let header = writer.track_header();
    let gap3_len = writer.profile().len[3];
    let sectors: Vec<SectorSurface> = track.sectors.iter().map(|s| writer.sector(s, gap3_len)).collect();
    writer.fill_to_index();

    surface.header = header;
    surface.sectors = sectors;
    surface.formatted = true;
}
