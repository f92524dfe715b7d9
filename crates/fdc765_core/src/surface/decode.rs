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

    surface::decode.rs

    Recover a DiskDescription from a Surface. Sector contents are read back
    from the raw track bytes, so anything written by the controller since the
    surface was encoded is reflected in the result.
*/

use crate::{
    crc::Crc16,
    device_types::{
        chs::DiskChsn,
        disk::{DiskDescription, RecordingMode, SectorDescription, TrackDescription},
    },
    surface::{MarkKind, SectorSurface, Surface, TrackSurface},
};

impl TrackSurface {
    /// Decode a single sector from its recorded layout.
    pub fn decode_sector(&self, sector: &SectorSurface) -> SectorDescription {
        let mark_len = self.profile().mark_len();
        let id_bytes = self.read_span(sector.id_field);
        let id = DiskChsn::new(
            id_bytes[mark_len + 1],
            id_bytes[mark_len + 2],
            id_bytes[mark_len + 3],
            id_bytes[mark_len + 4],
        );
        let id_crc_error = !self.crc_valid(sector.id_field.start, sector.id_field.len);

        let mark_offset = sector.prefix.start + self.profile().sync_len;
        let deleted = self
            .mark_at(mark_offset)
            .map(|m| m.kind == MarkKind::Deleted)
            .unwrap_or(sector.deleted);

        let crc_len = if sector.is_weak() {
            sector.data.len
        }
        else {
            sector.data.len.max(sector.stored_len)
        };
        let mut crc = Crc16::new();
        for o in mark_offset..sector.data.start + crc_len {
            crc.add(self.read(o));
        }
        crc.add(self.read(sector.crc_offset()));
        crc.add(self.read(sector.crc_offset() + 1));

        let data: Vec<u8> = (0..sector.stored_len).map(|i| self.read(sector.data.start + i)).collect();

        SectorDescription {
            id,
            deleted,
            data_crc_error: !crc.is_valid(),
            id_crc_error,
            actual_len: data.len(),
            data,
            weak_copies: sector.weak_copies.max(1),
            copy_index: 0,
        }
    }

    pub fn decode(&self, track_number: u8, side_number: u8) -> TrackDescription {
        let profile = self.profile();
        if !self.formatted {
            let mut track = TrackDescription::unformatted(track_number, side_number);
            track.gap3 = if profile.gap_byte == 0xFF { 0xFF } else { profile.len[3] as u8 };
            return track;
        }
        let sectors: Vec<SectorDescription> = self.sectors.iter().map(|s| self.decode_sector(s)).collect();
        let mut track = TrackDescription::new(track_number, side_number, sectors);
        track.recording_mode = match self.encoding {
            super::Encoding::Fm => RecordingMode::Fm,
            super::Encoding::Mfm => RecordingMode::Mfm,
        };
        // FM is flagged by a GAP3 byte of 0xFF.
        track.gap3 = if profile.gap_byte == 0xFF { 0xFF } else { profile.len[3] as u8 };
        track
    }
}

impl Surface {
    /// Reconstruct the logical disk from the surface.
    pub fn decode(&self) -> DiskDescription {
        let mut tracks = Vec::with_capacity(self.tracks.len());
        for c in 0..self.tracks_per_side {
            for h in 0..self.sides {
                if let Some(track) = self.track(c, h) {
                    tracks.push(track.decode(c, h));
                }
            }
        }
        DiskDescription {
            format: self.format,
            sides: self.sides,
            tracks_per_side: self.tracks_per_side,
            creator: self.creator.clone(),
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        device_types::{
            chs::DiskChsn,
            disk::{DiskDescription, SectorDescription, TrackDescription},
        },
        surface::Surface,
    };

    fn patterned_disk(sides: u8, tracks: u8) -> DiskDescription {
        let mut desc = DiskDescription {
            sides,
            tracks_per_side: tracks,
            ..Default::default()
        };
        for c in 0..tracks {
            for h in 0..sides {
                let sectors = (0..9u8)
                    .map(|s| {
                        let r = 0xC1 + s;
                        let data = (0..512usize).map(|i| (i as u8) ^ c ^ (r << h)).collect();
                        SectorDescription::new(DiskChsn::new(c, h, r, 2), data)
                    })
                    .collect();
                desc.tracks.push(TrackDescription::new(c, h, sectors));
            }
        }
        desc
    }

    #[test]
    fn decode_reproduces_description() {
        let desc = patterned_disk(2, 4);
        let surface = Surface::encode(&desc).unwrap();
        let decoded = surface.decode();
        assert_eq!(decoded.tracks.len(), desc.tracks.len());
        for (orig, dec) in desc.tracks.iter().zip(decoded.tracks.iter()) {
            assert_eq!(orig.sectors.len(), dec.sectors.len());
            for (a, b) in orig.sectors.iter().zip(dec.sectors.iter()) {
                assert_eq!(a.id, b.id);
                assert_eq!(a.data, b.data);
                assert!(!b.data_crc_error);
                assert!(!b.id_crc_error);
                assert!(!b.deleted);
            }
        }
    }

    #[test]
    fn decode_preserves_flags_and_short_sectors() {
        let sectors = vec![
            SectorDescription::new(DiskChsn::new(0, 0, 1, 2), vec![7; 512]).with_deleted(true),
            SectorDescription::new(DiskChsn::new(0, 0, 2, 2), vec![8; 512]).with_data_crc_error(true),
            SectorDescription::new(DiskChsn::new(0, 0, 3, 2), vec![9; 200]),
            SectorDescription::new(DiskChsn::new(0, 0, 4, 1), vec![5; 768]).with_weak_copies(3),
        ];
        let desc = DiskDescription {
            sides: 1,
            tracks_per_side: 1,
            tracks: vec![TrackDescription::new(0, 0, sectors)],
            ..Default::default()
        };
        let decoded = Surface::encode(&desc).unwrap().decode();
        let s = &decoded.tracks[0].sectors;
        assert!(s[0].deleted);
        assert!(!s[0].data_crc_error);
        assert!(s[1].data_crc_error);
        assert_eq!(s[2].data, vec![9; 200]);
        assert!(!s[2].data_crc_error);
        assert_eq!(s[3].weak_copies, 3);
        assert_eq!(s[3].data.len(), 768);
        assert!(!s[3].data_crc_error);
    }
}
