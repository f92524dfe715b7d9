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

    devices::fdc::format.rs

    Format Track. The track is laid down from the index hole: header first, then
    one sector for each C/H/R/N group the host supplies, then gap filler up to
    the next index hole.
*/

use crate::{
    device_types::chs::{n_to_bytes, DiskChsn},
    devices::fdc::{
        commands::*,
        controller::*,
        transfer::{Stage, TransferState},
    },
    surface::TrackWriter,
    timing::{Scheduler, TimerToken},
};

impl FloppyController {
    /// Perform Format Track.
    pub(crate) fn command_format_track(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        self.xfer = TransferState {
            len: 4,
            ..Default::default()
        };
        log::debug!(
            "Format Track: unit {} head {} N: {} SC: {} GPL: {} D: {:02X}",
            self.state.us,
            self.state.hd,
            self.state.param(1),
            self.state.param(2),
            self.state.param(3),
            self.state.param(4)
        );
        if !self.drive_ready() {
            return self.fail(FdcError::NotReady);
        }
        if self.selected_drive().map_or(true, |d| d.is_write_protected()) {
            return self.fail(FdcError::WriteProtected);
        }
        self.load_head(sched)
    }

    /// The index hole has arrived: erase the track and write its header.
    pub(crate) fn format_begin(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        let encoding = self.state.encoding();
        let header_end = self.selected_drive_mut().and_then(|drive| {
            let track = drive.track_mut()?;
            track.encoding = encoding;
            track.erase();
            let header = TrackWriter::new(track, 0).track_header();
            track.header = header;
            track.formatted = true;
            if let Some(surface) = drive.surface_mut() {
                surface.set_dirty(true);
            }
            Some(header.end())
        });

        let Some(pos) = header_end
        else {
            // No track exists at this cylinder on the image.
            return self.fail(FdcError::NotReady);
        };

        self.xfer.format_pos = pos;
        if let Some(drive) = self.selected_drive_mut() {
            drive.set_cursor(pos);
        }
        if self.state.param(2) == 0 {
            return self.finish_format();
        }

        self.xfer.buffer.clear();
        self.stage = Stage::Transfer;
        self.state.msr |= FDC_STATUS_MRQ;
        self.state.msr &= !FDC_STATUS_DIO;
        self.arm_overrun(sched);
        Continuation::Continue
    }

    /// Take one byte of a sector ID from the host. Each complete ID writes a sector.
    pub(crate) fn format_byte(&mut self, data: u8, sched: &mut dyn Scheduler) -> Continuation {
        self.xfer.buffer.push(data);
        self.xfer.pos += 1;
        self.log_execution(PortOperation::WriteData, data);
        if self.xfer.buffer.len() < 4 {
            self.arm_overrun(sched);
            return Continuation::Continue;
        }

        let b = std::mem::take(&mut self.xfer.buffer);
        let id = DiskChsn::new(b[0], b[1], b[2], b[3]);
        self.state.chrn = id;

        let data_len = n_to_bytes(self.state.param(1));
        let gap3_len = self.state.param(3) as usize;
        let filler = self.state.param(4);
        let start = self.xfer.format_pos;

        let end = self.selected_drive_mut().and_then(|drive| {
            let track = drive.track_mut()?;
            let mut writer = TrackWriter::new(track, start);
            let sector = writer.format_sector(id, data_len, filler, gap3_len);
            let end = writer.position();
            track.sectors.push(sector);
            let idx = track.sectors.len() - 1;
            drive.mark_sector_changed(idx);
            Some(end)
        });

        let Some(end) = end
        else {
            return self.fail(FdcError::NotReady);
        };

        let bpt = self.selected_drive().and_then(|d| d.bytes_per_track()).unwrap_or(0);
        if end > bpt {
            log::warn!("format_byte(): sector {} runs {} bytes past the index hole", id, end - bpt);
        }

        self.xfer.format_pos = end;
        self.xfer.formatted += 1;
        if let Some(drive) = self.selected_drive_mut() {
            drive.set_cursor(end);
        }
        log::trace!("format_byte(): wrote sector {} ending at {}", id, end);

        if self.xfer.formatted >= self.state.param(2) as usize {
            return self.finish_format();
        }
        sched.cancel(TimerToken::Overrun);
        self.state.msr &= !FDC_STATUS_MRQ;
        self.stage = Stage::FormatNext;
        Continuation::Suspend(self.bytes_to_ticks(end - start).max(1))
    }

    /// Fill the rest of the track with gap bytes and wait for the index hole.
    fn finish_format(&mut self) -> Continuation {
        let pos = self.xfer.format_pos;
        let remaining = self
            .selected_drive_mut()
            .and_then(|drive| {
                let track = drive.track_mut()?;
                let bpt = track.bytes_per_track();
                TrackWriter::new(track, pos).fill_to_index();
                Some(bpt.saturating_sub(pos))
            })
            .unwrap_or(0);

        self.state.msr &= !FDC_STATUS_MRQ;
        self.stage = Stage::Closing;
        Continuation::Suspend(self.bytes_to_ticks(remaining).max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_types::disk::DiskDescription,
        host::FloppyHost,
        machine_config::FdcConfig,
        surface::{Encoding, Surface},
    };

    fn host_with_blank(write_protect: bool) -> FloppyHost {
        let mut host = FloppyHost::new(FdcConfig::default());
        let surface = Surface::encode(&DiskDescription::uniform(1, 40, 9, 2, 1, 0xE5)).unwrap();
        host.insert(0, surface, Some(write_protect));
        host.fdc_mut().motor_on(0);
        host
    }

    fn format(host: &mut FloppyHost, command: u8, ids: &[[u8; 4]], gpl: u8, filler: u8) -> Vec<u8> {
        host.command(&[command, 0x00, 2, ids.len() as u8, gpl, filler]);
        for id in ids {
            host.write_bytes(id, 1000);
        }
        host.wait_for_result(1000);
        host.read_result()
    }

    #[test]
    fn format_and_read_back() {
        let mut host = host_with_blank(false);
        let ids: Vec<[u8; 4]> = (1..=8).map(|r| [0, 0, r, 2]).collect();
        let result = format(&mut host, 0x4d, &ids, 0x54, 0xAA);
        assert_eq!(&result[..3], &[0x00, 0x00, 0x00]);

        let desc = host.fdc().drive(0).unwrap().surface().unwrap().decode();
        let track = &desc.tracks[0];
        assert_eq!(track.sectors.len(), 8);
        for (i, s) in track.sectors.iter().enumerate() {
            assert_eq!(s.id, DiskChsn::new(0, 0, i as u8 + 1, 2));
            assert!(s.data.iter().all(|&b| b == 0xAA));
            assert!(!s.data_crc_error);
            assert!(!s.id_crc_error);
        }
        // Other tracks are untouched.
        assert!(desc.tracks[1].sectors.iter().all(|s| s.data[0] == 0xE5));
        assert!(host.fdc().drive(0).unwrap().surface().unwrap().is_dirty());

        host.command(&[0x46, 0x00, 0, 0, 8, 2, 8, 0x2a, 0xff]);
        assert_eq!(host.read_bytes(512, 2000), vec![0xAA; 512]);
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x40, 0x80, 0x00, 1, 0, 1, 2]);

        // Sector 9 no longer exists.
        host.command(&[0x46, 0x00, 0, 0, 9, 2, 9, 0x2a, 0xff]);
        host.wait_for_result(1000);
        assert_eq!(&host.read_result()[..3], &[0x40, 0x04, 0x00]);
    }

    #[test]
    fn format_fm_track() {
        let mut host = host_with_blank(false);
        let ids: Vec<[u8; 4]> = (1..=4).map(|r| [0, 0, r, 2]).collect();
        let result = format(&mut host, 0x0d, &ids, 0x1b, 0x55);
        assert_eq!(&result[..3], &[0x00, 0x00, 0x00]);
        {
            let fdc = host.fdc();
            let track = fdc.drive(0).unwrap().surface().unwrap().track(0, 0).unwrap();
            assert_eq!(track.encoding(), Encoding::Fm);
        }

        // FM read succeeds.
        host.command(&[0x06, 0x00, 0, 0, 3, 2, 4, 0x1b, 0xff]);
        assert_eq!(host.read_bytes(512, 2000), vec![0x55; 512]);
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 0, 0, 4, 2]);

        // MFM read of the FM track finds no address marks.
        host.command(&[0x46, 0x00, 0, 0, 3, 2, 4, 0x1b, 0xff]);
        host.wait_for_result(1000);
        assert_eq!(&host.read_result()[..3], &[0x40, 0x05, 0x00]);
    }

    #[test]
    fn format_write_protected() {
        let mut host = host_with_blank(true);
        host.command(&[0x4d, 0x00, 2, 9, 0x54, 0xF6]);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(&host.read_result()[..3], &[0x40, 0x02, 0x00]);
    }

    #[test]
    fn format_zero_sectors_erases_track() {
        let mut host = host_with_blank(false);
        let result = format(&mut host, 0x4d, &[], 0x54, 0xF6);
        assert_eq!(&result[..3], &[0x00, 0x00, 0x00]);
        let fdc = host.fdc();
        let track = fdc.drive(0).unwrap().surface().unwrap().track(0, 0).unwrap();
        assert!(track.is_formatted());
        assert!(track.sectors().is_empty());
    }

    #[test]
    fn format_overrun() {
        let mut host = host_with_blank(false);
        host.command(&[0x4d, 0x00, 2, 9, 0x54, 0xF6]);
        host.write_bytes(&[0, 0, 1, 2], 1000);
        host.advance_ms(500);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(&host.read_result()[..3], &[0x40, 0x10, 0x00]);
    }
}
