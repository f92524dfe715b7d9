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

    devices::fdc::transfer.rs

    Sector search and data transfer: Read Data, Read Deleted Data, Write Data,
    Write Deleted Data, the Scan commands, Read Track and Read ID.

    An operation advances through stages. Each stage either waits for the host
    to service the data register or suspends for the time the disk needs to
    rotate to the next point of interest.
*/

use rand::Rng;

use crate::{
    crc::Crc16,
    device_types::chs::{n_to_bytes, DiskChsn},
    devices::fdc::{commands::*, controller::*},
    surface::{AddressMark, Encoding, MarkKind, SectorSurface, Span, TrackSurface, TrackWriter},
    timing::{Scheduler, TimerPayload, TimerToken},
};

/// Bytes after the end of an ID field in which the data address mark must appear.
pub const MFM_DATA_MARK_WINDOW: usize = 43;
pub const FM_DATA_MARK_WINDOW: usize = 30;
/// Upper bound of the random offset applied to the rotational position when jitter is enabled.
pub const MAX_WOBBLE: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SearchOutcome {
    Sector { index: usize, deleted: bool },
    Id(DiskChsn),
    Failed(FdcError),
}

#[derive(Copy, Clone, Debug, Default)]
pub enum Stage {
    #[default]
    Idle,
    HeadLoad,
    Search(SearchOutcome),
    Transfer,
    /// The CRC of the sector just transferred is passing under the head.
    SectorEnd,
    Index,
    FormatNext,
    Closing,
}

/// Per-sector comparison flags for the Scan commands.
#[derive(Copy, Clone, Debug)]
pub struct ScanMatch {
    pub equal: bool,
    pub low: bool,
    pub high: bool,
}

impl Default for ScanMatch {
    fn default() -> Self {
        Self {
            equal: true,
            low: true,
            high: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransferState {
    pub eot: u8,
    pub gpl: u8,
    /// DTL for reads and writes, STP for scans.
    pub dtl: u8,
    /// Bytes exchanged with the host per sector.
    pub len: usize,
    pub buffer: Vec<u8>,
    pub pos: usize,
    /// Physical index of the sector being transferred.
    pub sector: usize,
    pub crc_ok: bool,
    pub control_mark: bool,
    pub scan: ScanMatch,
    pub sectors_done: usize,
    pub format_pos: usize,
    pub formatted: usize,
}

/// Bytes transferred per sector for a size code and DTL.
pub fn transfer_len(n: u8, dtl: u8) -> usize {
    if n == 0 && dtl < 0x80 {
        (dtl as usize).max(1)
    }
    else {
        n_to_bytes(n)
    }
}

/// Search the track for an ID field, starting at `cursor` and giving up after the index hole
/// has passed twice.
///
/// With no `target` the first readable ID is returned. Returns the outcome along with the
/// number of bytes that passed under the head.
pub(crate) fn find_id(
    track: &TrackSurface,
    cursor: usize,
    target: Option<DiskChsn>,
    encoding: Encoding,
) -> (Result<(usize, DiskChsn), FdcError>, usize) {
    let bpt = track.bytes_per_track();
    let cursor = cursor % bpt;
    let window = (bpt - cursor) + bpt;

    if !track.is_formatted() || track.encoding() != encoding {
        return (Err(FdcError::AddressMarkMissing), window);
    }

    let mut order: Vec<(usize, usize)> = track
        .sectors()
        .iter()
        .enumerate()
        .map(|(i, s)| ((s.id_field.start % bpt + bpt - cursor) % bpt, i))
        .collect();
    order.sort_unstable();

    let mut seen_id = false;
    let mut wrong_cylinder = false;
    let mut bad_cylinder = false;

    for (dist, i) in order {
        let field = track.sectors()[i].id_field;
        let mark = match track.mark_at(field.start) {
            Some(mark) if mark.kind == MarkKind::Id => mark,
            _ => continue,
        };
        seen_id = true;
        let id = DiskChsn::new(
            track.read(mark.field),
            track.read(mark.field + 1),
            track.read(mark.field + 2),
            track.read(mark.field + 3),
        );
        let crc_ok = track.crc_valid(field.start, field.len);
        let bytes = dist + field.len;

        match target {
            Some(t) if t != id => {
                if crc_ok && id.c() != t.c() {
                    wrong_cylinder = true;
                    if id.c() == 0xFF {
                        bad_cylinder = true;
                    }
                }
            }
            _ => {
                let result = if crc_ok {
                    Ok((i, id))
                }
                else {
                    Err(FdcError::IdCrcMismatch)
                };
                return (result, bytes);
            }
        }
    }

    let err = if seen_id {
        FdcError::SectorNotFound {
            wrong_cylinder,
            bad_cylinder,
        }
    }
    else {
        FdcError::AddressMarkMissing
    };
    (Err(err), window)
}

/// Locate the data address mark following a sector's ID field.
pub(crate) fn find_data_mark(track: &TrackSurface, sector: &SectorSurface) -> Option<AddressMark> {
    let window = match track.encoding() {
        Encoding::Mfm => MFM_DATA_MARK_WINDOW,
        Encoding::Fm => FM_DATA_MARK_WINDOW,
    };
    let start = sector.id_field.end();
    (start..start + window).find_map(|o| {
        track
            .mark_at(o)
            .filter(|m| matches!(m.kind, MarkKind::Data | MarkKind::Deleted))
    })
}

/// Read `len` bytes of a sector's data field starting at `copy` and check the field's CRC.
/// The CRC of a weak sector covers its first copy only, so every copy reports the same status.
fn read_data_field(track: &TrackSurface, sector: &SectorSurface, copy: usize, len: usize) -> (Vec<u8>, bool) {
    let mark_offset = find_data_mark(track, sector)
        .map(|m| m.offset)
        .unwrap_or(sector.prefix.start + track.profile().sync_len);
    let crc_len = if sector.is_weak() {
        sector.data.len
    }
    else {
        sector.data.len.max(sector.stored_len)
    };

    let mut crc = Crc16::new();
    for o in mark_offset..sector.data.start {
        crc.add(track.read(o));
    }
    for o in sector.data.start..sector.data.start + crc_len {
        crc.add(track.read(o));
    }
    crc.add(track.read(sector.crc_offset()));
    crc.add(track.read(sector.crc_offset() + 1));

    let buffer = (copy..copy + len).map(|o| track.read(o)).collect();
    (buffer, crc.is_valid())
}

/// Rewrite the data field of sector `idx` with `data`, padded to the declared size.
fn rewrite_data_field(track: &mut TrackSurface, idx: usize, data: &[u8], deleted: bool) -> bool {
    let sector = match track.sectors().get(idx) {
        Some(sector) => sector.clone(),
        None => return false,
    };
    let declared = sector.data.len;
    let old_end = sector.tail.end();

    let mut writer = TrackWriter::new(track, sector.prefix.start);
    let prefix = writer.data_prefix(deleted);
    let data = writer.data_body(&data[..data.len().min(declared)], declared, declared, false);
    let tail_start = writer.position() - 2;
    if writer.position() < old_end {
        let (len, gap) = (old_end - writer.position(), writer.profile().gap_byte);
        writer.gap(len, gap);
    }
    let tail = Span::new(tail_start, writer.position() - tail_start);

    let s = &mut track.sectors_mut()[idx];
    s.prefix = prefix;
    s.data = data;
    s.tail = tail;
    s.deleted = deleted;
    s.weak_copies = 1;
    s.copy_index = 0;
    s.stored_len = declared;
    true
}

impl FloppyController {
    /// Prime C/H/R/N and the transfer parameters from a read/write style parameter block.
    fn init_transfer(&mut self) {
        let s = &self.state;
        let chrn = DiskChsn::new(s.param(1), s.param(2), s.param(3), s.param(4));
        let len = if s.command_id().is_scan() {
            n_to_bytes(chrn.n())
        }
        else {
            transfer_len(chrn.n(), s.param(7))
        };
        self.xfer = TransferState {
            eot: s.param(5),
            gpl: s.param(6),
            dtl: s.param(7),
            len,
            ..Default::default()
        };
        self.state.chrn = chrn;
        log::debug!(
            "{}: unit {} head {} {} EOT: {} len: {}",
            self.state.command_id(),
            self.state.us,
            self.state.hd,
            chrn,
            self.xfer.eot,
            len
        );
    }

    /// A drive can transfer data when a disk is present and its motor is running.
    pub(crate) fn drive_ready(&self) -> bool {
        self.selected_drive()
            .map_or(false, |d| d.is_ready() && d.is_motor_on())
    }

    pub(crate) fn bytes_to_ticks(&self, bytes: usize) -> u64 {
        let bpt = self
            .selected_drive()
            .and_then(|d| d.bytes_per_track())
            .unwrap_or(0);
        if bpt == 0 {
            return self.config.revolution_ticks();
        }
        (bytes as u64).saturating_mul(self.config.revolution_ticks()) / bpt as u64
    }

    pub(crate) fn arm_overrun(&mut self, sched: &mut dyn Scheduler) {
        let ticks = self.ms_to_ticks(self.config.overrun_timeout_ms);
        sched.cancel(TimerToken::Overrun);
        sched.schedule_in(ticks, TimerToken::Overrun, TimerPayload::Drive(self.state.us));
    }

    /// Perform Read Data and Read Deleted Data.
    pub(crate) fn command_read_data(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        self.init_transfer();
        if !self.drive_ready() {
            return self.fail(FdcError::NotReady);
        }
        self.load_head(sched)
    }

    /// Perform Write Data and Write Deleted Data.
    pub(crate) fn command_write_data(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        self.init_transfer();
        if !self.drive_ready() {
            return self.fail(FdcError::NotReady);
        }
        if self.selected_drive().map_or(true, |d| d.is_write_protected()) {
            return self.fail(FdcError::WriteProtected);
        }
        self.load_head(sched)
    }

    /// Perform Scan Equal, Scan Low or Equal and Scan High or Equal.
    pub(crate) fn command_scan(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        self.init_transfer();
        if !self.drive_ready() {
            return self.fail(FdcError::NotReady);
        }
        self.load_head(sched)
    }

    /// Perform Read Track.
    pub(crate) fn command_read_track(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        self.init_transfer();
        if !self.drive_ready() {
            return self.fail(FdcError::NotReady);
        }
        self.load_head(sched)
    }

    /// Perform Read ID. There is no ready check; an empty drive simply never produces an ID.
    pub(crate) fn command_read_id(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        self.xfer = TransferState::default();
        self.load_head(sched)
    }

    /// Load the head if needed, then start the operation.
    pub(crate) fn load_head(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        sched.cancel(TimerToken::HeadUnload);
        if self.selected_drive().map_or(false, |d| d.is_head_loaded()) {
            self.begin_operation(sched.current_tick())
        }
        else {
            self.stage = Stage::HeadLoad;
            Continuation::Suspend(self.ms_to_ticks(self.state.head_load_ms))
        }
    }

    fn begin_operation(&mut self, now: u64) -> Continuation {
        self.sync_rotation(now);
        match self.state.command_id() {
            Command::ReadId => self.search_read_id(),
            Command::ReadTrack | Command::FormatTrack => self.wait_index(),
            _ => self.search_sector(),
        }
    }

    /// Place the drive cursor where the disk has rotated to at tick `now`.
    fn sync_rotation(&mut self, now: u64) {
        let bpt = match self.selected_drive().and_then(|d| d.bytes_per_track()) {
            Some(bpt) if bpt > 0 => bpt,
            _ => return,
        };
        let byte_ticks = (self.config.revolution_ticks() / bpt as u64).max(1);
        let mut pos = ((now / byte_ticks) % bpt as u64) as usize;
        if let Some(rng) = self.wobble.as_mut() {
            pos += rng.gen_range(0..MAX_WOBBLE);
        }
        if let Some(drive) = self.selected_drive_mut() {
            drive.set_cursor(pos);
        }
    }

    /// Resume the operation after a scheduled delay.
    pub(crate) fn operation_continue(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        match std::mem::take(&mut self.stage) {
            Stage::HeadLoad => {
                if let Some(drive) = self.selected_drive_mut() {
                    drive.load_head(true);
                }
                self.begin_operation(sched.current_tick())
            }
            Stage::Search(outcome) => self.search_complete(outcome, sched),
            Stage::SectorEnd => self.sector_done(),
            Stage::Index => self.index_reached(sched),
            Stage::FormatNext => {
                self.stage = Stage::Transfer;
                self.state.msr |= FDC_STATUS_MRQ;
                self.arm_overrun(sched);
                Continuation::Continue
            }
            Stage::Closing => Continuation::Complete(InterruptCode::NormalTermination),
            stage @ (Stage::Idle | Stage::Transfer) => {
                log::warn!("operation_continue(): nothing to resume in stage {:?}", stage);
                self.stage = stage;
                Continuation::Continue
            }
        }
    }

    /// Park in the search stage until the bytes examined have passed under the head.
    fn suspend_search(&mut self, outcome: SearchOutcome, bytes: Option<usize>) -> Continuation {
        let ticks = match bytes {
            Some(bytes) => {
                if let Some(drive) = self.selected_drive_mut() {
                    drive.advance(bytes);
                }
                self.bytes_to_ticks(bytes)
            }
            // No track under the head: the index hole passes twice without an ID.
            None => 2 * self.config.revolution_ticks(),
        };
        log::trace!("search: {:?} in {} ticks", outcome, ticks);
        self.stage = Stage::Search(outcome);
        Continuation::Suspend(ticks.max(1))
    }

    /// Search for the sector addressed by C/H/R/N.
    pub(crate) fn search_sector(&mut self) -> Continuation {
        let target = self.state.chrn;
        let encoding = self.state.encoding();
        let need_data_mark = !self.state.command_id().is_write();

        let found = self.selected_drive().and_then(|drive| {
            let track = drive.track()?;
            let (found, bytes) = find_id(track, drive.cursor(), Some(target), encoding);
            let outcome = match found {
                Ok((index, _)) if need_data_mark => match find_data_mark(track, &track.sectors()[index]) {
                    Some(mark) => SearchOutcome::Sector {
                        index,
                        deleted: mark.kind == MarkKind::Deleted,
                    },
                    None => SearchOutcome::Failed(FdcError::DataMarkMissing),
                },
                Ok((index, _)) => SearchOutcome::Sector { index, deleted: false },
                Err(err) => SearchOutcome::Failed(err),
            };
            Some((outcome, bytes))
        });

        match found {
            Some((outcome, bytes)) => self.suspend_search(outcome, Some(bytes)),
            None => self.suspend_search(SearchOutcome::Failed(FdcError::AddressMarkMissing), None),
        }
    }

    fn search_read_id(&mut self) -> Continuation {
        let encoding = self.state.encoding();
        let found = self.selected_drive().and_then(|drive| {
            let track = drive.track()?;
            let (found, bytes) = find_id(track, drive.cursor(), None, encoding);
            let outcome = match found {
                Ok((_, id)) => SearchOutcome::Id(id),
                Err(err) => SearchOutcome::Failed(err),
            };
            Some((outcome, bytes))
        });

        match found {
            Some((outcome, bytes)) => self.suspend_search(outcome, Some(bytes)),
            None => self.suspend_search(SearchOutcome::Failed(FdcError::AddressMarkMissing), None),
        }
    }

    fn search_complete(&mut self, outcome: SearchOutcome, sched: &mut dyn Scheduler) -> Continuation {
        let command = self.state.command_id();
        match outcome {
            SearchOutcome::Failed(err) => self.fail(err),
            SearchOutcome::Id(id) => {
                self.state.chrn = id;
                Continuation::Complete(InterruptCode::NormalTermination)
            }
            SearchOutcome::Sector { index, .. } if command.is_write() || command == Command::ReadTrack => {
                self.start_sector(index, sched)
            }
            SearchOutcome::Sector { index, deleted } => {
                if deleted != self.state.deleted && !command.is_scan() {
                    if self.state.sk {
                        log::debug!("search_complete(): skipping sector {}", self.state.chrn);
                        return self.next_sector();
                    }
                    self.xfer.control_mark = true;
                }
                self.start_sector(index, sched)
            }
        }
    }

    /// Position on sector `index` and open the data register for its transfer.
    fn start_sector(&mut self, index: usize, sched: &mut dyn Scheduler) -> Continuation {
        let command = self.state.command_id();
        let reading = !command.is_write();
        let len = self.xfer.len;

        let loaded = self.selected_drive_mut().and_then(|drive| {
            let track = drive.track_mut()?;
            let sector = track.sectors_mut().get_mut(index)?;
            let copy = sector.next_copy_offset();
            let sector = sector.clone();
            let result = if reading {
                read_data_field(track, &sector, copy, len)
            }
            else {
                (Vec::with_capacity(len), true)
            };
            drive.set_cursor(sector.crc_offset() + 2);
            Some(result)
        });

        let (buffer, crc_ok) = match loaded {
            Some(loaded) => loaded,
            None => return self.fail(FdcError::NotReady),
        };

        self.xfer.sector = index;
        self.xfer.buffer = buffer;
        self.xfer.pos = 0;
        self.xfer.crc_ok = crc_ok;
        self.xfer.scan = ScanMatch::default();
        self.stage = Stage::Transfer;

        self.state.msr |= FDC_STATUS_MRQ;
        if command.is_read() {
            self.state.msr |= FDC_STATUS_DIO;
        }
        else {
            self.state.msr &= !FDC_STATUS_DIO;
        }
        self.arm_overrun(sched);
        log::trace!("start_sector(): {} at index {}", self.state.chrn, index);
        Continuation::Continue
    }

    /// Host read of the data register during the execution phase.
    pub(crate) fn execution_read(&mut self, sched: &mut dyn Scheduler) -> u8 {
        if !matches!(self.stage, Stage::Transfer) || !self.state.command_id().is_read() {
            return 0xFF;
        }
        let byte = self.xfer.buffer.get(self.xfer.pos).copied().unwrap_or(0xFF);
        self.xfer.pos += 1;
        self.log_execution(PortOperation::ReadData, byte);
        self.byte_serviced(sched);
        byte
    }

    /// Host write of the data register during the execution phase.
    pub(crate) fn execution_write(&mut self, data: u8, sched: &mut dyn Scheduler) {
        if !matches!(self.stage, Stage::Transfer) {
            log::warn!("execution_write(): write of {:02X} outside a transfer", data);
            return;
        }
        let command = self.state.command_id();
        match command {
            Command::FormatTrack => {
                let result = self.format_byte(data, sched);
                self.apply(result, sched);
            }
            Command::WriteData | Command::WriteDeleted => {
                self.xfer.buffer.push(data);
                self.xfer.pos += 1;
                self.log_execution(PortOperation::WriteData, data);
                self.byte_serviced(sched);
            }
            c if c.is_scan() => {
                self.scan_byte(data);
                self.xfer.pos += 1;
                self.log_execution(PortOperation::WriteData, data);
                self.byte_serviced(sched);
            }
            _ => log::warn!("execution_write(): {} does not accept data", command),
        }
    }

    fn byte_serviced(&mut self, sched: &mut dyn Scheduler) {
        if self.xfer.pos < self.xfer.len {
            self.arm_overrun(sched);
            return;
        }
        self.state.msr &= !FDC_STATUS_MRQ;
        sched.cancel(TimerToken::Overrun);
        self.stage = Stage::SectorEnd;
        let ticks = self.bytes_to_ticks(2).max(1);
        self.apply(Continuation::Suspend(ticks), sched);
    }

    fn scan_byte(&mut self, host: u8) {
        // 0xFF from the host matches anything.
        if host == 0xFF {
            return;
        }
        let disk = self.xfer.buffer.get(self.xfer.pos).copied().unwrap_or(0xFF);
        let m = &mut self.xfer.scan;
        if disk != host {
            m.equal = false;
        }
        if disk > host {
            m.low = false;
        }
        if disk < host {
            m.high = false;
        }
    }

    /// The sector's CRC has passed under the head.
    fn sector_done(&mut self) -> Continuation {
        match self.state.command_id() {
            Command::ReadData | Command::ReadDeleted => {
                if !self.xfer.crc_ok {
                    return self.fail(FdcError::DataCrcMismatch);
                }
                if self.xfer.control_mark {
                    self.state.st2 |= ST2_CONTROL_MARK;
                    self.advance_sector();
                    return Continuation::Complete(InterruptCode::AbnormalTermination);
                }
                self.next_sector()
            }
            Command::WriteData | Command::WriteDeleted => {
                self.write_sector();
                self.next_sector()
            }
            Command::ReadTrack => self.read_track_sector_done(),
            c if c.is_scan() => self.scan_done(),
            c => {
                log::error!("sector_done(): unexpected command {}", c);
                Continuation::Complete(InterruptCode::AbnormalTermination)
            }
        }
    }

    fn next_sector(&mut self) -> Continuation {
        if self.advance_sector() {
            self.state.msr &= !FDC_STATUS_MRQ;
            self.search_sector()
        }
        else {
            self.fail(FdcError::EndOfCylinder)
        }
    }

    /// Step C/H/R/N to the next sector. Returns false when the end of the cylinder was reached.
    pub(crate) fn advance_sector(&mut self) -> bool {
        let mut chrn = self.state.chrn;
        let more = if chrn.r() == self.xfer.eot {
            if self.state.mt && self.state.hd == 0 {
                chrn.set_h(chrn.h() ^ 1);
                chrn.set_r(1);
                self.state.hd = 1;
                self.state.st0 |= ST0_HEAD_ACTIVE;
                if let Some(drive) = self.selected_drive_mut() {
                    drive.select_head(1);
                }
                true
            }
            else {
                chrn.set_c(chrn.c().wrapping_add(1));
                chrn.set_r(1);
                if self.state.mt {
                    chrn.set_h(chrn.h() ^ 1);
                }
                false
            }
        }
        else {
            chrn.set_r(chrn.r().wrapping_add(1));
            true
        };
        self.state.chrn = chrn;
        more
    }

    fn write_sector(&mut self) {
        let idx = self.xfer.sector;
        let deleted = self.state.deleted;
        let data = std::mem::take(&mut self.xfer.buffer);
        if let Some(drive) = self.selected_drive_mut() {
            let written = drive
                .track_mut()
                .map_or(false, |track| rewrite_data_field(track, idx, &data, deleted));
            if written {
                drive.mark_sector_changed(idx);
            }
        }
        log::trace!("write_sector(): {} bytes to sector index {}", data.len(), idx);
    }

    fn scan_done(&mut self) -> Continuation {
        if !self.xfer.crc_ok {
            return self.fail(FdcError::DataCrcMismatch);
        }
        let m = self.xfer.scan;
        let satisfied = match self.state.command_id() {
            Command::ScanEqual => m.equal,
            Command::ScanLowOrEqual => m.low,
            _ => m.high,
        };
        if satisfied {
            if m.equal {
                self.state.st2 |= ST2_SCAN_EQUAL_HIT;
            }
            return Continuation::Complete(InterruptCode::NormalTermination);
        }

        let next = self.state.chrn.r() as u16 + self.xfer.dtl.max(1) as u16;
        if next > self.xfer.eot as u16 {
            self.state.st2 |= ST2_SCAN_NOT_SATISFIED;
            return Continuation::Complete(InterruptCode::NormalTermination);
        }
        self.state.chrn.set_r(next as u8);
        self.state.msr &= !FDC_STATUS_MRQ;
        self.search_sector()
    }

    /// Wait for the index hole.
    fn wait_index(&mut self) -> Continuation {
        let bytes = self
            .selected_drive()
            .and_then(|d| d.bytes_per_track().map(|bpt| bpt - d.cursor()))
            .unwrap_or(0);
        if let Some(drive) = self.selected_drive_mut() {
            drive.advance(bytes);
        }
        self.stage = Stage::Index;
        Continuation::Suspend(self.bytes_to_ticks(bytes).max(1))
    }

    fn index_reached(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        match self.state.command_id() {
            Command::ReadTrack => {
                self.xfer.sectors_done = 0;
                self.read_track_next()
            }
            Command::FormatTrack => self.format_begin(sched),
            c => {
                log::error!("index_reached(): unexpected command {}", c);
                Continuation::Complete(InterruptCode::AbnormalTermination)
            }
        }
    }

    /// Read Track takes sectors in physical order from the index hole, whatever their IDs.
    fn read_track_next(&mut self) -> Continuation {
        let encoding = self.state.encoding();
        let chrn = self.state.chrn;
        let k = self.xfer.sectors_done;

        let found = self.selected_drive().and_then(|drive| {
            let track = drive.track()?;
            if !track.is_formatted() || track.encoding() != encoding || track.sectors().is_empty() {
                return None;
            }
            let index = k % track.sectors().len();
            let sector = &track.sectors()[index];
            let bpt = track.bytes_per_track();
            let dist = (sector.id_field.start % bpt + bpt - drive.cursor()) % bpt;
            let id = track
                .mark_at(sector.id_field.start)
                .filter(|m| m.kind == MarkKind::Id)
                .map(|m| {
                    DiskChsn::new(
                        track.read(m.field),
                        track.read(m.field + 1),
                        track.read(m.field + 2),
                        track.read(m.field + 3),
                    )
                });
            let id_crc_ok = track.crc_valid(sector.id_field.start, sector.id_field.len);
            let data_mark = find_data_mark(track, sector).map(|m| m.kind);
            Some((index, dist + sector.id_field.len, id, id_crc_ok, data_mark))
        });

        match found {
            None => self.suspend_search(SearchOutcome::Failed(FdcError::AddressMarkMissing), None),
            Some((index, bytes, id, id_crc_ok, data_mark)) => {
                if id != Some(chrn) {
                    self.state.st1 |= ST1_NO_DATA;
                }
                if !id_crc_ok {
                    self.state.st1 |= ST1_DATA_ERROR;
                }
                let outcome = match data_mark {
                    Some(kind) => SearchOutcome::Sector {
                        index,
                        deleted: kind == MarkKind::Deleted,
                    },
                    None => SearchOutcome::Failed(FdcError::DataMarkMissing),
                };
                self.suspend_search(outcome, Some(bytes))
            }
        }
    }

    fn read_track_sector_done(&mut self) -> Continuation {
        if !self.xfer.crc_ok {
            self.state.st1 |= ST1_DATA_ERROR;
            self.state.st2 |= ST2_DATA_ERROR_IN_DATA;
        }
        self.xfer.sectors_done += 1;
        let r = self.state.chrn.r().wrapping_add(1);
        self.state.chrn.set_r(r);
        if self.xfer.sectors_done >= self.xfer.eot as usize {
            return self.fail(FdcError::EndOfCylinder);
        }
        self.state.msr &= !FDC_STATUS_MRQ;
        self.read_track_next()
    }

    /// Terminal Count: end the running transfer with normal termination. C/H/R/N is left
    /// pointing at the sector after the last one transferred.
    pub fn terminal_count(&mut self, sched: &mut dyn Scheduler) {
        let command = self.state.command_id();
        if self.state.phase != ControllerPhase::ExecutionPhase || !command.accepts_terminal_count() {
            log::trace!("terminal_count(): ignored during {:?} of {}", self.state.phase, command);
            return;
        }
        sched.cancel(TimerToken::Operation);
        sched.cancel(TimerToken::Overrun);
        self.state.msr &= !FDC_STATUS_MRQ;

        let result = match std::mem::take(&mut self.stage) {
            Stage::Transfer | Stage::SectorEnd => self.terminate_transfer(),
            _ => Continuation::Complete(InterruptCode::NormalTermination),
        };
        log::debug!("terminal_count(): {} ends at {}", command, self.state.chrn);
        self.apply(result, sched);
    }

    fn terminate_transfer(&mut self) -> Continuation {
        match self.state.command_id() {
            Command::WriteData | Command::WriteDeleted => {
                self.write_sector();
                self.advance_sector();
            }
            Command::ReadData | Command::ReadDeleted => {
                if !self.xfer.crc_ok {
                    return self.fail(FdcError::DataCrcMismatch);
                }
                if self.xfer.control_mark {
                    self.state.st2 |= ST2_CONTROL_MARK;
                    self.advance_sector();
                    return Continuation::Complete(InterruptCode::AbnormalTermination);
                }
                self.advance_sector();
            }
            Command::ReadTrack => {
                if !self.xfer.crc_ok {
                    self.state.st1 |= ST1_DATA_ERROR;
                    self.state.st2 |= ST2_DATA_ERROR_IN_DATA;
                }
                let r = self.state.chrn.r().wrapping_add(1);
                self.state.chrn.set_r(r);
            }
            _ => {}
        }
        Continuation::Complete(InterruptCode::NormalTermination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_types::disk::{DiskDescription, SectorDescription, TrackDescription},
        host::FloppyHost,
        machine_config::FdcConfig,
        surface::Surface,
    };

    fn pattern(c: u8, h: u8, r: u8, len: usize) -> Vec<u8> {
        (0..len).map(|i| (i as u8) ^ c.wrapping_mul(7) ^ h.wrapping_mul(3) ^ r).collect()
    }

    fn patterned_disk(sides: u8, tracks: u8, sectors: u8) -> DiskDescription {
        let mut desc = DiskDescription {
            sides,
            tracks_per_side: tracks,
            ..Default::default()
        };
        for c in 0..tracks {
            for h in 0..sides {
                let list = (1..=sectors)
                    .map(|r| SectorDescription::new(DiskChsn::new(c, h, r, 2), pattern(c, h, r, 512)))
                    .collect();
                desc.tracks.push(TrackDescription::new(c, h, list));
            }
        }
        desc
    }

    fn host_with(desc: &DiskDescription, config: FdcConfig) -> FloppyHost {
        let mut host = FloppyHost::new(config);
        host.insert(0, Surface::encode(desc).unwrap(), Some(false));
        host.fdc_mut().motor_on(0);
        host
    }

    fn host_with_patterned(sides: u8, tracks: u8, sectors: u8) -> FloppyHost {
        let mut config = FdcConfig::default();
        config.drives[0].heads = sides;
        host_with(&patterned_disk(sides, tracks, sectors), config)
    }

    fn weak_disk(data_crc_error: bool) -> DiskDescription {
        let mut data = vec![0x11; 512];
        data.extend_from_slice(&[0x22; 512]);
        data.extend_from_slice(&[0x33; 512]);
        let mut sectors = vec![SectorDescription::new(DiskChsn::new(0, 0, 1, 2), data)
            .with_weak_copies(3)
            .with_data_crc_error(data_crc_error)];
        sectors.extend((2..=5).map(|r| SectorDescription::new(DiskChsn::new(0, 0, r, 2), pattern(0, 0, r, 512))));
        DiskDescription {
            sides: 1,
            tracks_per_side: 1,
            tracks: vec![TrackDescription::new(0, 0, sectors)],
            ..Default::default()
        }
    }

    fn read_sector_one(host: &mut FloppyHost) -> (Vec<u8>, Vec<u8>) {
        host.command(&[0x46, 0x00, 0, 0, 1, 2, 1, 0x2a, 0xff]);
        let data = host.read_bytes(512, 2000);
        host.terminal_count();
        host.wait_for_result(1000);
        (data, host.read_result())
    }

    #[test]
    fn transfer_lengths() {
        assert_eq!(transfer_len(2, 0xFF), 512);
        assert_eq!(transfer_len(0, 0x40), 0x40);
        assert_eq!(transfer_len(0, 0x80), 0x80);
        assert_eq!(transfer_len(1, 0x10), 256);
    }

    #[test]
    fn find_id_orders_by_rotation() {
        let surface = Surface::encode(&patterned_disk(1, 1, 9)).unwrap();
        let track = &surface.tracks()[0];
        let s4 = &track.sectors()[3];

        let (found, bytes) = find_id(track, s4.id_field.start - 5, None, Encoding::Mfm);
        assert_eq!(found, Ok((3, DiskChsn::new(0, 0, 4, 2))));
        assert_eq!(bytes, 5 + s4.id_field.len);

        // Sector 1 lies behind the cursor: reached after the index hole.
        let (found, bytes) = find_id(track, s4.id_field.start, Some(DiskChsn::new(0, 0, 1, 2)), Encoding::Mfm);
        assert_eq!(found.map(|(i, _)| i), Ok(0));
        assert_eq!(
            bytes,
            6250 - s4.id_field.start + track.sectors()[0].id_field.start + track.sectors()[0].id_field.len
        );
    }

    #[test]
    fn find_id_failures() {
        let surface = Surface::encode(&patterned_disk(1, 1, 9)).unwrap();
        let track = &surface.tracks()[0];

        let (found, bytes) = find_id(track, 100, Some(DiskChsn::new(0, 0, 0x20, 2)), Encoding::Mfm);
        assert_eq!(
            found,
            Err(FdcError::SectorNotFound {
                wrong_cylinder: false,
                bad_cylinder: false
            })
        );
        assert_eq!(bytes, 6250 - 100 + 6250);

        let (found, _) = find_id(track, 0, Some(DiskChsn::new(4, 0, 1, 2)), Encoding::Mfm);
        assert_eq!(
            found,
            Err(FdcError::SectorNotFound {
                wrong_cylinder: true,
                bad_cylinder: false
            })
        );

        let (found, _) = find_id(track, 0, None, Encoding::Fm);
        assert_eq!(found, Err(FdcError::AddressMarkMissing));
    }

    #[test]
    fn read_id_without_disk() {
        let mut host = FloppyHost::new(FdcConfig::default());
        host.write_data(0x4a);
        host.write_data(0x00);
        assert_eq!(host.fdc().phase(), ControllerPhase::ExecutionPhase);
        host.emulate_frames(10);
        assert_eq!(host.fdc().phase(), ControllerPhase::ExecutionPhase);
        host.emulate_frames(30);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.read_result(), vec![0x40, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]);

        host.write_data(0x08);
        assert_eq!(host.fdc().state().command_id(), Command::Invalid);
        assert_eq!(host.read_data(), 0x80);
    }

    #[test]
    fn read_id_reports_next_sector() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x4a, 0x00]);
        host.wait_for_result(1000);
        let result = host.read_result();
        assert_eq!(&result[..3], &[0x00, 0x00, 0x00]);
        assert_eq!(result[3], 0);
        assert!((1..=9).contains(&result[5]));
        assert_eq!(result[6], 2);
    }

    #[test]
    fn read_data_end_to_end() {
        let mut host = host_with_patterned(1, 40, 9);
        host.command(&[0x0f, 0x00, 10]);
        host.emulate_frames(20);
        assert_eq!(host.sense_interrupt(), (0x20, 10));

        host.command(&[0x46, 0x00, 10, 0, 1, 2, 9, 0x2a, 0xff]);
        let data = host.read_bytes(512, 1000);
        assert_eq!(data, pattern(10, 0, 1, 512));
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 10, 0, 2, 2]);
        assert_eq!(host.fdc().int_req(), IntRequest::None);
    }

    #[test]
    fn read_data_multi_sector_to_eot() {
        let mut host = host_with_patterned(1, 2, 5);
        host.command(&[0x46, 0x00, 0, 0, 1, 2, 5, 0x2a, 0xff]);
        let data = host.read_bytes(5 * 512, 2000);
        for r in 1..=5u8 {
            let start = (r as usize - 1) * 512;
            assert_eq!(&data[start..start + 512], &pattern(0, 0, r, 512)[..], "sector {}", r);
        }
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x40, 0x80, 0x00, 1, 0, 1, 2]);
    }

    #[test]
    fn read_data_multi_track() {
        let mut host = host_with_patterned(2, 2, 9);
        host.command(&[0xc6, 0x00, 0, 0, 8, 2, 9, 0x2a, 0xff]);
        let data = host.read_bytes(3 * 512, 2000);
        assert_eq!(&data[..512], &pattern(0, 0, 8, 512)[..]);
        assert_eq!(&data[512..1024], &pattern(0, 0, 9, 512)[..]);
        assert_eq!(&data[1024..], &pattern(0, 1, 1, 512)[..]);
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x04, 0x00, 0x00, 0, 1, 2, 2]);
    }

    #[test]
    fn read_data_not_ready() {
        let mut host = host_with_patterned(1, 2, 9);
        host.fdc_mut().motor_off(0);
        host.command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2a, 0xff]);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.read_result(), vec![0x48, 0x00, 0x00, 0, 0, 1, 2]);
    }

    #[test]
    fn read_data_sector_not_found() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x46, 0x00, 0, 0, 0x20, 2, 0x20, 0x2a, 0xff]);
        host.wait_for_result(1000);
        assert_eq!(host.read_result(), vec![0x40, 0x04, 0x00, 0, 0, 0x20, 2]);

        // Head is on cylinder 0, request cylinder 1.
        host.command(&[0x46, 0x00, 1, 0, 1, 2, 9, 0x2a, 0xff]);
        host.wait_for_result(1000);
        assert_eq!(host.read_result(), vec![0x40, 0x04, 0x10, 1, 0, 1, 2]);
    }

    #[test]
    fn read_data_wrong_encoding() {
        let mut host = host_with_patterned(1, 2, 9);
        // MF clear: FM read of an MFM track finds no address marks.
        host.command(&[0x06, 0x00, 0, 0, 1, 2, 9, 0x2a, 0xff]);
        host.wait_for_result(1000);
        assert_eq!(&host.read_result()[..3], &[0x40, 0x05, 0x00]);
    }

    #[test]
    fn read_data_crc_error() {
        let mut desc = patterned_disk(1, 1, 3);
        desc.tracks[0].sectors[1].data_crc_error = true;
        let mut host = host_with(&desc, FdcConfig::default());
        host.command(&[0x46, 0x00, 0, 0, 1, 2, 3, 0x2a, 0xff]);
        let data = host.read_bytes(1024, 2000);
        assert_eq!(&data[512..], &pattern(0, 0, 2, 512)[..]);
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x40, 0x20, 0x20, 0, 0, 2, 2]);
    }

    #[test]
    fn read_deleted_sets_control_mark() {
        let mut desc = patterned_disk(1, 1, 3);
        desc.tracks[0].sectors[1].deleted = true;
        let mut host = host_with(&desc, FdcConfig::default());

        // SK clear: the deleted sector is transferred and flagged.
        host.command(&[0x46, 0x00, 0, 0, 2, 2, 3, 0x2a, 0xff]);
        let data = host.read_bytes(512, 2000);
        assert_eq!(data, pattern(0, 0, 2, 512));
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x40, 0x00, 0x40, 0, 0, 3, 2]);

        // SK set: the deleted sector is skipped.
        host.command(&[0x66, 0x00, 0, 0, 1, 2, 3, 0x2a, 0xff]);
        let data = host.read_bytes(1024, 2000);
        assert_eq!(&data[..512], &pattern(0, 0, 1, 512)[..]);
        assert_eq!(&data[512..], &pattern(0, 0, 3, 512)[..]);
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x40, 0x80, 0x00, 1, 0, 1, 2]);

        // Read Deleted Data wants the deleted mark.
        host.command(&[0x4c, 0x00, 0, 0, 2, 2, 2, 0x2a, 0xff]);
        let data = host.read_bytes(512, 2000);
        assert_eq!(data, pattern(0, 0, 2, 512));
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 1, 0, 1, 2]);
    }

    #[test]
    fn read_data_overrun() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2a, 0xff]);
        host.wait_for_rqm(1000);
        host.read_data();
        host.advance_ms(250);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.read_result(), vec![0x40, 0x10, 0x00, 0, 0, 1, 2]);
    }

    #[test]
    fn short_transfer_with_dtl() {
        let mut desc = DiskDescription {
            sides: 1,
            tracks_per_side: 1,
            ..Default::default()
        };
        let sectors = (1..=4)
            .map(|r| SectorDescription::new(DiskChsn::new(0, 0, r, 0), pattern(0, 0, r, 128)))
            .collect();
        desc.tracks.push(TrackDescription::new(0, 0, sectors));
        let mut host = host_with(&desc, FdcConfig::default());

        host.command(&[0x46, 0x00, 0, 0, 1, 0, 2, 0x2a, 0x20]);
        let data = host.read_bytes(0x40, 2000);
        assert_eq!(&data[..0x20], &pattern(0, 0, 1, 0x20)[..]);
        assert_eq!(&data[0x20..], &pattern(0, 0, 2, 0x20)[..]);
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x40, 0x80, 0x00, 1, 0, 1, 0]);
    }

    #[test]
    fn write_then_read_back() {
        let mut host = host_with_patterned(1, 2, 9);
        let payload: Vec<u8> = (0..512).map(|i| (i * 3) as u8).collect();

        host.command(&[0x45, 0x00, 0, 0, 3, 2, 9, 0x2a, 0xff]);
        host.write_bytes(&payload, 2000);
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 0, 0, 4, 2]);

        let report = host.emulate_frames(1);
        assert_eq!(report[0].changed_sectors.len(), 1);
        assert_eq!(report[0].changed_sectors[0].sector, 2);
        assert!(host.fdc().drive(0).unwrap().surface().unwrap().is_dirty());

        host.command(&[0x46, 0x00, 0, 0, 3, 2, 9, 0x2a, 0xff]);
        assert_eq!(host.read_bytes(512, 2000), payload);
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 0, 0, 4, 2]);

        // Neighbours are untouched.
        let desc = host.fdc().drive(0).unwrap().surface().unwrap().decode();
        let sectors = &desc.tracks[0].sectors;
        assert_eq!(sectors[1].data, pattern(0, 0, 2, 512));
        assert_eq!(sectors[2].data, payload);
        assert!(!sectors[2].data_crc_error);
        assert_eq!(sectors[3].data, pattern(0, 0, 4, 512));
    }

    #[test]
    fn write_deleted_then_read_deleted() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x49, 0x00, 0, 0, 5, 2, 5, 0x2a, 0xff]);
        host.write_bytes(&[0x5A; 512], 2000);
        host.wait_for_result(100);
        // EOT reached without terminal count.
        assert_eq!(host.read_result(), vec![0x40, 0x80, 0x00, 1, 0, 1, 2]);

        let desc = host.fdc().drive(0).unwrap().surface().unwrap().decode();
        assert!(desc.tracks[0].sectors[4].deleted);

        host.command(&[0x4c, 0x00, 0, 0, 5, 2, 5, 0x2a, 0xff]);
        assert_eq!(host.read_bytes(512, 2000), vec![0x5A; 512]);
    }

    #[test]
    fn write_partial_sector_is_padded() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x45, 0x00, 0, 0, 1, 2, 9, 0x2a, 0xff]);
        host.write_bytes(&[0x11; 100], 2000);
        host.terminal_count();
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 0, 0, 2, 2]);

        let desc = host.fdc().drive(0).unwrap().surface().unwrap().decode();
        let data = &desc.tracks[0].sectors[0].data;
        assert!(data[..100].iter().all(|&b| b == 0x11));
        assert!(data[100..].iter().all(|&b| b == 0x00));
        assert!(!desc.tracks[0].sectors[0].data_crc_error);
    }

    #[test]
    fn write_protected_disk() {
        let mut host = FloppyHost::new(FdcConfig::default());
        host.insert(0, Surface::encode(&patterned_disk(1, 2, 9)).unwrap(), Some(true));
        host.fdc_mut().motor_on(0);
        host.command(&[0x45, 0x00, 0, 0, 1, 2, 9, 0x2a, 0xff]);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.read_result(), vec![0x40, 0x02, 0x00, 0, 0, 1, 2]);
        assert!(!host.fdc().drive(0).unwrap().is_head_loaded());
    }

    #[test]
    fn scan_equal_hit() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x51, 0x00, 0, 0, 1, 2, 9, 0x2a, 0x01]);
        let mut host_data = pattern(0, 0, 1, 512);
        host_data[10] = 0xFF;
        host.write_bytes(&host_data, 2000);
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x08, 0, 0, 1, 2]);
    }

    #[test]
    fn scan_steps_until_not_satisfied() {
        let mut host = host_with_patterned(1, 2, 9);
        // STP 2 visits R=1, 3 and 5 before passing EOT.
        host.command(&[0x51, 0x00, 0, 0, 1, 2, 5, 0x2a, 0x02]);
        for _ in 0..3 {
            host.write_bytes(&[0x00; 512], 2000);
        }
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x04, 0, 0, 5, 2]);
    }

    #[test]
    fn scan_high_or_equal() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x5d, 0x00, 0, 0, 1, 2, 9, 0x2a, 0x01]);
        // Every disk byte is at least zero.
        host.write_bytes(&[0x00; 512], 2000);
        host.wait_for_result(100);
        assert_eq!(host.read_result(), vec![0x00, 0x00, 0x00, 0, 0, 1, 2]);
    }

    #[test]
    fn read_track_in_physical_order() {
        let mut desc = patterned_disk(1, 1, 4);
        // Interleave the IDs: physical order 1, 3, 2, 4.
        desc.tracks[0].sectors.swap(1, 2);
        let mut host = host_with(&desc, FdcConfig::default());

        host.command(&[0x42, 0x00, 0, 0, 1, 2, 3, 0x2a, 0xff]);
        let data = host.read_bytes(3 * 512, 2000);
        assert_eq!(&data[..512], &pattern(0, 0, 1, 512)[..]);
        assert_eq!(&data[512..1024], &pattern(0, 0, 3, 512)[..]);
        assert_eq!(&data[1024..], &pattern(0, 0, 2, 512)[..]);
        host.wait_for_result(100);
        // The IDs did not follow the expected sequence.
        assert_eq!(host.read_result(), vec![0x40, 0x04, 0x00, 0, 0, 4, 2]);
    }

    #[test]
    fn weak_sector_reads_cycle_through_copies() {
        let mut host = host_with(&weak_disk(false), FdcConfig::default());
        for fill in [0x11, 0x22, 0x33, 0x11] {
            let (data, result) = read_sector_one(&mut host);
            assert_eq!(data, vec![fill; 512]);
            assert_eq!(result, vec![0x00, 0x00, 0x00, 1, 0, 1, 2]);
        }
    }

    #[test]
    fn weak_sector_crc_error_on_every_copy() {
        let mut host = host_with(&weak_disk(true), FdcConfig::default());
        for fill in [0x11, 0x22, 0x33] {
            host.command(&[0x46, 0x00, 0, 0, 1, 2, 1, 0x2a, 0xff]);
            let data = host.read_bytes(512, 2000);
            assert_eq!(data, vec![fill; 512]);
            host.wait_for_result(1000);
            assert_eq!(&host.read_result()[..3], &[0x40, 0x20, 0x20]);
        }
    }

    #[test]
    fn terminal_count_outside_execution_is_ignored() {
        let mut host = host_with_patterned(1, 2, 9);
        host.terminal_count();
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        host.command(&[0x04, 0x00]);
        host.terminal_count();
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.read_result().len(), 1);
    }

    #[test]
    fn head_unloads_after_idle() {
        let mut host = host_with_patterned(1, 2, 9);
        host.command(&[0x46, 0x00, 0, 0, 1, 2, 9, 0x2a, 0xff]);
        host.read_bytes(512, 2000);
        host.terminal_count();
        host.read_result();
        assert!(host.fdc().drive(0).unwrap().is_head_loaded());
        host.advance_ms(250);
        assert!(!host.fdc().drive(0).unwrap().is_head_loaded());
    }

    #[test]
    fn wobble_is_reproducible() {
        let run = || {
            let config = FdcConfig {
                wobble_seed: Some(7),
                ..Default::default()
            };
            let mut host = host_with(&patterned_disk(1, 2, 9), config);
            host.command(&[0x46, 0x00, 0, 0, 5, 2, 9, 0x2a, 0xff]);
            host.wait_for_rqm(1000);
            host.current_tick()
        };
        assert_eq!(run(), run());
    }
}
