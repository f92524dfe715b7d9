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

    host.rs

    A minimal host for the floppy controller: a virtual clock, port access and
    frame pacing. The frontend and the test suites drive the controller through it.

*/

use crate::{
    devices::{
        fdc::{
            commands::{FDC_STATUS_DIO, FDC_STATUS_MRQ},
            ControllerPhase,
            FloppyController,
        },
        floppy_drive::DriveFrameReport,
    },
    machine_config::FdcConfig,
    surface::Surface,
    timing::{Scheduler, VirtualClock},
};

/// Length of one emulated frame, in milliseconds.
pub const FRAME_MS: u64 = 20;

pub struct FloppyHost {
    fdc:   FloppyController,
    clock: VirtualClock,
}

impl FloppyHost {
    pub fn new(config: FdcConfig) -> Self {
        Self {
            fdc:   FloppyController::new(config),
            clock: VirtualClock::new(),
        }
    }

    pub fn fdc(&self) -> &FloppyController {
        &self.fdc
    }

    pub fn fdc_mut(&mut self) -> &mut FloppyController {
        &mut self.fdc
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.clock.current_tick()
    }

    pub fn reset(&mut self) {
        self.fdc.reset(&mut self.clock);
    }

    pub fn insert(&mut self, drive_select: usize, surface: Surface, write_protect: Option<bool>) {
        self.fdc.insert_disk(drive_select, surface, write_protect);
    }

    pub fn eject(&mut self, drive_select: usize) -> Option<Surface> {
        self.fdc.eject_disk(drive_select)
    }

    pub fn read_msr(&self) -> u8 {
        self.fdc.handle_status_register_read()
    }

    pub fn read_data(&mut self) -> u8 {
        self.fdc.handle_data_register_read(&mut self.clock)
    }

    pub fn write_data(&mut self, data: u8) {
        self.fdc.handle_data_register_write(data, &mut self.clock);
    }

    /// Write a command byte followed by its parameters.
    pub fn command(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_data(b);
        }
    }

    pub fn terminal_count(&mut self) {
        self.fdc.terminal_count(&mut self.clock);
    }

    /// Run the clock forward by `ticks`, delivering every event that falls due on the way.
    pub fn advance(&mut self, ticks: u64) {
        let target = self.clock.current_tick().saturating_add(ticks);
        while let Some(event) = self.clock.pop_due(target) {
            self.clock.set_tick(event.tick);
            self.fdc.on_timer(event.token, event.payload, &mut self.clock);
        }
        self.clock.set_tick(target);
    }

    pub fn advance_ms(&mut self, ms: u64) {
        let ticks = self.fdc.config().ms_to_ticks(ms);
        self.advance(ticks);
    }

    /// Run `frames` frames. Returns one report per drive, covering every frame run.
    pub fn emulate_frames(&mut self, frames: usize) -> Vec<DriveFrameReport> {
        let mut reports: Vec<DriveFrameReport> = Vec::new();
        for _ in 0..frames {
            self.advance_ms(FRAME_MS);
            let frame = self.fdc.on_frame_completed();
            if reports.is_empty() {
                reports = frame;
                continue;
            }
            for (acc, report) in reports.iter_mut().zip(frame) {
                acc.changed_sectors.extend(report.changed_sectors);
                acc.save_light = report.save_light;
                acc.motor_speed = report.motor_speed;
            }
        }
        reports
    }

    /// Advance until `pred` holds or `max_ms` have passed, stepping from event to event.
    fn wait_until(&mut self, max_ms: u64, pred: impl Fn(&FloppyController) -> bool) -> bool {
        let deadline = self
            .clock
            .current_tick()
            .saturating_add(self.fdc.config().ms_to_ticks(max_ms));
        loop {
            if pred(&self.fdc) {
                return true;
            }
            let now = self.clock.current_tick();
            match self.clock.next_due() {
                Some(due) if due <= deadline => self.advance(due.saturating_sub(now)),
                _ => {
                    self.advance(deadline.saturating_sub(now));
                    return pred(&self.fdc);
                }
            }
        }
    }

    /// Wait for the controller to request service of the data register.
    pub fn wait_for_rqm(&mut self, max_ms: u64) -> bool {
        self.wait_until(max_ms, |fdc| fdc.handle_status_register_read() & FDC_STATUS_MRQ != 0)
    }

    /// Wait for the controller to enter the result phase.
    pub fn wait_for_result(&mut self, max_ms: u64) -> bool {
        self.wait_until(max_ms, |fdc| fdc.phase() == ControllerPhase::ResultPhase)
    }

    /// Read up to `len` bytes in the execution phase, waiting up to `max_ms` for each.
    pub fn read_bytes(&mut self, len: usize, max_ms: u64) -> Vec<u8> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            self.wait_for_rqm(max_ms);
            let msr = self.read_msr();
            if self.fdc.phase() != ControllerPhase::ExecutionPhase
                || msr & (FDC_STATUS_MRQ | FDC_STATUS_DIO) != (FDC_STATUS_MRQ | FDC_STATUS_DIO)
            {
                log::warn!("read_bytes(): transfer ended after {} of {} bytes", data.len(), len);
                break;
            }
            data.push(self.read_data());
        }
        data
    }

    /// Write `bytes` in the execution phase, waiting up to `max_ms` for each.
    pub fn write_bytes(&mut self, bytes: &[u8], max_ms: u64) -> usize {
        for (i, &b) in bytes.iter().enumerate() {
            self.wait_for_rqm(max_ms);
            let msr = self.read_msr();
            if self.fdc.phase() != ControllerPhase::ExecutionPhase
                || msr & (FDC_STATUS_MRQ | FDC_STATUS_DIO) != FDC_STATUS_MRQ
            {
                log::warn!("write_bytes(): transfer ended after {} of {} bytes", i, bytes.len());
                return i;
            }
            self.write_data(b);
        }
        bytes.len()
    }

    /// Drain the result phase.
    pub fn read_result(&mut self) -> Vec<u8> {
        let mut result = Vec::new();
        while self.fdc.phase() == ControllerPhase::ResultPhase {
            result.push(self.read_data());
        }
        result
    }

    /// Issue Sense Interrupt Status and return (ST0, PCN). An invalid response has PCN 0.
    pub fn sense_interrupt(&mut self) -> (u8, u8) {
        self.write_data(0x08);
        let result = self.read_result();
        (
            result.first().copied().unwrap_or(0xFF),
            result.get(1).copied().unwrap_or(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_types::disk::DiskDescription;

    #[test]
    fn frames_advance_clock() {
        let mut host = FloppyHost::new(FdcConfig::default());
        host.emulate_frames(3);
        assert_eq!(host.current_tick(), 3 * FRAME_MS * 1000);
    }

    #[test]
    fn frame_reports_cover_each_drive() {
        let mut host = FloppyHost::new(FdcConfig::with_drives(3));
        let reports = host.emulate_frames(2);
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.changed_sectors.is_empty()));
    }

    #[test]
    fn wait_gives_up_at_deadline() {
        let mut host = FloppyHost::new(FdcConfig::default());
        host.write_data(0x4a);
        host.write_data(0x00);
        assert!(!host.wait_for_result(100));
        assert_eq!(host.current_tick(), 100 * 1000);
    }

    #[test]
    fn eject_returns_surface() {
        let mut host = FloppyHost::new(FdcConfig::default());
        let surface = Surface::encode(&DiskDescription::uniform(1, 40, 9, 2, 1, 0xE5)).unwrap();
        host.insert(1, surface, None);
        assert!(host.fdc().drive(1).unwrap().has_disk());
        let surface = host.eject(1).unwrap();
        assert_eq!(surface.tracks_per_side(), 40);
        assert!(!host.fdc().drive(1).unwrap().has_disk());
    }
}
