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

    devices::fdc::seek.rs

    Seek, Recalibrate and Sense Interrupt Status.

    Seeks run in the background once their parameters are accepted, so several
    drives may be positioning at once. Each step is scheduled through the host
    clock; the drive that has waited longest since its last step moves next.
*/

use crate::{
    devices::{
        fdc::{commands::*, controller::*},
        floppy_drive::StepDirection,
    },
    timing::{Scheduler, TimerPayload, TimerToken},
};

/// Cylinder count the controller assumes when recalibrating.
pub const RECALIBRATE_STEPS: u8 = 77;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum SeekStatus {
    #[default]
    None = 0,
    SeekStarted = 1,
    Recalibrate = 2,
    NormalTermination = 4,
    AbnormalTermination = 5,
    DriveNotReady = 6,
}

impl SeekStatus {
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, SeekStatus::SeekStarted | SeekStatus::Recalibrate)
    }

    /// A terminated seek is waiting to be reported by Sense Interrupt Status.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        *self >= SeekStatus::NormalTermination
    }
}

/// Per-unit positioning state as the controller sees it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DriveSeek {
    /// Present cylinder number.
    pub present: u8,
    /// Target cylinder number.
    pub new: u8,
    /// Cylinder number saved at the start of a recalibrate.
    pub saved: u8,
    pub status: SeekStatus,
    /// Steps since this unit last moved. Zero when idle.
    pub age: u32,
    /// Equipment check: recalibrate failed to find track 0.
    pub ec: bool,
}

#[inline]
fn busy_bit(unit: usize) -> u8 {
    FDC_STATUS_FDD_A_BUSY << (unit & 0x03)
}

impl FloppyController {
    /// Perform the Recalibrate command.
    pub(crate) fn command_recalibrate(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        let unit = self.state.us;
        if self.seek_pending(unit) {
            log::warn!("command_recalibrate(): unit {} still positioning, command ignored", unit);
            return Continuation::Complete(InterruptCode::NormalTermination);
        }

        let seek = &mut self.seek[unit];
        seek.saved = seek.present;
        seek.present = RECALIBRATE_STEPS;
        seek.new = 0;
        seek.status = SeekStatus::Recalibrate;
        log::debug!("command_recalibrate(): unit {} from cylinder {}", unit, seek.saved);

        self.seek_step(true, sched);
        Continuation::Complete(InterruptCode::NormalTermination)
    }

    /// Perform the Seek command.
    pub(crate) fn command_seek(&mut self, sched: &mut dyn Scheduler) -> Continuation {
        let unit = self.state.us;
        if self.seek_pending(unit) {
            log::warn!("command_seek(): unit {} still positioning, command ignored", unit);
            return Continuation::Complete(InterruptCode::NormalTermination);
        }

        let ncn = self.state.param(1);
        let seek = &mut self.seek[unit];
        seek.new = ncn;
        seek.status = SeekStatus::SeekStarted;
        log::debug!("command_seek(): unit {} from cylinder {} to {}", unit, seek.present, ncn);

        self.seek_step(true, sched);
        Continuation::Complete(InterruptCode::NormalTermination)
    }

    /// A unit is busy until its seek has run and its interrupt has been sensed.
    fn seek_pending(&self, unit: usize) -> bool {
        self.state.msr & busy_bit(unit) != 0 || self.seek[unit].status != SeekStatus::None
    }

    /// Advance positioning by one step.
    ///
    /// With `start` set the unit addressed by the current command is stepped. Otherwise
    /// this is a scheduled continuation and the active unit that has waited longest goes.
    pub(crate) fn seek_step(&mut self, start: bool, sched: &mut dyn Scheduler) {
        let unit = if start {
            let unit = self.state.us;
            if self.state.msr & busy_bit(unit) != 0 {
                return;
            }
            self.state.msr |= busy_bit(unit);
            unit
        }
        else {
            let mut oldest: Option<usize> = None;
            for (i, seek) in self.seek.iter().enumerate() {
                if seek.status.is_active() && oldest.map_or(true, |o| seek.age > self.seek[o].age) {
                    oldest = Some(i);
                }
            }
            match oldest {
                Some(unit) => unit,
                None => return,
            }
        };

        let (track0, ready) = match self.unit_drive(unit) {
            Some(drive) => (drive.is_track0(), drive.is_ready()),
            None => (false, false),
        };

        let seek = self.seek[unit];
        let recalibrate = seek.status == SeekStatus::Recalibrate;

        if recalibrate && seek.present == seek.new && !track0 {
            log::debug!("seek_step(): unit {} recalibrate failed to reach track 0", unit);
            self.terminate_seek(unit, SeekStatus::AbnormalTermination);
            self.seek[unit].ec = true;
            return;
        }

        if seek.present == seek.new || (recalibrate && track0) {
            if recalibrate {
                self.seek[unit].present = 0;
            }
            log::debug!(
                "seek_step(): unit {} reached cylinder {}",
                unit,
                self.seek[unit].present
            );
            self.terminate_seek(unit, SeekStatus::NormalTermination);
            return;
        }

        if !ready {
            if recalibrate {
                let s = &mut self.seek[unit];
                s.present = s.saved.wrapping_sub(RECALIBRATE_STEPS.wrapping_sub(s.present));
            }
            log::debug!("seek_step(): unit {} not ready", unit);
            self.terminate_seek(unit, SeekStatus::DriveNotReady);
            return;
        }

        let direction = if seek.present > seek.new {
            self.seek[unit].present -= 1;
            StepDirection::Outward
        }
        else {
            self.seek[unit].present += 1;
            StepDirection::Inward
        };
        if let Some(drive) = self.unit_drive_mut(unit) {
            drive.step(direction);
        }

        for s in self.seek.iter_mut().filter(|s| s.age > 0) {
            s.age += 1;
        }
        self.seek[unit].age = 1;

        let step_ticks = self.ms_to_ticks(self.state.step_rate_ms);
        sched.schedule_in(step_ticks, TimerToken::SeekStep, TimerPayload::Continue);
    }

    fn terminate_seek(&mut self, unit: usize, status: SeekStatus) {
        let seek = &mut self.seek[unit];
        seek.status = status;
        seek.age = 0;
        self.state.msr &= !busy_bit(unit);
        let req = if status == SeekStatus::DriveNotReady {
            IntRequest::Ready
        }
        else {
            IntRequest::Seek
        };
        self.state.int_req = self.state.int_req.max(req);
    }

    /// Perform the Sense Interrupt Status command. Reports the first unit with a terminated
    /// seek and clears it.
    pub(crate) fn command_sense_interrupt(&mut self, _sched: &mut dyn Scheduler) -> Continuation {
        let pending = self.seek.iter().position(|s| s.status.is_terminated());

        match pending {
            Some(unit) => {
                let seek = self.seek[unit];
                let mut st0 = ST0_SEEK_END | unit as u8;
                match seek.status {
                    SeekStatus::AbnormalTermination => st0 |= ST0_ABNORMAL_TERMINATION,
                    SeekStatus::DriveNotReady => st0 |= ST0_ABNORMAL_POLLING | ST0_NOT_READY,
                    _ => {}
                }
                if seek.ec {
                    st0 |= ST0_UNIT_CHECK;
                }
                self.seek[unit] = DriveSeek {
                    status: SeekStatus::None,
                    age: 0,
                    ec: false,
                    ..seek
                };
                self.state.st0 = st0;
                self.state.results = vec![st0, seek.present];
                log::debug!(
                    "command_sense_interrupt(): unit {} ST0: {:02X} PCN: {}",
                    unit,
                    st0,
                    seek.present
                );
            }
            None => {
                self.state.int_req = IntRequest::None;
                self.state.st0 = ST0_INVALID_OPCODE;
                self.state.results = vec![ST0_INVALID_OPCODE, 0];
                log::debug!("command_sense_interrupt(): no interrupt pending");
            }
        }
        Continuation::Complete(InterruptCode::NormalTermination)
    }
}
