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

    devices::fdc::controller.rs

    Implements the NEC µPD765 Floppy Disk Controller: the register interface,
    the command/execution/result phase machine and the diagnostic log.

    Command handlers live in the seek, transfer and format modules. Each
    returns a Continuation telling the controller whether to wait for the
    host, resume after a delay, or move to the result phase.
*/

use std::fmt::Display;

use fdc765_common::types::history_buffer::HistoryBuffer;
use rand::{rngs::StdRng, SeedableRng};

use crate::{
    device_types::chs::DiskChsn,
    devices::{
        fdc::{
            commands::*,
            seek::{DriveSeek, SeekStatus},
            transfer::{Stage, TransferState},
        },
        floppy_drive::{DriveFrameReport, FloppyDiskDrive},
    },
    machine_config::FdcConfig,
    surface::{Encoding, Surface},
    timing::{Scheduler, TimerPayload, TimerToken},
};

pub const FDC_MAX_DRIVES: usize = 4;

pub const DEFAULT_STEP_RATE_MS: u64 = 16;
pub const DEFAULT_HEAD_UNLOAD_MS: u64 = 240;
pub const DEFAULT_HEAD_LOAD_MS: u64 = 254;

/// Represents the current phase of the controller operation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ControllerPhase {
    #[default]
    CommandPhase,
    ExecutionPhase,
    ResultPhase,
}

/// Pending interrupt request, in increasing order of precedence.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntRequest {
    #[default]
    None,
    Result,
    Exec,
    Ready,
    Seek,
}

/// What a command handler asks the controller to do next.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Continuation {
    /// Stay in the execution phase and wait for the host to service the data register.
    Continue,
    /// Resume the running operation after the given number of ticks.
    Suspend(u64),
    /// Terminate the command and enter the result phase.
    Complete(InterruptCode),
}

pub(crate) type CommandDispatchFn = fn(&mut FloppyController, &mut dyn Scheduler) -> Continuation;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortOperation {
    ReadData,
    WriteData,
    /// The controller raised an interrupt at the end of a command.
    Interrupt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogPhase {
    Command,
    Parameter,
    Execution,
    Result,
    Status,
}

impl Display for LogPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            LogPhase::Command => "C",
            LogPhase::Parameter => "P",
            LogPhase::Execution => "E",
            LogPhase::Result => "R",
            LogPhase::Status => "S",
        };
        write!(f, "{}", tag)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FdcLogEntry {
    pub op: PortOperation,
    pub phase: LogPhase,
    pub data: u8,
    pub comment: String,
}

impl Display for FdcLogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dir = match self.op {
            PortOperation::ReadData => "<-",
            PortOperation::WriteData => "->",
            PortOperation::Interrupt => "!!",
        };
        write!(f, "{} {} {:02X} {}", self.phase, dir, self.data, self.comment)
    }
}

/// The controller's register file and command bookkeeping.
#[derive(Clone, Debug)]
pub struct ControllerState {
    pub phase: ControllerPhase,
    pub msr: u8,
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
    pub st3: u8,
    pub command: &'static CommandDescriptor,
    pub command_byte: u8,
    pub receiving_command: bool,
    pub params: Vec<u8>,
    pub results: Vec<u8>,
    pub result_idx: usize,
    pub mt: bool,
    pub mf: bool,
    pub sk: bool,
    pub deleted: bool,
    pub us: usize,
    pub hd: u8,
    pub non_dma: bool,
    pub step_rate_ms: u64,
    pub head_unload_ms: u64,
    pub head_load_ms: u64,
    pub int_req: IntRequest,
    /// C/H/R/N registers reported in the result phase.
    pub chrn: DiskChsn,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            phase: ControllerPhase::CommandPhase,
            msr: FDC_STATUS_MRQ,
            st0: 0,
            st1: 0,
            st2: 0,
            st3: 0,
            command: CommandDescriptor::invalid(),
            command_byte: 0,
            receiving_command: false,
            params: Vec::with_capacity(8),
            results: Vec::with_capacity(7),
            result_idx: 0,
            mt: false,
            mf: false,
            sk: false,
            deleted: false,
            us: 0,
            hd: 0,
            non_dma: true,
            step_rate_ms: DEFAULT_STEP_RATE_MS,
            head_unload_ms: DEFAULT_HEAD_UNLOAD_MS,
            head_load_ms: DEFAULT_HEAD_LOAD_MS,
            int_req: IntRequest::None,
            chrn: DiskChsn::new(0, 0, 0, 0),
        }
    }
}

impl ControllerState {
    #[inline]
    pub fn command_id(&self) -> Command {
        self.command.command
    }

    #[inline]
    pub fn param(&self, idx: usize) -> u8 {
        self.params.get(idx).copied().unwrap_or(0)
    }

    /// Encoding selected by the MF bit of the command byte.
    pub fn encoding(&self) -> Encoding {
        if self.mf {
            Encoding::Mfm
        }
        else {
            Encoding::Fm
        }
    }
}

#[derive(Clone, Debug)]
pub struct FdcDebugState {
    pub phase: ControllerPhase,
    pub msr: u8,
    pub st0: u8,
    pub st1: u8,
    pub st2: u8,
    pub st3: u8,
    pub command: Command,
    pub us: usize,
    pub hd: u8,
    pub int_req: IntRequest,
    pub chrn: DiskChsn,
    pub stage: String,
    pub seek: [DriveSeek; FDC_MAX_DRIVES],
    pub cmd_log: Vec<String>,
}

pub struct FloppyController {
    pub(crate) config: FdcConfig,
    pub(crate) state: ControllerState,
    pub(crate) drives: Vec<FloppyDiskDrive>,
    pub(crate) seek: [DriveSeek; FDC_MAX_DRIVES],
    pub(crate) stage: Stage,
    pub(crate) xfer: TransferState,
    pub(crate) wobble: Option<StdRng>,
    cmd_log: HistoryBuffer<FdcLogEntry>,
}

impl FloppyController {
    pub fn new(config: FdcConfig) -> Self {
        let drives = config
            .drives
            .iter()
            .take(FDC_MAX_DRIVES)
            .enumerate()
            .map(|(i, cfg)| FloppyDiskDrive::new(i, cfg))
            .collect();

        FloppyController {
            state: ControllerState::default(),
            drives,
            seek: Default::default(),
            stage: Stage::Idle,
            xfer: TransferState::default(),
            wobble: config.wobble_seed.map(StdRng::seed_from_u64),
            cmd_log: HistoryBuffer::new(config.log_len),
            config,
        }
    }

    /// Reset the controller. Inserted disks, motors and head positions survive.
    pub fn reset(&mut self, sched: &mut dyn Scheduler) {
        for token in [
            TimerToken::SeekStep,
            TimerToken::Operation,
            TimerToken::Overrun,
            TimerToken::HeadUnload,
        ] {
            sched.cancel(token);
        }
        self.state = ControllerState::default();
        self.seek = Default::default();
        self.stage = Stage::Idle;
        self.xfer = TransferState::default();
        for drive in self.drives.iter_mut() {
            drive.reset();
        }
        log::debug!("FDC reset");
    }

    pub fn config(&self) -> &FdcConfig {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn phase(&self) -> ControllerPhase {
        self.state.phase
    }

    pub fn int_req(&self) -> IntRequest {
        self.state.int_req
    }

    pub fn drive(&self, idx: usize) -> Option<&FloppyDiskDrive> {
        self.drives.get(idx)
    }

    pub fn seek_state(&self, unit: usize) -> Option<&DriveSeek> {
        self.seek.get(unit)
    }

    /// Map a unit select value onto a populated drive. Only as many select lines are decoded
    /// as there are drives, so unit 1 aliases drive 0 on a single-drive system.
    pub(crate) fn drive_index(&self, unit: usize) -> Option<usize> {
        match self.drives.len() {
            0 => None,
            n => Some(unit % n),
        }
    }

    pub(crate) fn unit_drive(&self, unit: usize) -> Option<&FloppyDiskDrive> {
        self.drive_index(unit).and_then(|i| self.drives.get(i))
    }

    pub(crate) fn unit_drive_mut(&mut self, unit: usize) -> Option<&mut FloppyDiskDrive> {
        self.drive_index(unit).and_then(move |i| self.drives.get_mut(i))
    }

    /// The drive addressed by the most recent command.
    pub(crate) fn selected_drive(&self) -> Option<&FloppyDiskDrive> {
        self.unit_drive(self.state.us)
    }

    pub(crate) fn selected_drive_mut(&mut self) -> Option<&mut FloppyDiskDrive> {
        self.unit_drive_mut(self.state.us)
    }

    pub fn insert_disk(&mut self, drive_select: usize, surface: Surface, write_protect: Option<bool>) {
        match self.drives.get_mut(drive_select) {
            Some(drive) => drive.insert(surface, write_protect),
            None => log::warn!("insert_disk(): no drive {}", drive_select),
        }
    }

    pub fn eject_disk(&mut self, drive_select: usize) -> Option<Surface> {
        self.drives.get_mut(drive_select).and_then(|d| d.eject())
    }

    pub fn motor_on(&mut self, drive_select: usize) {
        if let Some(drive) = self.drives.get_mut(drive_select) {
            drive.turn_on_motor();
        }
    }

    pub fn motor_off(&mut self, drive_select: usize) {
        if let Some(drive) = self.drives.get_mut(drive_select) {
            drive.turn_off_motor();
        }
    }

    /// Turn on the motor of the currently selected drive.
    pub fn turn_on_motor(&mut self) {
        if let Some(drive) = self.selected_drive_mut() {
            drive.turn_on_motor();
        }
    }

    pub fn turn_off_motor(&mut self) {
        if let Some(drive) = self.selected_drive_mut() {
            drive.turn_off_motor();
        }
    }

    pub fn write_protect(&mut self, drive_select: usize, write_protected: bool) {
        if let Some(drive) = self.drives.get_mut(drive_select) {
            drive.set_write_protect(write_protected);
        }
    }

    /// Per-frame housekeeping for every drive.
    pub fn on_frame_completed(&mut self) -> Vec<DriveFrameReport> {
        self.drives.iter_mut().map(|d| d.on_frame_completed()).collect()
    }

    #[inline]
    pub(crate) fn ms_to_ticks(&self, ms: u64) -> u64 {
        self.config.ms_to_ticks(ms)
    }

    pub fn handle_status_register_read(&self) -> u8 {
        self.state.msr
    }

    pub fn set_phase(&mut self, new_phase: ControllerPhase) {
        use ControllerPhase::*;
        match (self.state.phase, new_phase) {
            (CommandPhase, ExecutionPhase)
            | (ExecutionPhase, ResultPhase)
            | (ExecutionPhase, CommandPhase)
            | (ResultPhase, CommandPhase) => {
                self.state.phase = new_phase;
            }
            _ => {
                log::error!(
                    "set_phase(): Bad phase transition: {:?}->{:?}",
                    self.state.phase,
                    new_phase
                );
            }
        }
    }

    pub fn handle_data_register_read(&mut self, sched: &mut dyn Scheduler) -> u8 {
        if self.state.msr & (FDC_STATUS_MRQ | FDC_STATUS_DIO) != (FDC_STATUS_MRQ | FDC_STATUS_DIO) {
            log::trace!(
                "handle_data_register_read(): data register not ready, MSR: {:02X}",
                self.state.msr
            );
            return 0xFF;
        }

        match self.state.phase {
            ControllerPhase::ExecutionPhase => self.execution_read(sched),
            ControllerPhase::ResultPhase => self.result_read(),
            ControllerPhase::CommandPhase => 0xFF,
        }
    }

    fn result_read(&mut self) -> u8 {
        let idx = self.state.result_idx;
        let byte = self.state.results.get(idx).copied().unwrap_or(0xFF);
        let label = self.state.command.result_labels.get(idx).copied().unwrap_or("?");
        self.state.result_idx += 1;
        self.log_port(PortOperation::ReadData, LogPhase::Result, byte, label.to_string());

        if self.state.result_idx >= self.state.results.len() {
            // All result bytes sent, ready for a new command
            self.set_phase(ControllerPhase::CommandPhase);
            self.state.msr |= FDC_STATUS_MRQ;
            self.state.msr &= !(FDC_STATUS_DIO | FDC_STATUS_FDC_BUSY);
            if self.state.int_req < IntRequest::Ready {
                self.state.int_req = IntRequest::None;
            }
            // Terminated seeks keep the interrupt line up until each has been sensed.
            if self.seek.iter().any(|s| s.status.is_terminated()) {
                self.state.int_req = self.state.int_req.max(IntRequest::Seek);
            }
            log::trace!("handle_data_register_read(): last result byte read");
        }
        byte
    }

    pub fn handle_data_register_write(&mut self, data: u8, sched: &mut dyn Scheduler) {
        if self.state.msr & (FDC_STATUS_MRQ | FDC_STATUS_DIO) != FDC_STATUS_MRQ {
            log::warn!(
                "handle_data_register_write(): write of {:02X} ignored, MSR: {:02X}",
                data,
                self.state.msr
            );
            return;
        }

        match self.state.phase {
            ControllerPhase::CommandPhase => self.command_write(data, sched),
            ControllerPhase::ExecutionPhase => self.execution_write(data, sched),
            ControllerPhase::ResultPhase => {
                log::warn!("handle_data_register_write(): write during result phase ignored");
            }
        }
    }

    fn command_write(&mut self, data: u8, sched: &mut dyn Scheduler) {
        if !self.state.receiving_command {
            let mut desc = CommandDescriptor::lookup(data);

            // A Sense Interrupt Status without a pending interrupt is rejected as invalid.
            if desc.command == Command::SenseInt && self.state.int_req == IntRequest::None {
                log::warn!("Sense interrupt received without pending interrupt");
                desc = CommandDescriptor::invalid();
            }

            let command_byte = CommandByte::from_bytes([data]);
            self.state.command = desc;
            self.state.command_byte = data;
            self.state.mt = command_byte.mt();
            self.state.mf = command_byte.mfm();
            self.state.sk = command_byte.skip();
            self.state.params.clear();
            self.state.receiving_command = true;
            self.state.msr |= FDC_STATUS_FDC_BUSY;

            log::debug!("Received {} command: {:02X}", desc.command, data);
            self.log_port(
                PortOperation::WriteData,
                LogPhase::Command,
                data,
                desc.command.to_string(),
            );
        }
        else {
            let label = self
                .state
                .command
                .param_labels
                .get(self.state.params.len())
                .copied()
                .unwrap_or("?");
            self.log_port(PortOperation::WriteData, LogPhase::Parameter, data, label.to_string());
            self.state.params.push(data);
        }

        if self.state.params.len() >= self.state.command.param_len() {
            self.state.receiving_command = false;
            self.start_command(sched);
        }
    }

    /// All parameter bytes are in: enter the execution phase and dispatch the command.
    fn start_command(&mut self, sched: &mut dyn Scheduler) {
        self.set_phase(ControllerPhase::ExecutionPhase);
        self.state.msr &= !FDC_STATUS_MRQ;
        if self.state.non_dma {
            self.state.msr |= FDC_STATUS_NON_DMA_MODE;
        }

        let command = self.state.command_id();
        if command.selects_drive() {
            let dhs = DriveHeadSelect::from_bytes([self.state.param(0)]);
            self.state.us = dhs.drive() as usize;
            self.state.hd = dhs.head();
            let hd = self.state.hd;
            if let Some(drive) = self.selected_drive_mut() {
                drive.select_head(hd);
            }
        }
        self.state.deleted = matches!(command, Command::ReadDeleted | Command::WriteDeleted);

        if matches!(command, Command::Recalibrate | Command::Seek | Command::Specify) {
            self.state.msr &= !FDC_STATUS_FDC_BUSY;
        }

        if command.uses_head() {
            self.state.st0 = self.state.us as u8 | (self.state.hd << 2);
            self.state.st1 = 0;
            self.state.st2 = 0;
        }

        let command_fn: CommandDispatchFn = match command {
            Command::ReadData | Command::ReadDeleted => FloppyController::command_read_data,
            Command::WriteData | Command::WriteDeleted => FloppyController::command_write_data,
            Command::ScanEqual | Command::ScanLowOrEqual | Command::ScanHighOrEqual => {
                FloppyController::command_scan
            }
            Command::ReadTrack => FloppyController::command_read_track,
            Command::ReadId => FloppyController::command_read_id,
            Command::FormatTrack => FloppyController::command_format_track,
            Command::Recalibrate => FloppyController::command_recalibrate,
            Command::Seek => FloppyController::command_seek,
            Command::SenseInt => FloppyController::command_sense_interrupt,
            Command::Specify => FloppyController::command_specify,
            Command::SenseDrive => FloppyController::command_sense_drive,
            Command::Invalid => FloppyController::command_invalid,
        };

        let result = command_fn(self, sched);
        self.apply(result, sched);
    }

    /// Act on a handler's continuation.
    pub(crate) fn apply(&mut self, continuation: Continuation, sched: &mut dyn Scheduler) {
        match continuation {
            Continuation::Continue => {}
            Continuation::Suspend(ticks) => {
                sched.cancel(TimerToken::Operation);
                sched.schedule_in(ticks, TimerToken::Operation, TimerPayload::Drive(self.state.us));
            }
            Continuation::Complete(code) => self.send_results_phase(code, sched),
        }
    }

    /// Fold an execution failure into the status registers.
    pub(crate) fn fail(&mut self, err: FdcError) -> Continuation {
        let (st0, st1, st2) = err.status_bits();
        self.state.st0 |= st0;
        self.state.st1 |= st1;
        self.state.st2 |= st2;
        log::debug!(
            "{} failed on unit {} at {}: {}",
            self.state.command_id(),
            self.state.us,
            self.state.chrn,
            err
        );
        Continuation::Complete(InterruptCode::AbnormalTermination)
    }

    /// Terminate the current command: build the result bytes and enter the result phase, or
    /// return straight to the command phase for commands without results.
    pub(crate) fn send_results_phase(&mut self, code: InterruptCode, sched: &mut dyn Scheduler) {
        let command = self.state.command_id();
        sched.cancel(TimerToken::Operation);
        sched.cancel(TimerToken::Overrun);
        self.stage = Stage::Idle;

        if command.uses_head() {
            self.state.st0 = (self.state.st0 & !ST0_INTERRUPT_CODE_MASK) | code.st0_bits();
            if self.state.st1 & ST1_ERROR_MASK != 0 || self.state.st2 & ST2_ERROR_MASK != 0 {
                self.state.st1 &= !ST1_END_OF_CYLINDER;
            }
            if self.state.st1 & ST1_DATA_ERROR != 0 || self.state.st2 & ST2_DATA_ERROR_IN_DATA != 0 {
                self.state.st2 &= !ST2_CONTROL_MARK;
            }
            let chrn = self.state.chrn.to_bytes();
            self.state.results = vec![
                self.state.st0,
                self.state.st1,
                self.state.st2,
                chrn[0],
                chrn[1],
                chrn[2],
                chrn[3],
            ];
        }
        else if command == Command::Invalid {
            self.state.st0 = ST0_INVALID_OPCODE;
            self.state.results = vec![self.state.st0];
        }
        else if command == Command::SenseDrive {
            self.state.results = vec![self.state.st3];
        }
        else if command != Command::SenseInt {
            self.state.results.clear();
        }
        self.state.result_idx = 0;

        self.state.msr &= !FDC_STATUS_NON_DMA_MODE;
        self.state.msr |= FDC_STATUS_MRQ;
        if !self.state.results.is_empty() {
            self.set_phase(ControllerPhase::ResultPhase);
            self.state.int_req = IntRequest::Result;
            self.state.msr |= FDC_STATUS_DIO;
            self.log_port(
                PortOperation::Interrupt,
                LogPhase::Status,
                self.state.results[0],
                format!("{} complete: {:?}", command, code),
            );
        }
        else {
            self.set_phase(ControllerPhase::CommandPhase);
            self.state.msr &= !(FDC_STATUS_DIO | FDC_STATUS_FDC_BUSY);
        }

        if command.uses_head() {
            let unload_ticks = self.ms_to_ticks(self.state.head_unload_ms);
            if let Some(idx) = self.drive_index(self.state.us) {
                if self.drives[idx].is_head_loaded() {
                    sched.cancel(TimerToken::HeadUnload);
                    sched.schedule_in(unload_ticks, TimerToken::HeadUnload, TimerPayload::Drive(idx));
                }
            }
        }
    }

    /// Dispatch a timer callback previously requested through the scheduler.
    pub fn on_timer(&mut self, token: TimerToken, payload: TimerPayload, sched: &mut dyn Scheduler) {
        match token {
            TimerToken::SeekStep => self.seek_step(false, sched),
            TimerToken::Operation => {
                if self.state.phase != ControllerPhase::ExecutionPhase {
                    log::warn!("on_timer(): operation event outside execution phase");
                    return;
                }
                let result = self.operation_continue(sched);
                self.apply(result, sched);
            }
            TimerToken::Overrun => {
                if self.state.phase == ControllerPhase::ExecutionPhase && matches!(self.stage, Stage::Transfer) {
                    log::warn!("Data register overrun during {}", self.state.command_id());
                    let result = self.fail(FdcError::Overrun);
                    self.apply(result, sched);
                }
            }
            TimerToken::HeadUnload => {
                if let TimerPayload::Drive(idx) = payload {
                    if let Some(drive) = self.drives.get_mut(idx) {
                        drive.load_head(false);
                    }
                }
            }
        }
    }

    /// Perform the Specify command.
    pub(crate) fn command_specify(&mut self, _sched: &mut dyn Scheduler) -> Continuation {
        let srt_hut = StepRateHeadUnload::from_bytes([self.state.param(0)]);
        let hlt_nd = HeadLoadDma::from_bytes([self.state.param(1)]);

        self.state.step_rate_ms = 16 - srt_hut.step_rate() as u64;
        self.state.head_unload_ms = match (srt_hut.head_unload() as u64) << 4 {
            0 => 128,
            t => t,
        };
        self.state.head_load_ms = match (hlt_nd.head_load() as u64) << 1 {
            0 => 256,
            t => t,
        };
        self.state.non_dma = hlt_nd.non_dma();

        log::debug!(
            "command_specify(): step rate: {}ms head unload: {}ms head load: {}ms non-DMA: {}",
            self.state.step_rate_ms,
            self.state.head_unload_ms,
            self.state.head_load_ms,
            self.state.non_dma
        );
        Continuation::Complete(InterruptCode::NormalTermination)
    }

    /// Perform the Sense Drive Status command.
    pub(crate) fn command_sense_drive(&mut self, _sched: &mut dyn Scheduler) -> Continuation {
        let mut st3 = if self.state.hd != 0 { ST3_HEAD } else { 0 };
        // The unit bits echo the request, even when the unit aliases another drive.
        st3 |= self.state.us as u8 & (ST3_UNIT_SELECT_0 | ST3_UNIT_SELECT_1);
        if let Some(idx) = self.drive_index(self.state.us) {
            let drive = &self.drives[idx];
            if drive.is_write_protected() {
                st3 |= ST3_WRITE_PROTECT;
            }
            if drive.is_track0() {
                st3 |= ST3_TRACK0;
            }
            if drive.has_two_heads() {
                st3 |= ST3_TWO_SIDE;
            }
            if drive.is_ready() {
                st3 |= ST3_READY;
            }
        }
        self.state.st3 = st3;
        log::trace!("command_sense_drive(): unit {} ST3: {:02X}", self.state.us, st3);
        Continuation::Complete(InterruptCode::NormalTermination)
    }

    pub(crate) fn command_invalid(&mut self, _sched: &mut dyn Scheduler) -> Continuation {
        log::warn!("Invalid command byte: {:02X}", self.state.command_byte);
        Continuation::Complete(InterruptCode::InvalidCommand)
    }

    fn log_port(&mut self, op: PortOperation, phase: LogPhase, data: u8, comment: String) {
        log::trace!("FDC {} {:?} {:02X} {}", phase, op, data, comment);
        self.cmd_log.push(FdcLogEntry {
            op,
            phase,
            data,
            comment,
        });
    }

    pub(crate) fn log_execution(&mut self, op: PortOperation, data: u8) {
        if self.cmd_log.capacity() > 0 {
            let comment = self.state.command_id().to_string();
            self.cmd_log.push(FdcLogEntry {
                op,
                phase: LogPhase::Execution,
                data,
                comment,
            });
        }
    }

    pub fn log_entries(&self) -> Vec<FdcLogEntry> {
        self.cmd_log.as_vec()
    }

    pub fn clear_log(&mut self) {
        self.cmd_log.clear();
    }

    pub fn get_debug_state(&self) -> FdcDebugState {
        FdcDebugState {
            phase: self.state.phase,
            msr: self.state.msr,
            st0: self.state.st0,
            st1: self.state.st1,
            st2: self.state.st2,
            st3: self.state.st3,
            command: self.state.command_id(),
            us: self.state.us,
            hd: self.state.hd,
            int_req: self.state.int_req,
            chrn: self.state.chrn,
            stage: format!("{:?}", self.stage),
            seek: self.seek,
            cmd_log: self.cmd_log.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Drives whose seek has terminated and not yet been sensed.
    pub fn pending_seek_interrupts(&self) -> usize {
        self.seek
            .iter()
            .filter(|s| s.status >= SeekStatus::NormalTermination)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device_types::disk::DiskDescription, host::FloppyHost};

    fn host() -> FloppyHost {
        FloppyHost::new(FdcConfig::default())
    }

    fn host_with_disk() -> FloppyHost {
        let mut host = host();
        let surface = Surface::encode(&DiskDescription::uniform(1, 40, 9, 2, 1, 0xE5)).unwrap();
        host.insert(0, surface, Some(false));
        host.fdc_mut().turn_on_motor();
        host.emulate_frames(60);
        host
    }

    #[test]
    fn reset_state() {
        let host = host();
        let fdc = host.fdc();
        assert_eq!(fdc.phase(), ControllerPhase::CommandPhase);
        assert_eq!(fdc.handle_status_register_read(), FDC_STATUS_MRQ);
        assert_eq!(fdc.state().step_rate_ms, 16);
        assert_eq!(fdc.state().head_unload_ms, 240);
        assert_eq!(fdc.state().head_load_ms, 254);
        assert!(fdc.state().non_dma);
        assert_eq!(fdc.int_req(), IntRequest::None);
    }

    #[test]
    fn specify_sets_timing() {
        let mut host = host();
        host.write_data(0x03);
        assert_eq!(host.fdc().state().command_id(), Command::Specify);
        assert_eq!(host.read_msr() & FDC_STATUS_FDC_BUSY, FDC_STATUS_FDC_BUSY);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);

        host.write_data(0xaf);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        host.write_data(0x03);

        let state = host.fdc().state();
        assert_eq!(state.step_rate_ms, 6);
        assert_eq!(state.head_unload_ms, 0xf0);
        assert_eq!(state.head_load_ms, 2);
        assert!(state.non_dma);
        assert_eq!(host.read_msr() & FDC_STATUS_FDC_BUSY, 0);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        assert_eq!(host.fdc().int_req(), IntRequest::None);
    }

    #[test]
    fn specify_zero_times_wrap() {
        let mut host = host();
        host.command(&[0x03, 0x00, 0x00]);
        let state = host.fdc().state();
        assert_eq!(state.step_rate_ms, 16);
        assert_eq!(state.head_unload_ms, 128);
        assert_eq!(state.head_load_ms, 256);
        assert!(!state.non_dma);
    }

    #[test]
    fn sense_drive_single_drive_aliases_unit() {
        let mut host = FloppyHost::new(FdcConfig::with_drives(1));
        host.write_data(0x04);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        host.write_data(0x01);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.fdc().int_req(), IntRequest::Result);
        assert_eq!(host.read_msr(), 0xd0);
        assert_eq!(host.read_data(), 0x51);
        assert_eq!(host.read_msr(), FDC_STATUS_MRQ);
        assert_eq!(host.fdc().int_req(), IntRequest::None);
    }

    #[test]
    fn sense_drive_reports_unit_as_sent() {
        let mut host = FloppyHost::new(FdcConfig::with_drives(2));
        host.command(&[0x04, 0x03]);
        assert_eq!(host.read_data() & 0x03, 0x03);
        host.command(&[0x04, 0x02]);
        assert_eq!(host.read_data() & 0x03, 0x02);
    }

    #[test]
    fn sense_drive_dual_drive() {
        let mut host = host();
        host.command(&[0x04, 0x01]);
        assert_eq!(host.read_msr(), 0xd0);
        assert_eq!(host.read_data(), 0x51);
    }

    #[test]
    fn sense_drive_with_disk() {
        let mut host = host_with_disk();
        host.command(&[0x04, 0x04]);
        // Head 1 selected, ready, track 0, not write protected.
        assert_eq!(host.read_data(), 0x34);
    }

    #[test]
    fn invalid_command_reports_0x80() {
        let mut host = host();
        host.write_data(0x1f);
        assert_eq!(host.fdc().state().command_id(), Command::Invalid);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.read_msr(), 0xd0);
        assert_eq!(host.read_data(), 0x80);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        assert_eq!(host.read_msr(), FDC_STATUS_MRQ);
    }

    #[test]
    fn out_of_phase_access_is_harmless() {
        let mut host = host();
        // Nothing to read in the command phase.
        assert_eq!(host.read_data(), 0xFF);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);

        // Writes during the result phase are dropped.
        host.command(&[0x04, 0x00]);
        host.write_data(0x03);
        assert_eq!(host.fdc().phase(), ControllerPhase::ResultPhase);
        assert_eq!(host.fdc().state().command_id(), Command::SenseDrive);
        assert_eq!(host.read_data(), 0x50);
        assert_eq!(host.read_data(), 0xFF);
    }

    #[test]
    fn partial_parameters_never_execute() {
        let mut host = host_with_disk();
        for b in [0x46, 0x00, 0x00, 0x00, 0x01, 0x02, 0x09] {
            host.write_data(b);
            assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        }
        host.advance_ms(1000);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        host.write_data(0x2a);
        assert_eq!(host.fdc().phase(), ControllerPhase::CommandPhase);
        host.write_data(0xff);
        assert_eq!(host.fdc().phase(), ControllerPhase::ExecutionPhase);
    }

    #[test]
    fn log_records_traffic_without_status_reads() {
        let mut host = host();
        host.command(&[0x04, 0x01]);
        host.read_msr();
        host.read_data();
        let log = host.fdc().log_entries();
        let phases: Vec<LogPhase> = log.iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![LogPhase::Command, LogPhase::Parameter, LogPhase::Status, LogPhase::Result]
        );
        assert_eq!(log[0].comment, "Sense Drive Status");
        assert_eq!(log[1].comment, "HD/US");
        assert_eq!(log[3].comment, "ST3");
        assert_eq!(log[3].data, 0x51);
        host.fdc_mut().clear_log();
        assert!(host.fdc().log_entries().is_empty());
    }

    #[test]
    fn log_is_bounded() {
        let config = FdcConfig {
            log_len: 4,
            ..Default::default()
        };
        let mut host = FloppyHost::new(config);
        for _ in 0..10 {
            host.command(&[0x03, 0xaf, 0x03]);
        }
        let log = host.fdc().log_entries();
        assert_eq!(log.len(), 4);
        assert_eq!(log[3].phase, LogPhase::Parameter);
    }

    #[test]
    fn debug_state_snapshot() {
        let mut host = host();
        host.command(&[0x04, 0x01]);
        let dbg = host.fdc().get_debug_state();
        assert_eq!(dbg.phase, ControllerPhase::ResultPhase);
        assert_eq!(dbg.command, Command::SenseDrive);
        assert_eq!(dbg.us, 1);
        assert_eq!(dbg.st3, 0x51);
        assert_eq!(dbg.cmd_log.len(), 3);
    }

    #[test]
    fn motor_follows_selected_drive() {
        let mut host = host();
        host.fdc_mut().turn_on_motor();
        assert!(host.fdc().drive(0).unwrap().is_motor_on());
        assert!(!host.fdc().drive(1).unwrap().is_motor_on());
        host.emulate_frames(10);
        assert_eq!(host.fdc().drive(0).unwrap().motor_speed(), 20);
        assert_eq!(host.fdc().drive(1).unwrap().motor_speed(), 0);
        host.fdc_mut().turn_off_motor();
        host.emulate_frames(6);
        assert_eq!(host.fdc().drive(0).unwrap().motor_speed(), 8);
    }
}
