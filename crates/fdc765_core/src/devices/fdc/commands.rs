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

    devices::fdc::commands.rs

    Command table, register bit definitions and parameter byte layouts for
    the NEC µPD765.
*/

use modular_bitfield::{bitfield, prelude::*};
use strum_macros::Display;
use thiserror::Error;

// Main Status Register Bit Definitions
// --------------------------------------------------------------------------------
// The first four bits encode which drives are in 'positioning' mode, ie whether
// they are moving their heads or being calibrated.
pub const FDC_STATUS_FDD_A_BUSY: u8 = 0b0000_0001;
pub const FDC_STATUS_FDD_B_BUSY: u8 = 0b0000_0010;
pub const FDC_STATUS_FDD_C_BUSY: u8 = 0b0000_0100;
pub const FDC_STATUS_FDD_D_BUSY: u8 = 0b0000_1000;
pub const FDC_STATUS_FDD_BUSY_MASK: u8 = 0b0000_1111;

// Set from the moment a command byte is accepted until the last result byte is read.
// Seek, Recalibrate and Specify drop it as soon as their parameters are in.
pub const FDC_STATUS_FDC_BUSY: u8 = 0b0001_0000;
pub const FDC_STATUS_NON_DMA_MODE: u8 = 0b0010_0000;
// DIO => 0=FDC Receiving 1=FDC Sending
pub const FDC_STATUS_DIO: u8 = 0b0100_0000;
// MRQ => Ready to receive or send data or commands via the data register
pub const FDC_STATUS_MRQ: u8 = 0b1000_0000;

pub const ST0_HEAD_ACTIVE: u8 = 0b0000_0100;
pub const ST0_NOT_READY: u8 = 0b0000_1000;
pub const ST0_UNIT_CHECK: u8 = 0b0001_0000;
pub const ST0_SEEK_END: u8 = 0b0010_0000;
pub const ST0_ABNORMAL_TERMINATION: u8 = 0b0100_0000;
pub const ST0_INVALID_OPCODE: u8 = 0b1000_0000;
pub const ST0_ABNORMAL_POLLING: u8 = 0b1100_0000;
pub const ST0_INTERRUPT_CODE_MASK: u8 = 0b1100_0000;

pub const ST1_MISSING_ADDRESS_MARK: u8 = 0b0000_0001;
pub const ST1_NOT_WRITABLE: u8 = 0b0000_0010;
pub const ST1_NO_DATA: u8 = 0b0000_0100;
pub const ST1_OVERRUN: u8 = 0b0001_0000;
pub const ST1_DATA_ERROR: u8 = 0b0010_0000;
pub const ST1_END_OF_CYLINDER: u8 = 0b1000_0000;
pub const ST1_ERROR_MASK: u8 = ST1_MISSING_ADDRESS_MARK | ST1_NOT_WRITABLE | ST1_NO_DATA | ST1_OVERRUN | ST1_DATA_ERROR;

pub const ST2_MISSING_DATA_MARK: u8 = 0b0000_0001;
pub const ST2_BAD_CYLINDER: u8 = 0b0000_0010;
pub const ST2_SCAN_NOT_SATISFIED: u8 = 0b0000_0100;
pub const ST2_SCAN_EQUAL_HIT: u8 = 0b0000_1000;
pub const ST2_WRONG_CYLINDER: u8 = 0b0001_0000;
pub const ST2_DATA_ERROR_IN_DATA: u8 = 0b0010_0000;
pub const ST2_CONTROL_MARK: u8 = 0b0100_0000;
pub const ST2_ERROR_MASK: u8 = ST2_MISSING_DATA_MARK | ST2_BAD_CYLINDER | ST2_WRONG_CYLINDER | ST2_DATA_ERROR_IN_DATA;

pub const ST3_UNIT_SELECT_0: u8 = 0b0000_0001;
pub const ST3_UNIT_SELECT_1: u8 = 0b0000_0010;
pub const ST3_HEAD: u8 = 0b0000_0100;
pub const ST3_TWO_SIDE: u8 = 0b0000_1000;
pub const ST3_TRACK0: u8 = 0b0001_0000;
pub const ST3_READY: u8 = 0b0010_0000;
pub const ST3_WRITE_PROTECT: u8 = 0b0100_0000;
pub const ST3_FAULT: u8 = 0b1000_0000;

pub const COMMAND_MT_BIT: u8 = 0b1000_0000;
pub const COMMAND_MFM_BIT: u8 = 0b0100_0000;
pub const COMMAND_SKIP_BIT: u8 = 0b0010_0000;

/// Represent the commands the controller knows how to handle.
#[derive(Copy, Clone, Debug, Default, Display, PartialEq, Eq)]
pub enum Command {
    #[strum(serialize = "Read Data")]
    ReadData,
    #[strum(serialize = "Read Deleted Data")]
    ReadDeleted,
    Recalibrate,
    Seek,
    #[strum(serialize = "Write Data")]
    WriteData,
    #[strum(serialize = "Write Deleted Data")]
    WriteDeleted,
    #[strum(serialize = "Scan Equal")]
    ScanEqual,
    #[strum(serialize = "Scan Low or Equal")]
    ScanLowOrEqual,
    #[strum(serialize = "Scan High or Equal")]
    ScanHighOrEqual,
    #[strum(serialize = "Read ID")]
    ReadId,
    #[strum(serialize = "Sense Interrupt Status")]
    SenseInt,
    Specify,
    #[strum(serialize = "Sense Drive Status")]
    SenseDrive,
    #[strum(serialize = "Format Track")]
    FormatTrack,
    #[strum(serialize = "Read Track")]
    ReadTrack,
    #[default]
    Invalid,
}

impl Command {
    /// Commands whose first parameter byte selects a unit and head.
    pub fn selects_drive(&self) -> bool {
        !matches!(self, Command::SenseInt | Command::Specify | Command::Invalid)
    }

    /// Commands that load the head and leave it to unload after the head-unload time.
    pub fn uses_head(&self) -> bool {
        matches!(
            self,
            Command::ReadData
                | Command::ReadDeleted
                | Command::WriteData
                | Command::WriteDeleted
                | Command::ScanEqual
                | Command::ScanLowOrEqual
                | Command::ScanHighOrEqual
                | Command::ReadId
                | Command::FormatTrack
                | Command::ReadTrack
        )
    }

    pub fn is_scan(&self) -> bool {
        matches!(
            self,
            Command::ScanEqual | Command::ScanLowOrEqual | Command::ScanHighOrEqual
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Command::WriteData | Command::WriteDeleted | Command::FormatTrack)
    }

    /// Commands that move data from the controller to the host during execution.
    pub fn is_read(&self) -> bool {
        matches!(self, Command::ReadData | Command::ReadDeleted | Command::ReadTrack)
    }

    /// Commands that accept a Terminal Count during execution.
    pub fn accepts_terminal_count(&self) -> bool {
        self.is_read() || self.is_scan() || matches!(self, Command::WriteData | Command::WriteDeleted)
    }
}

const RW_PARAMS: &[&str] = &["HD/US", "C", "H", "R", "N", "EOT", "GPL", "DTL"];
const SCAN_PARAMS: &[&str] = &["HD/US", "C", "H", "R", "N", "EOT", "GPL", "STP"];
const RW_RESULTS: &[&str] = &["ST0", "ST1", "ST2", "C", "H", "R", "N"];

/// A command table entry. A command byte matches when `byte & mask == value`.
#[derive(Debug)]
pub struct CommandDescriptor {
    pub command: Command,
    pub mask: u8,
    pub value: u8,
    pub param_labels: &'static [&'static str],
    pub result_labels: &'static [&'static str],
}

impl CommandDescriptor {
    #[inline]
    pub fn param_len(&self) -> usize {
        self.param_labels.len()
    }

    #[inline]
    pub fn result_len(&self) -> usize {
        self.result_labels.len()
    }

    #[inline]
    pub fn matches(&self, byte: u8) -> bool {
        byte & self.mask == self.value
    }

    /// Find the descriptor for a command byte. The first matching entry wins; a byte that
    /// matches nothing is an Invalid command.
    pub fn lookup(byte: u8) -> &'static CommandDescriptor {
        COMMAND_TABLE
            .iter()
            .find(|d| d.matches(byte))
            .unwrap_or(&INVALID_COMMAND)
    }

    pub fn invalid() -> &'static CommandDescriptor {
        &INVALID_COMMAND
    }
}

pub static INVALID_COMMAND: CommandDescriptor = CommandDescriptor {
    command: Command::Invalid,
    mask: 0x00,
    value: 0x00,
    param_labels: &[],
    result_labels: &["ST0"],
};

// Entry order matters: the deleted-data and scan opcodes overlap the masks of the entries
// above them.
pub static COMMAND_TABLE: [CommandDescriptor; 15] = [
    CommandDescriptor {
        command: Command::ReadData,
        mask: 0x1f,
        value: 0x06,
        param_labels: RW_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::ReadDeleted,
        mask: 0x1f,
        value: 0x0c,
        param_labels: RW_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::Recalibrate,
        mask: 0xff,
        value: 0x07,
        param_labels: &["US"],
        result_labels: &[],
    },
    CommandDescriptor {
        command: Command::Seek,
        mask: 0xff,
        value: 0x0f,
        param_labels: &["HD/US", "NCN"],
        result_labels: &[],
    },
    CommandDescriptor {
        command: Command::WriteData,
        mask: 0x3f,
        value: 0x05,
        param_labels: RW_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::WriteDeleted,
        mask: 0x3f,
        value: 0x09,
        param_labels: RW_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::ScanEqual,
        mask: 0x1f,
        value: 0x11,
        param_labels: SCAN_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::ScanLowOrEqual,
        mask: 0x1f,
        value: 0x19,
        param_labels: SCAN_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::ScanHighOrEqual,
        mask: 0x1f,
        value: 0x1d,
        param_labels: SCAN_PARAMS,
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::ReadId,
        mask: 0xbf,
        value: 0x0a,
        param_labels: &["HD/US"],
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::SenseInt,
        mask: 0xff,
        value: 0x08,
        param_labels: &[],
        result_labels: &["ST0", "PCN"],
    },
    CommandDescriptor {
        command: Command::Specify,
        mask: 0xff,
        value: 0x03,
        param_labels: &["SRT/HUT", "HLT/ND"],
        result_labels: &[],
    },
    CommandDescriptor {
        command: Command::SenseDrive,
        mask: 0xff,
        value: 0x04,
        param_labels: &["HD/US"],
        result_labels: &["ST3"],
    },
    CommandDescriptor {
        command: Command::FormatTrack,
        mask: 0xbf,
        value: 0x0d,
        param_labels: &["HD/US", "N", "SC", "GPL", "D"],
        result_labels: RW_RESULTS,
    },
    CommandDescriptor {
        command: Command::ReadTrack,
        mask: 0x9f,
        value: 0x02,
        param_labels: RW_PARAMS,
        result_labels: RW_RESULTS,
    },
];

#[bitfield]
#[derive(Copy, Clone)]
pub struct CommandByte {
    pub command: B5,
    pub skip: bool,
    pub mfm: bool,
    pub mt: bool,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct DriveHeadSelect {
    pub drive: B2,
    pub head:  B1,
    #[skip]
    unused:    B5,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct StepRateHeadUnload {
    pub head_unload: B4,
    pub step_rate:   B4,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct HeadLoadDma {
    pub non_dma:   bool,
    pub head_load: B7,
}

/// Represents the possible values of the Interrupt Code field in Status Register 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterruptCode {
    NormalTermination,
    AbnormalTermination,
    InvalidCommand,
    AbnormalPolling,
}

impl InterruptCode {
    pub fn st0_bits(&self) -> u8 {
        match self {
            InterruptCode::NormalTermination => 0,
            InterruptCode::AbnormalTermination => ST0_ABNORMAL_TERMINATION,
            InterruptCode::InvalidCommand => ST0_INVALID_OPCODE,
            InterruptCode::AbnormalPolling => ST0_ABNORMAL_POLLING,
        }
    }
}

/// Execution-time failures. These never reach the host as errors; each one is folded
/// into the status registers and ends the command with an abnormal termination.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum FdcError {
    #[error("drive not ready")]
    NotReady,
    #[error("sector not found")]
    SectorNotFound { wrong_cylinder: bool, bad_cylinder: bool },
    #[error("no ID address mark on track")]
    AddressMarkMissing,
    #[error("no data address mark after ID field")]
    DataMarkMissing,
    #[error("CRC error in ID field")]
    IdCrcMismatch,
    #[error("CRC error in data field")]
    DataCrcMismatch,
    #[error("disk is write protected")]
    WriteProtected,
    #[error("data register overrun")]
    Overrun,
    #[error("end of cylinder")]
    EndOfCylinder,
}

impl FdcError {
    /// Status bits for ST0, ST1 and ST2.
    pub fn status_bits(&self) -> (u8, u8, u8) {
        match self {
            FdcError::NotReady => (ST0_NOT_READY, 0, 0),
            FdcError::SectorNotFound {
                wrong_cylinder,
                bad_cylinder,
            } => {
                let mut st2 = 0;
                if *wrong_cylinder {
                    st2 |= ST2_WRONG_CYLINDER;
                }
                if *bad_cylinder {
                    st2 |= ST2_BAD_CYLINDER;
                }
                (0, ST1_NO_DATA, st2)
            }
            FdcError::AddressMarkMissing => (0, ST1_MISSING_ADDRESS_MARK | ST1_NO_DATA, 0),
            FdcError::DataMarkMissing => (0, ST1_MISSING_ADDRESS_MARK, ST2_MISSING_DATA_MARK),
            FdcError::IdCrcMismatch => (0, ST1_DATA_ERROR, 0),
            FdcError::DataCrcMismatch => (0, ST1_DATA_ERROR, ST2_DATA_ERROR_IN_DATA),
            FdcError::WriteProtected => (0, ST1_NOT_WRITABLE, 0),
            FdcError::Overrun => (0, ST1_OVERRUN, 0),
            FdcError::EndOfCylinder => (0, ST1_END_OF_CYLINDER, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_first_match_wins() {
        let expect = [
            (0x46, Command::ReadData),
            (0xe6, Command::ReadData),
            (0x4c, Command::ReadDeleted),
            (0x07, Command::Recalibrate),
            (0x0f, Command::Seek),
            (0x45, Command::WriteData),
            (0xc9, Command::WriteDeleted),
            (0x51, Command::ScanEqual),
            (0x59, Command::ScanLowOrEqual),
            (0x5d, Command::ScanHighOrEqual),
            (0x4a, Command::ReadId),
            (0x08, Command::SenseInt),
            (0x03, Command::Specify),
            (0x04, Command::SenseDrive),
            (0x4d, Command::FormatTrack),
            (0x42, Command::ReadTrack),
        ];
        for (byte, command) in expect {
            assert_eq!(CommandDescriptor::lookup(byte).command, command, "byte {:02X}", byte);
        }
    }

    #[test]
    fn unmatched_bytes_are_invalid() {
        // Write commands have no skip bit, and Read Track has no MT bit.
        for byte in [0x00, 0x01, 0x25, 0x29, 0x82, 0x87, 0x1f, 0xff] {
            let desc = CommandDescriptor::lookup(byte);
            assert_eq!(desc.command, Command::Invalid, "byte {:02X}", byte);
            assert_eq!(desc.param_len(), 0);
            assert_eq!(desc.result_len(), 1);
        }
    }

    #[test]
    fn descriptor_lengths() {
        let read = CommandDescriptor::lookup(0x06);
        assert_eq!((read.param_len(), read.result_len()), (8, 7));
        let format = CommandDescriptor::lookup(0x4d);
        assert_eq!((format.param_len(), format.result_len()), (5, 7));
        let sense = CommandDescriptor::lookup(0x08);
        assert_eq!((sense.param_len(), sense.result_len()), (0, 2));
        let seek = CommandDescriptor::lookup(0x0f);
        assert_eq!((seek.param_len(), seek.result_len()), (2, 0));
    }

    #[test]
    fn parameter_bitfields() {
        let cmd = CommandByte::from_bytes([0xe6]);
        assert!(cmd.mt());
        assert!(cmd.mfm());
        assert!(cmd.skip());
        assert_eq!(cmd.command(), 0x06);

        let dhs = DriveHeadSelect::from_bytes([0x05]);
        assert_eq!(dhs.drive(), 1);
        assert_eq!(dhs.head(), 1);

        let srt = StepRateHeadUnload::from_bytes([0xaf]);
        assert_eq!(srt.step_rate(), 0x0a);
        assert_eq!(srt.head_unload(), 0x0f);

        let hld = HeadLoadDma::from_bytes([0x03]);
        assert!(hld.non_dma());
        assert_eq!(hld.head_load(), 0x01);
    }

    #[test]
    fn error_status_bits() {
        assert_eq!(FdcError::AddressMarkMissing.status_bits(), (0, 0x05, 0));
        assert_eq!(FdcError::DataMarkMissing.status_bits(), (0, 0x01, 0x01));
        assert_eq!(FdcError::DataCrcMismatch.status_bits(), (0, 0x20, 0x20));
        assert_eq!(
            FdcError::SectorNotFound {
                wrong_cylinder: true,
                bad_cylinder: true
            }
            .status_bits(),
            (0, 0x04, 0x12)
        );
        assert_eq!(InterruptCode::AbnormalPolling.st0_bits(), 0xc0);
    }
}
