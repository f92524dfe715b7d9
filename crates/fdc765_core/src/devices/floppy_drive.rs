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

    devices::floppy_drive.rs

    Implements a floppy drive: head positioning, motor ramp, head load state,
    write protection and a traversal cursor over the inserted disk surface.
*/

use crate::{
    machine_config::FloppyDriveConfig,
    surface::{Surface, TrackSurface},
};
use std::collections::BTreeSet;

/// Percentage points the motor speed changes per emulated frame.
pub const MOTOR_RAMP_STEP: u8 = 2;
pub const MOTOR_FULL_SPEED: u8 = 100;
/// Frames the save light stays lit after the last write.
pub const SAVE_LIGHT_FRAMES: u32 = 25;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum MotorRamp {
    #[default]
    Idle,
    Accelerating,
    Decelerating,
}

/// Head step direction. Stepping inward moves toward higher cylinders.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepDirection {
    Inward,
    Outward,
}

/// A sector modified by a write or format since the last frame report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangedSector {
    pub cylinder: u8,
    pub head: u8,
    /// Index of the sector in the track's physical order.
    pub sector: usize,
}

#[derive(Clone, Debug, Default)]
pub struct DriveFrameReport {
    pub changed_sectors: Vec<ChangedSector>,
    pub save_light: bool,
    pub motor_speed: u8,
}

pub struct FloppyDiskDrive {
    drive_n: usize,
    max_cylinders: u8,
    heads: u8,
    write_protect_default: bool,

    pub(crate) cylinder: u8,
    pub(crate) head: u8,
    pub(crate) track0: bool,
    pub(crate) write_protected: bool,
    pub(crate) motor_on: bool,
    pub(crate) motor_speed: u8,
    pub(crate) motor_ramp: MotorRamp,
    pub(crate) head_loaded: bool,

    surface: Option<Surface>,
    cursor: usize,

    changed_sectors: BTreeSet<ChangedSector>,
    save_light_frames: u32,
}

impl Default for FloppyDiskDrive {
    fn default() -> Self {
        Self {
            drive_n: 0,
            max_cylinders: 80,
            heads: 1,
            write_protect_default: false,
            cylinder: 0,
            head: 0,
            track0: true,
            // An empty drive reports write protect.
            write_protected: true,
            motor_on: false,
            motor_speed: 0,
            motor_ramp: MotorRamp::Idle,
            head_loaded: false,
            surface: None,
            cursor: 0,
            changed_sectors: BTreeSet::new(),
            save_light_frames: 0,
        }
    }
}

impl FloppyDiskDrive {
    pub fn new(drive_n: usize, config: &FloppyDriveConfig) -> Self {
        FloppyDiskDrive {
            drive_n,
            max_cylinders: config.cylinders.max(1),
            heads: config.heads.clamp(1, 2),
            write_protect_default: config.write_protect_default,
            ..Default::default()
        }
    }

    /// Reset the drive along with the controller. The inserted disk, head position and motor
    /// state survive; only the head load state is dropped.
    pub fn reset(&mut self) {
        self.head_loaded = false;
        self.head = 0;
    }

    pub fn drive_n(&self) -> usize {
        self.drive_n
    }

    /// Insert a disk. `write_protect` overrides the drive's configured default.
    pub fn insert(&mut self, surface: Surface, write_protect: Option<bool>) {
        log::debug!(
            "Drive {}: inserted disk, {} tracks x {} sides, {} ({} bytes per track)",
            self.drive_n,
            surface.tracks_per_side(),
            surface.sides(),
            surface.density(),
            surface.bytes_per_track()
        );
        self.write_protected = write_protect.unwrap_or(self.write_protect_default);
        self.cursor = 0;
        self.changed_sectors.clear();
        self.surface = Some(surface);
    }

    /// Eject the disk, returning its surface.
    pub fn eject(&mut self) -> Option<Surface> {
        self.write_protected = true;
        self.head_loaded = false;
        self.cursor = 0;
        self.changed_sectors.clear();
        self.save_light_frames = 0;
        self.surface.take()
    }

    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub fn surface_mut(&mut self) -> Option<&mut Surface> {
        self.surface.as_mut()
    }

    pub fn has_disk(&self) -> bool {
        self.surface.is_some()
    }

    /// The ready line follows disk presence.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.surface.is_some()
    }

    #[inline]
    pub fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    pub fn set_write_protect(&mut self, state: bool) {
        if self.surface.is_some() {
            self.write_protected = state;
        }
    }

    #[inline]
    pub fn has_two_heads(&self) -> bool {
        self.heads > 1
    }

    #[inline]
    pub fn is_track0(&self) -> bool {
        self.track0
    }

    #[inline]
    pub fn cylinder(&self) -> u8 {
        self.cylinder
    }

    #[inline]
    pub fn head(&self) -> u8 {
        self.head
    }

    pub fn max_cylinders(&self) -> u8 {
        self.max_cylinders
    }

    /// Step the head one cylinder, clamped to the mechanical range of the drive.
    pub fn step(&mut self, direction: StepDirection) {
        self.cylinder = match direction {
            StepDirection::Inward => self.cylinder.saturating_add(1).min(self.max_cylinders - 1),
            StepDirection::Outward => self.cylinder.saturating_sub(1),
        };
        self.track0 = self.cylinder == 0;
        log::trace!("Drive {}: step {:?} to cylinder {}", self.drive_n, direction, self.cylinder);
    }

    /// Select the active head. A single-headed drive only ever reads side 0.
    pub fn select_head(&mut self, head: u8) {
        self.head = head & 0x01;
    }

    fn physical_head(&self) -> u8 {
        if self.has_two_heads() {
            self.head
        }
        else {
            0
        }
    }

    pub fn load_head(&mut self, loaded: bool) {
        if self.head_loaded != loaded {
            log::trace!("Drive {}: head {}", self.drive_n, if loaded { "loaded" } else { "unloaded" });
        }
        self.head_loaded = loaded;
    }

    #[inline]
    pub fn is_head_loaded(&self) -> bool {
        self.head_loaded
    }

    pub fn turn_on_motor(&mut self) {
        if !self.motor_on {
            log::trace!("Drive {}: motor on", self.drive_n);
            self.motor_on = true;
            self.motor_ramp = if self.motor_speed < MOTOR_FULL_SPEED {
                MotorRamp::Accelerating
            }
            else {
                MotorRamp::Idle
            };
        }
    }

    pub fn turn_off_motor(&mut self) {
        if self.motor_on {
            log::trace!("Drive {}: motor off", self.drive_n);
            self.motor_on = false;
            self.motor_ramp = if self.motor_speed > 0 {
                MotorRamp::Decelerating
            }
            else {
                MotorRamp::Idle
            };
        }
    }

    #[inline]
    pub fn is_motor_on(&self) -> bool {
        self.motor_on
    }

    #[inline]
    pub fn motor_speed(&self) -> u8 {
        self.motor_speed
    }

    pub fn motor_ramp(&self) -> MotorRamp {
        self.motor_ramp
    }

    pub fn save_light(&self) -> bool {
        self.save_light_frames > 0
    }

    /// Per-frame housekeeping: advance the motor ramp, age the save light and hand over the
    /// set of sectors changed since the previous frame.
    pub fn on_frame_completed(&mut self) -> DriveFrameReport {
        match self.motor_ramp {
            MotorRamp::Accelerating => {
                self.motor_speed = self.motor_speed.saturating_add(MOTOR_RAMP_STEP).min(MOTOR_FULL_SPEED);
                if self.motor_speed == MOTOR_FULL_SPEED {
                    self.motor_ramp = MotorRamp::Idle;
                }
            }
            MotorRamp::Decelerating => {
                self.motor_speed = self.motor_speed.saturating_sub(MOTOR_RAMP_STEP);
                if self.motor_speed == 0 {
                    self.motor_ramp = MotorRamp::Idle;
                }
            }
            MotorRamp::Idle => {}
        }

        let save_light = self.save_light();
        self.save_light_frames = self.save_light_frames.saturating_sub(1);

        DriveFrameReport {
            changed_sectors: std::mem::take(&mut self.changed_sectors).into_iter().collect(),
            save_light,
            motor_speed: self.motor_speed,
        }
    }

    /// The track under the head, if the disk has one there.
    pub fn track(&self) -> Option<&TrackSurface> {
        let head = self.physical_head();
        self.surface.as_ref().and_then(|s| s.track(self.cylinder, head))
    }

    pub fn track_mut(&mut self) -> Option<&mut TrackSurface> {
        let (cylinder, head) = (self.cylinder, self.physical_head());
        self.surface.as_mut().and_then(|s| s.track_mut(cylinder, head))
    }

    pub fn bytes_per_track(&self) -> Option<usize> {
        self.surface.as_ref().map(|s| s.bytes_per_track())
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, pos: usize) {
        self.cursor = match self.bytes_per_track() {
            Some(bpt) if bpt > 0 => pos % bpt,
            _ => 0,
        };
    }

    /// Advance the cursor by `bytes`, returning how many times the index hole passed.
    pub fn advance(&mut self, bytes: usize) -> usize {
        let bpt = match self.bytes_per_track() {
            Some(bpt) if bpt > 0 => bpt,
            _ => return 0,
        };
        let total = self.cursor + bytes;
        self.cursor = total % bpt;
        total / bpt
    }

    /// Record a modified sector on the current track and light the save light.
    pub fn mark_sector_changed(&mut self, sector: usize) {
        let changed = ChangedSector {
            cylinder: self.cylinder,
            head: self.physical_head(),
            sector,
        };
        if let Some(surface) = self.surface.as_mut() {
            surface.set_dirty(true);
        }
        self.changed_sectors.insert(changed);
        self.save_light_frames = SAVE_LIGHT_FRAMES;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_types::disk::DiskDescription;

    fn drive_with_disk() -> FloppyDiskDrive {
        let mut drive = FloppyDiskDrive::new(0, &FloppyDriveConfig::default());
        let surface = Surface::encode(&DiskDescription::uniform(1, 40, 9, 2, 1, 0xE5)).unwrap();
        drive.insert(surface, Some(false));
        drive
    }

    #[test]
    fn empty_drive_defaults() {
        let drive = FloppyDiskDrive::new(1, &FloppyDriveConfig::default());
        assert!(!drive.is_ready());
        assert!(drive.is_write_protected());
        assert!(drive.is_track0());
        assert_eq!(drive.motor_speed(), 0);
        assert_eq!(drive.motor_ramp(), MotorRamp::Idle);
        assert!(drive.track().is_none());
    }

    #[test]
    fn step_is_clamped() {
        let mut drive = FloppyDiskDrive::new(0, &FloppyDriveConfig::default());
        drive.step(StepDirection::Outward);
        assert_eq!(drive.cylinder(), 0);
        assert!(drive.is_track0());
        for _ in 0..100 {
            drive.step(StepDirection::Inward);
        }
        assert_eq!(drive.cylinder(), 79);
        assert!(!drive.is_track0());
    }

    #[test]
    fn motor_ramps_two_points_per_frame() {
        let mut drive = FloppyDiskDrive::new(0, &FloppyDriveConfig::default());
        drive.turn_on_motor();
        assert_eq!(drive.motor_ramp(), MotorRamp::Accelerating);
        for _ in 0..10 {
            drive.on_frame_completed();
        }
        assert_eq!(drive.motor_speed(), 20);
        drive.turn_off_motor();
        assert_eq!(drive.motor_ramp(), MotorRamp::Decelerating);
        for _ in 0..6 {
            drive.on_frame_completed();
        }
        assert_eq!(drive.motor_speed(), 8);
        drive.turn_on_motor();
        for _ in 0..100 {
            drive.on_frame_completed();
        }
        assert_eq!(drive.motor_speed(), 100);
        assert_eq!(drive.motor_ramp(), MotorRamp::Idle);
    }

    #[test]
    fn cursor_wraps_at_index() {
        let mut drive = drive_with_disk();
        drive.set_cursor(6249);
        assert_eq!(drive.advance(1), 1);
        assert_eq!(drive.cursor(), 0);
        assert_eq!(drive.advance(6250 * 2 + 5), 2);
        assert_eq!(drive.cursor(), 5);
    }

    #[test]
    fn changed_sectors_reported_once() {
        let mut drive = drive_with_disk();
        drive.mark_sector_changed(3);
        drive.mark_sector_changed(3);
        assert!(drive.save_light());
        assert!(drive.surface().unwrap().is_dirty());
        let report = drive.on_frame_completed();
        assert_eq!(
            report.changed_sectors,
            vec![ChangedSector {
                cylinder: 0,
                head: 0,
                sector: 3
            }]
        );
        assert!(report.save_light);
        assert!(drive.on_frame_completed().changed_sectors.is_empty());
        for _ in 0..SAVE_LIGHT_FRAMES {
            drive.on_frame_completed();
        }
        assert!(!drive.save_light());
    }

    #[test]
    fn eject_restores_write_protect() {
        let mut drive = drive_with_disk();
        assert!(!drive.is_write_protected());
        assert!(drive.eject().is_some());
        assert!(drive.is_write_protected());
        assert!(!drive.is_ready());
    }
}
