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

    fdc765_headless::lib.rs

    Headless frontend: load a disk image, report its layout, and read sectors
    through the controller's register interface.

*/

use std::{fmt, path::PathBuf, str::FromStr};

use anyhow::{bail, Context, Result};
use bpaf::Bpaf;

use fdc765_common::util::hex_dump;
use fdc765_core::{
    device_types::chs::n_to_bytes,
    devices::fdc::IntRequest,
    dsk,
    host::FloppyHost,
    machine_config::FdcConfig,
    surface::{Encoding, Surface},
};

/// Frames allowed for a seek, recalibrate or motor spin-up before giving up.
const MAX_WAIT_FRAMES: usize = 250;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectorAddress {
    pub c: u8,
    pub h: u8,
    pub r: u8,
}

impl FromStr for SectorAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(format!("expected c:h:r, got '{}'", s));
        }
        let field = |p: &str| p.trim().parse::<u8>().map_err(|e| format!("'{}': {}", p, e));
        Ok(SectorAddress {
            c: field(parts[0])?,
            h: field(parts[1])?,
            r: field(parts[2])?,
        })
    }
}

impl fmt::Display for SectorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.c, self.h, self.r)
    }
}

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    /// TOML configuration file
    #[bpaf(long, argument("FILE"))]
    pub config: Option<PathBuf>,

    /// DSK or Extended DSK image to insert into drive 0
    #[bpaf(long, argument("FILE"))]
    pub dsk: Option<PathBuf>,

    /// Print disk geometry and sector IDs
    #[bpaf(long, switch)]
    pub info: bool,

    /// Read a sector through the controller
    #[bpaf(long, argument("C:H:R"))]
    pub read: Option<SectorAddress>,
}

pub fn parse_args() -> CmdLineArgs {
    cli_args().run()
}

pub fn run(args: CmdLineArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => {
            let toml_str = std::fs::read_to_string(path)
                .with_context(|| format!("Couldn't read config file {}", path.display()))?;
            FdcConfig::from_toml_str(&toml_str)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        }
        None => FdcConfig::default(),
    };
    log::debug!("Configuration: {:?}", config);

    let surface = match &args.dsk {
        Some(path) => {
            let data = std::fs::read(path).with_context(|| format!("Couldn't read image {}", path.display()))?;
            let surface = dsk::load_dsk(&data).with_context(|| format!("Couldn't load image {}", path.display()))?;
            Some(surface)
        }
        None => None,
    };

    if (args.info || args.read.is_some()) && surface.is_none() {
        bail!("No disk image given (use --dsk)");
    }

    if let Some(surface) = surface {
        if args.info {
            print_info(&surface);
        }
        if surface.sides() > 1 {
            if let Some(drive) = config.drives.first_mut() {
                drive.heads = drive.heads.max(2);
            }
        }

        let mut host = FloppyHost::new(config);
        host.insert(0, surface, None);

        if let Some(addr) = args.read {
            let (data, result) = read_sector(&mut host, addr)?;
            println!("Sector {} ({} bytes):", addr, data.len());
            for line in hex_dump(&data, 16) {
                println!("{}", line);
            }
            let result: Vec<String> = result.iter().map(|b| format!("{:02X}", b)).collect();
            println!("Result: {}", result.join(" "));
        }
    }
    Ok(())
}

pub fn print_info(surface: &Surface) {
    println!(
        "{} tracks, {} sides, {:?} {:?}, {} bytes per track",
        surface.tracks_per_side(),
        surface.sides(),
        surface.density(),
        surface.encoding(),
        surface.bytes_per_track()
    );
    if let Some(creator) = surface.creator() {
        println!("Creator: {}", creator);
    }
    for c in 0..surface.tracks_per_side() {
        for h in 0..surface.sides() {
            let Some(track) = surface.track(c, h)
            else {
                continue;
            };
            if !track.is_formatted() {
                println!("{:02}:{} unformatted", c, h);
                continue;
            }
            let ids: Vec<String> = track
                .sectors()
                .iter()
                .map(|s| format!("{:02X}/{}", s.id.r(), s.id.n()))
                .collect();
            println!("{:02}:{} {:?} {}", c, h, track.encoding(), ids.join(" "));
        }
    }
}

/// Run frames until the controller raises an interrupt.
fn wait_for_interrupt(host: &mut FloppyHost) -> Result<()> {
    for _ in 0..MAX_WAIT_FRAMES {
        if host.fdc().int_req() != IntRequest::None {
            return Ok(());
        }
        host.emulate_frames(1);
    }
    bail!("Timed out waiting for the controller to interrupt")
}

fn seek_and_sense(host: &mut FloppyHost, command: &[u8]) -> Result<u8> {
    host.command(command);
    wait_for_interrupt(host)?;
    let (st0, pcn) = host.sense_interrupt();
    log::debug!("Sense Interrupt after {:02X}: ST0 {:02X} PCN {}", command[0], st0, pcn);
    if st0 & 0xC0 != 0 {
        bail!("Seek failed, ST0: {:02X}", st0);
    }
    Ok(pcn)
}

/// Recalibrate, seek to the sector's cylinder, identify the sector size and read the sector
/// from drive 0. Returns the sector data and the seven result bytes.
pub fn read_sector(host: &mut FloppyHost, addr: SectorAddress) -> Result<(Vec<u8>, Vec<u8>)> {
    let hd = (addr.h & 1) << 2;
    host.fdc_mut().motor_on(0);
    host.emulate_frames(MAX_WAIT_FRAMES.min(60));

    seek_and_sense(host, &[0x07, 0x00])?;
    let pcn = seek_and_sense(host, &[0x0F, hd, addr.c])?;
    if pcn != addr.c {
        bail!("Seek ended on cylinder {}, wanted {}", pcn, addr.c);
    }

    let mf = match host
        .fdc()
        .drive(0)
        .and_then(|d| d.surface())
        .and_then(|s| s.track(addr.c, addr.h))
        .map(|t| t.encoding())
    {
        Some(Encoding::Fm) => 0x00,
        _ => 0x40,
    };

    // Read ID supplies the size code.
    host.command(&[0x0A | mf, hd]);
    if !host.wait_for_result(1000) {
        bail!("Read ID did not complete");
    }
    let id = host.read_result();
    if id.len() != 7 || id[0] & 0xC0 != 0 {
        bail!("Read ID failed: {:02X?}", id);
    }
    let n = id[6];

    host.command(&[0x06 | mf, hd, addr.c, addr.h, addr.r, n, addr.r, 0x2A, 0xFF]);
    let data = host.read_bytes(n_to_bytes(n), 1000);
    host.terminal_count();
    if !host.wait_for_result(1000) {
        bail!("Read Data did not complete");
    }
    let result = host.read_result();
    Ok((data, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdc765_core::device_types::disk::DiskDescription;

    #[test]
    fn parse_sector_address() {
        assert_eq!(
            "3:1:9".parse::<SectorAddress>(),
            Ok(SectorAddress { c: 3, h: 1, r: 9 })
        );
        assert!("3:1".parse::<SectorAddress>().is_err());
        assert!("3:x:1".parse::<SectorAddress>().is_err());
    }

    #[test]
    fn read_sector_through_controller() {
        let mut desc = DiskDescription::uniform(1, 40, 9, 2, 1, 0xE5);
        desc.tracks[12].sectors[3].data = vec![0x3C; 512];
        let mut host = FloppyHost::new(FdcConfig::default());
        host.insert(0, Surface::encode(&desc).unwrap(), None);

        let (data, result) = read_sector(&mut host, SectorAddress { c: 12, h: 0, r: 4 }).unwrap();
        assert_eq!(data, vec![0x3C; 512]);
        assert_eq!(result, vec![0x00, 0x00, 0x00, 13, 0, 1, 2]);
    }
}
