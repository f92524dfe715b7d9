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

    machine_config.rs

    Configuration of the floppy subsystem: drive population and geometry,
    virtual clock scale and optional search-window jitter.
*/

use serde_derive::Deserialize;
use thiserror::Error;

pub const DEFAULT_TICKS_PER_MS: u64 = 1000;
pub const DEFAULT_REVOLUTION_MS: u64 = 200;
pub const DEFAULT_OVERRUN_TIMEOUT_MS: u64 = 200;
pub const DEFAULT_LOG_LEN: usize = 1024;
pub const MAX_DRIVES: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn _default_cylinders() -> u8 {
    80
}
fn _default_heads() -> u8 {
    1
}
fn _default_drives() -> Vec<FloppyDriveConfig> {
    vec![FloppyDriveConfig::default(), FloppyDriveConfig::default()]
}
fn _default_ticks_per_ms() -> u64 {
    DEFAULT_TICKS_PER_MS
}
fn _default_revolution_ms() -> u64 {
    DEFAULT_REVOLUTION_MS
}
fn _default_overrun_timeout_ms() -> u64 {
    DEFAULT_OVERRUN_TIMEOUT_MS
}
fn _default_log_len() -> usize {
    DEFAULT_LOG_LEN
}

#[derive(Clone, Debug, Deserialize)]
pub struct FloppyDriveConfig {
    #[serde(default = "_default_cylinders")]
    pub cylinders: u8,
    #[serde(default = "_default_heads")]
    pub heads: u8,
    #[serde(default)]
    pub write_protect_default: bool,
}

impl Default for FloppyDriveConfig {
    fn default() -> Self {
        Self {
            cylinders: _default_cylinders(),
            heads: _default_heads(),
            write_protect_default: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct FdcConfig {
    #[serde(default = "_default_drives")]
    pub drives: Vec<FloppyDriveConfig>,
    /// Virtual clock ticks per millisecond.
    #[serde(default = "_default_ticks_per_ms")]
    pub ticks_per_ms: u64,
    /// Time for one disk revolution.
    #[serde(default = "_default_revolution_ms")]
    pub revolution_ms: u64,
    /// How long a transfer byte may go unserviced before the controller reports an overrun.
    #[serde(default = "_default_overrun_timeout_ms")]
    pub overrun_timeout_ms: u64,
    /// Seed for search-window jitter. Jitter is disabled when absent.
    #[serde(default)]
    pub wobble_seed: Option<u64>,
    #[serde(default = "_default_log_len")]
    pub log_len: usize,
}

impl Default for FdcConfig {
    fn default() -> Self {
        Self {
            drives: _default_drives(),
            ticks_per_ms: _default_ticks_per_ms(),
            revolution_ms: _default_revolution_ms(),
            overrun_timeout_ms: _default_overrun_timeout_ms(),
            wobble_seed: None,
            log_len: _default_log_len(),
        }
    }
}

impl FdcConfig {
    /// A configuration with `n` default drives.
    pub fn with_drives(n: usize) -> Self {
        Self {
            drives: vec![FloppyDriveConfig::default(); n],
            ..Default::default()
        }
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: FdcConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.drives.is_empty() || self.drives.len() > MAX_DRIVES {
            return Err(ConfigError::Invalid(format!(
                "{} drives configured, expected 1 to {}",
                self.drives.len(),
                MAX_DRIVES
            )));
        }
        for (i, drive) in self.drives.iter().enumerate() {
            if !(1..=2).contains(&drive.heads) {
                return Err(ConfigError::Invalid(format!("drive {}: {} heads", i, drive.heads)));
            }
            if drive.cylinders == 0 {
                return Err(ConfigError::Invalid(format!("drive {}: no cylinders", i)));
            }
        }
        if self.ticks_per_ms == 0 || self.revolution_ms == 0 {
            return Err(ConfigError::Invalid("clock rates must be non-zero".to_string()));
        }
        Ok(())
    }

    #[inline]
    pub fn ms_to_ticks(&self, ms: u64) -> u64 {
        ms.saturating_mul(self.ticks_per_ms)
    }

    pub fn revolution_ticks(&self) -> u64 {
        self.ms_to_ticks(self.revolution_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_from_empty_document() {
        let config = FdcConfig::from_toml_str("").unwrap();
        assert_eq!(config.drives.len(), 2);
        assert_eq!(config.drives[0].cylinders, 80);
        assert_eq!(config.ticks_per_ms, 1000);
        assert_eq!(config.revolution_ticks(), 200_000);
        assert_eq!(config.wobble_seed, None);
        assert_eq!(config.log_len, 1024);
    }

    #[test]
    fn config_parses_drives() {
        let doc = r#"
            wobble_seed = 42
            overrun_timeout_ms = 50

            [[drives]]
            cylinders = 40
            heads = 2

            [[drives]]
            write_protect_default = true
        "#;
        let config = FdcConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.wobble_seed, Some(42));
        assert_eq!(config.overrun_timeout_ms, 50);
        assert_eq!(config.drives.len(), 2);
        assert_eq!(config.drives[0].heads, 2);
        assert_eq!(config.drives[0].cylinders, 40);
        assert!(config.drives[1].write_protect_default);
        assert_eq!(config.drives[1].cylinders, 80);
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(matches!(
            FdcConfig::from_toml_str("drives = []"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            FdcConfig::from_toml_str("[[drives]]\nheads = 3"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(FdcConfig::from_toml_str("ticks_per_ms = \"x\""), Err(ConfigError::Parse(_))));
    }
}
