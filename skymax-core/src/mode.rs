//! Inverter operating mode.

use serde::Serialize;
use std::fmt;

/// Operating mode reported by `QMOD`.
///
/// The discriminants are the numeric codes used in reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum OperatingMode {
    #[default]
    Unknown = 0,
    PowerOn = 1,
    Standby = 2,
    Line = 3,
    Battery = 4,
    Fault = 5,
    PowerSaving = 6,
}

impl OperatingMode {
    /// Decodes the mode character from a `QMOD` reply.
    pub fn from_code(code: u8) -> Self {
        match code {
            b'P' => OperatingMode::PowerOn,
            b'S' => OperatingMode::Standby,
            b'L' => OperatingMode::Line,
            b'B' => OperatingMode::Battery,
            b'F' => OperatingMode::Fault,
            b'H' => OperatingMode::PowerSaving,
            _ => OperatingMode::Unknown,
        }
    }

    /// Numeric code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn is_known(&self) -> bool {
        *self != OperatingMode::Unknown
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingMode::Unknown => "unknown",
            OperatingMode::PowerOn => "power_on",
            OperatingMode::Standby => "standby",
            OperatingMode::Line => "line",
            OperatingMode::Battery => "battery",
            OperatingMode::Fault => "fault",
            OperatingMode::PowerSaving => "power_saving",
        };
        f.write_str(name)
    }
}
