use std::fmt;
use std::str::FromStr;

use crate::error::{Result, VsphereError};

/// Binary size units, each 1024 times the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
    EB,
}

impl SizeUnit {
    const ALL: [SizeUnit; 7] = [
        SizeUnit::B,
        SizeUnit::KB,
        SizeUnit::MB,
        SizeUnit::GB,
        SizeUnit::TB,
        SizeUnit::PB,
        SizeUnit::EB,
    ];

    pub fn bytes(self) -> u64 {
        1u64 << (10 * self as u32)
    }

    fn label(self) -> &'static str {
        match self {
            SizeUnit::B => "Bytes",
            SizeUnit::KB => "KB",
            SizeUnit::MB => "MB",
            SizeUnit::GB => "GB",
            SizeUnit::TB => "TB",
            SizeUnit::PB => "PB",
            SizeUnit::EB => "EB",
        }
    }
}

impl fmt::Display for SizeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SizeUnit::B => "B",
            SizeUnit::KB => "KB",
            SizeUnit::MB => "MB",
            SizeUnit::GB => "GB",
            SizeUnit::TB => "TB",
            SizeUnit::PB => "PB",
            SizeUnit::EB => "EB",
        };
        f.write_str(name)
    }
}

impl FromStr for SizeUnit {
    type Err = VsphereError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SizeUnit::ALL
            .into_iter()
            .find(|u| u.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VsphereError::UnknownUnit { unit: s.to_string() })
    }
}

/// Convert `size` expressed in `unit` to bytes. Without a unit the value is returned as is.
/// Fails with `SizeOverflow` when the result does not fit in a `u64`.
pub fn convert_to_bytes(size: u64, unit: Option<SizeUnit>) -> Result<u64> {
    match unit {
        Some(unit) => size
            .checked_mul(unit.bytes())
            .ok_or_else(|| VsphereError::SizeOverflow {
                size,
                unit: unit.to_string(),
            }),
        None => Ok(size),
    }
}

/// Format a byte count with the largest unit that keeps the value below 1024,
/// e.g. `1536` → `"1.50 KB"`.
pub fn bytes_to_readable_units(num_bytes: u64) -> String {
    let mut value = num_bytes as f64;
    for unit in SizeUnit::ALL {
        if value < 1024.0 {
            return format!("{value:.2} {}", unit.label());
        }
        value /= 1024.0;
    }
    format!("{:.2} {}", num_bytes as f64, SizeUnit::B.label())
}
