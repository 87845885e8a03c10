//! Byte sizes written the way operators write them ("20MB", "512KiB", 1024)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid size format: {0:?}")]
    InvalidFormat(String),

    #[error("Invalid unit: {0:?}")]
    InvalidUnit(String),

    #[error("Size overflows u64: {0:?}")]
    Overflow(String),
}

const KIB: u64 = 1024;

/// Binary multipliers, largest first
const UNITS: &[(&str, u64)] = &[
    ("TB", KIB * KIB * KIB * KIB),
    ("GB", KIB * KIB * KIB),
    ("MB", KIB * KIB),
    ("KB", KIB),
    ("B", 1),
];

/// Byte count accepted either as an integer or as a string with a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawByteSize")]
pub struct ByteSize(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawByteSize {
    Number(u64),
    Text(String),
}

impl TryFrom<RawByteSize> for ByteSize {
    type Error = ParseError;

    fn try_from(raw: RawByteSize) -> Result<Self, Self::Error> {
        match raw {
            RawByteSize::Number(n) => Ok(ByteSize(n)),
            RawByteSize::Text(s) => s.parse(),
        }
    }
}

impl ByteSize {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

fn multiplier(unit: &str) -> Option<u64> {
    let unit = unit.trim().to_ascii_uppercase();
    let canonical = match unit.as_str() {
        "" | "B" => "B",
        "K" | "KB" | "KIB" => "KB",
        "M" | "MB" | "MIB" => "MB",
        "G" | "GB" | "GIB" => "GB",
        "T" | "TB" | "TIB" => "TB",
        _ => return None,
    };
    UNITS
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|&(_, factor)| factor)
}

impl FromStr for ByteSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        if digits.is_empty() {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let value: u64 = digits
            .parse()
            .map_err(|_| ParseError::Overflow(s.to_string()))?;
        let factor = multiplier(unit).ok_or_else(|| ParseError::InvalidUnit(unit.to_string()))?;

        value
            .checked_mul(factor)
            .map(ByteSize)
            .ok_or_else(|| ParseError::Overflow(s.to_string()))
    }
}

impl fmt::Display for ByteSize {
    /// Largest unit that divides the size exactly, e.g. "20MB" or "1536KB"
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (unit, factor) = UNITS
            .iter()
            .find(|(_, factor)| self.0 != 0 && self.0 % factor == 0)
            .copied()
            .unwrap_or(("B", 1));
        write!(f, "{}{}", self.0 / factor, unit)
    }
}
