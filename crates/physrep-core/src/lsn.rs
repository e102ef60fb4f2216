//! Log sequence positions
//!
//! An [`Lsn`] is the `(file, offset)` pair identifying a byte location in a
//! segmented log. Its textual form is `{file:offset}`, which is how positions
//! travel through donor queries and operator commands.
//!
//! A [`LogPosition`] additionally carries the size of the record stored at
//! that location so the start of the following record can be derived.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Byte location in a segmented log, ordered by file then offset
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Lsn {
    /// Log file number
    pub file: u32,
    /// Byte offset within the file
    pub offset: u32,
}

impl Lsn {
    /// The zero position, also used as the "unknown" marker
    pub const ZERO: Lsn = Lsn { file: 0, offset: 0 };

    /// Create an LSN
    pub const fn new(file: u32, offset: u32) -> Self {
        Self { file, offset }
    }

    /// Whether this is the zero position
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse a `{file:offset}` token, degrading to [`Lsn::ZERO`] when the
    /// token is malformed.
    pub fn parse_lenient(token: &str) -> Self {
        token.parse().unwrap_or(Self::ZERO)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}:{}}}", self.file, self.offset)
    }
}

impl FromStr for Lsn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidLsn(s.to_string());

        let inner = s
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(invalid)?;
        let (file, offset) = inner.split_once(':').ok_or_else(invalid)?;

        let file = file.trim().parse::<u32>().map_err(|_| invalid())?;
        let offset = offset.trim().parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { file, offset })
    }
}

/// Location and size of the last record of a log
///
/// Positions are ordered only through [`LogPosition::lsn`]; `size` is
/// metadata used to compute where the next record starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    /// Log file number
    pub file: u32,
    /// Byte offset of the record within the file
    pub offset: u32,
    /// Size of the record in bytes
    pub size: u32,
}

impl LogPosition {
    /// The zero position
    pub const ZERO: LogPosition = LogPosition {
        file: 0,
        offset: 0,
        size: 0,
    };

    /// Create a position
    pub const fn new(file: u32, offset: u32, size: u32) -> Self {
        Self { file, offset, size }
    }

    /// Create a position for a record of `size` bytes at `lsn`
    pub const fn at(lsn: Lsn, size: u32) -> Self {
        Self {
            file: lsn.file,
            offset: lsn.offset,
            size,
        }
    }

    /// The ordering key of this position
    pub const fn lsn(&self) -> Lsn {
        Lsn {
            file: self.file,
            offset: self.offset,
        }
    }

    /// Offset at which the next record in the same file begins
    pub const fn next_offset(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }

    /// Whether this is the zero position (size ignored)
    pub fn is_zero(&self) -> bool {
        self.lsn().is_zero()
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (size {})", self.lsn(), self.size)
    }
}
