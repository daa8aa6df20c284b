//! Byte-quantity parsing for resource limits.
//!
//! Job configurations express memory limits as human-readable strings:
//! `"100G"`, `"10M"`, `"64K"`. Units are binary (K = 1024) and
//! case-insensitive; a trailing `B` is accepted on the multiplied units
//! (`"10MB"` == `"10M"`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BpmError, BpmResult};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;
const TIB: u64 = 1024 * GIB;

/// A byte quantity parsed from a human-readable string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteQuantity(u64);

impl ByteQuantity {
    /// Create a quantity from a raw byte count.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Get the raw byte count.
    #[must_use]
    pub const fn as_bytes(&self) -> u64 {
        self.0
    }

    /// Parse a quantity string: a positive integer followed by a unit
    /// suffix in {B, K, M, G, T}.
    ///
    /// # Errors
    ///
    /// Returns [`BpmError::InvalidByteQuantity`] when the value has no
    /// unit, an unknown unit, or a non-integer magnitude.
    pub fn parse(s: &str) -> BpmResult<Self> {
        let invalid = || BpmError::InvalidByteQuantity {
            value: s.to_string(),
        };

        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (digits, unit) = trimmed.split_at(split);

        let magnitude: u64 = digits.parse().map_err(|_| invalid())?;
        if magnitude == 0 {
            return Err(invalid());
        }

        let multiplier = match unit.to_ascii_uppercase().as_str() {
            "B" => 1,
            "K" | "KB" => KIB,
            "M" | "MB" => MIB,
            "G" | "GB" => GIB,
            "T" | "TB" => TIB,
            _ => return Err(invalid()),
        };

        magnitude
            .checked_mul(multiplier)
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for ByteQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 >= TIB && self.0 % TIB == 0 {
            write!(f, "{}T", self.0 / TIB)
        } else if self.0 >= GIB && self.0 % GIB == 0 {
            write!(f, "{}G", self.0 / GIB)
        } else if self.0 >= MIB && self.0 % MIB == 0 {
            write!(f, "{}M", self.0 / MIB)
        } else if self.0 >= KIB && self.0 % KIB == 0 {
            write!(f, "{}K", self.0 / KIB)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

impl FromStr for ByteQuantity {
    type Err = BpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
