//! Packed hybrid logical clock timestamp

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of low bits holding the logical counter
pub const LOGICAL_BITS: u32 = 16;

/// Largest physical component representable in the high 48 bits
pub const MAX_PHYSICAL: u64 = (1 << (64 - LOGICAL_BITS)) - 1;

const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A causal timestamp: wall-clock milliseconds in the high 48 bits, a
/// logical counter in the low 16 bits.
///
/// Numeric order is causal order. Persisted and serialized as a signed
/// 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The zero timestamp, before every generated value
    pub const ZERO: Self = Self(0);

    /// Pack a physical/logical pair
    pub fn from_parts(physical_ms: u64, logical: u16) -> Self {
        let packed = ((physical_ms & MAX_PHYSICAL) << LOGICAL_BITS) | u64::from(logical);
        Self(packed as i64)
    }

    /// Wrap a persisted value
    pub const fn from_i64(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Wall-clock component in milliseconds since the Unix epoch
    pub fn physical(&self) -> u64 {
        (self.0 as u64) >> LOGICAL_BITS
    }

    /// Logical counter component
    pub fn logical(&self) -> u16 {
        ((self.0 as u64) & LOGICAL_MASK) as u16
    }

    pub fn before(&self, other: &Self) -> bool {
        self.0 < other.0
    }

    pub fn after(&self, other: &Self) -> bool {
        self.0 > other.0
    }

    /// Physical component as a UTC datetime
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.physical())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.physical(), self.logical())
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}
