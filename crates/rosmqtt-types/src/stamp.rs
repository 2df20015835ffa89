//! ROS time stamps.
//!
//! A [`Stamp`] is what the outbound path injects into a bridge envelope when
//! a route is stamped.  Its wire form is fixed at 8 bytes: `sec` as a
//! little-endian `u32` followed by `nanosec` as a little-endian `u32`, the
//! same layout ROS uses to serialise `builtin_interfaces/Time`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Seconds and nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Stamp {
    pub sec: u32,
    pub nanosec: u32,
}

impl Stamp {
    /// Size of the wire form in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Build a stamp, carrying nanoseconds above one second into `sec`.
    pub fn new(sec: u32, nanosec: u32) -> Self {
        Self {
            sec: sec.saturating_add(nanosec / NANOS_PER_SEC),
            nanosec: nanosec % NANOS_PER_SEC,
        }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Convert a UTC date-time.  Times before the epoch clamp to zero and
    /// times past 2106 clamp to `u32::MAX` seconds.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp();
        if secs < 0 {
            return Self::default();
        }
        Self {
            sec: u32::try_from(secs).unwrap_or(u32::MAX),
            // Leap seconds report nanoseconds >= 1e9.
            nanosec: dt.timestamp_subsec_nanos().min(NANOS_PER_SEC - 1),
        }
    }

    /// Total nanoseconds since the epoch.
    pub fn as_nanos(self) -> i64 {
        i64::from(self.sec) * i64::from(NANOS_PER_SEC) + i64::from(self.nanosec)
    }

    /// Signed difference `self - earlier` in seconds.
    ///
    /// Negative when `earlier` is actually later, which happens when the
    /// clocks of two hosts disagree.
    pub fn seconds_since(self, earlier: Stamp) -> f64 {
        (self.as_nanos() - earlier.as_nanos()) as f64 / f64::from(NANOS_PER_SEC)
    }

    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.sec.to_le_bytes());
        out[4..].copy_from_slice(&self.nanosec.to_le_bytes());
        out
    }

    /// Inverse of [`Stamp::to_bytes`].  The fields are taken verbatim, so a
    /// stamp from a foreign producer survives a round trip unchanged.
    pub fn from_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        Self {
            sec: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            nanosec: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }
}
