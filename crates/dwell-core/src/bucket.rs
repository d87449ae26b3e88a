//! Reporting-bucket bookkeeping.
//!
//! Durations are aggregated over fixed-size windows of elapsed-realtime
//! nanoseconds. The current window only ever moves forward, in whole-bucket
//! steps; windows with nothing pending are skipped without emitting.

use serde::{Deserialize, Serialize};

use crate::keys::OutputKey;

/// Nanoseconds per second.
pub const NS_PER_SEC: i64 = 1_000_000_000;

/// The reporting window durations are currently being aggregated into.
///
/// Half-open interval `[start_ns, end_ns)`: an event stamped exactly at
/// `end_ns` belongs to the next window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketWindow {
    start_ns: i64,
    size_ns: i64,
    index: i64,
}

impl BucketWindow {
    pub(crate) const fn new(start_ns: i64, size_ns: i64) -> Self {
        Self {
            start_ns,
            size_ns,
            index: 0,
        }
    }

    /// Start of the window, inclusive.
    #[must_use]
    pub const fn start_ns(&self) -> i64 {
        self.start_ns
    }

    /// End of the window, exclusive.
    #[must_use]
    pub const fn end_ns(&self) -> i64 {
        self.start_ns + self.size_ns
    }

    /// Zero-based index of the window since the accumulator's start time.
    #[must_use]
    pub const fn index(&self) -> i64 {
        self.index
    }

    /// Whether `time_ns` falls past the end of this window.
    pub(crate) const fn is_stale_at(&self, time_ns: i64) -> bool {
        time_ns >= self.end_ns()
    }

    /// Jumps forward to the window containing `now_ns`.
    ///
    /// Must only be called when [`Self::is_stale_at`] holds. Intermediate
    /// windows are skipped, not visited.
    pub(crate) fn advance_to(&mut self, now_ns: i64) {
        debug_assert!(self.is_stale_at(now_ns));
        let forward = 1 + (now_ns - self.end_ns()) / self.size_ns;
        self.start_ns += forward * self.size_ns;
        self.index += forward;
    }
}

/// One aggregated duration, emitted when its reporting window closes.
///
/// This is an in-memory handoff to the downstream serializer; no wire format
/// is owned here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub output_key: OutputKey,
    pub bucket_start_ns: i64,
    pub bucket_end_ns: i64,
    pub duration_ns: i64,
}

/// Filter applied to a closing window's value before emitting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadThreshold {
    /// Emit only when the aggregated duration strictly exceeds the value.
    GreaterThanNs(i64),
}

impl UploadThreshold {
    /// Whether a record with this duration passes the filter.
    #[must_use]
    pub const fn passes(&self, duration_ns: i64) -> bool {
        match self {
            Self::GreaterThanNs(min_ns) => duration_ns > *min_ns,
        }
    }
}
