//! Alarm configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors rejected when constructing an [`AlertSpec`], before any event is
/// processed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertSpecError {
    /// The duration threshold was zero or negative.
    #[error("alert {id}: threshold must be positive, got {threshold_sum_ns}ns")]
    NonPositiveThreshold { id: i64, threshold_sum_ns: i64 },

    /// The accumulation window covered no buckets.
    #[error("alert {id}: window must cover at least one bucket")]
    ZeroWindowBuckets { id: i64 },

    /// The refractory period was negative.
    #[error("alert {id}: refractory period cannot be negative, got {refractory_period_sec}s")]
    NegativeRefractoryPeriod {
        id: i64,
        refractory_period_sec: i64,
    },
}

/// Immutable description of one threshold alarm.
///
/// Supplied at predictor construction; all fields are validated up front so
/// the hot path never sees a malformed spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAlertSpec")]
pub struct AlertSpec {
    id: i64,
    target_metric_id: i64,
    threshold_sum_ns: i64,
    window_buckets: u32,
    refractory_period_sec: i64,
}

impl AlertSpec {
    /// Creates a validated alert spec.
    pub fn new(
        id: i64,
        target_metric_id: i64,
        threshold_sum_ns: i64,
        window_buckets: u32,
        refractory_period_sec: i64,
    ) -> Result<Self, AlertSpecError> {
        if threshold_sum_ns <= 0 {
            return Err(AlertSpecError::NonPositiveThreshold {
                id,
                threshold_sum_ns,
            });
        }
        if window_buckets == 0 {
            return Err(AlertSpecError::ZeroWindowBuckets { id });
        }
        if refractory_period_sec < 0 {
            return Err(AlertSpecError::NegativeRefractoryPeriod {
                id,
                refractory_period_sec,
            });
        }
        Ok(Self {
            id,
            target_metric_id,
            threshold_sum_ns,
            window_buckets,
            refractory_period_sec,
        })
    }

    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    #[must_use]
    pub const fn target_metric_id(&self) -> i64 {
        self.target_metric_id
    }

    /// Accumulated duration that trips the alarm, in nanoseconds.
    #[must_use]
    pub const fn threshold_sum_ns(&self) -> i64 {
        self.threshold_sum_ns
    }

    /// Number of reporting buckets the threshold sums over.
    #[must_use]
    pub const fn window_buckets(&self) -> u32 {
        self.window_buckets
    }

    /// Cooldown after a fired alarm, in seconds.
    #[must_use]
    pub const fn refractory_period_sec(&self) -> i64 {
        self.refractory_period_sec
    }
}

/// Unvalidated shape deserialized from external configuration.
#[derive(Deserialize)]
struct RawAlertSpec {
    id: i64,
    target_metric_id: i64,
    threshold_sum_ns: i64,
    window_buckets: u32,
    refractory_period_sec: i64,
}

impl TryFrom<RawAlertSpec> for AlertSpec {
    type Error = AlertSpecError;

    fn try_from(raw: RawAlertSpec) -> Result<Self, Self::Error> {
        Self::new(
            raw.id,
            raw.target_metric_id,
            raw.threshold_sum_ns,
            raw.window_buckets,
            raw.refractory_period_sec,
        )
    }
}
