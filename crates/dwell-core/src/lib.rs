//! Duration aggregation core for a single logical duration metric.
//!
//! This crate contains the fundamental types and logic for:
//! - Keys: validated sub-key / output-key / condition-instance identifiers
//! - Buckets: forward-only reporting windows and the records they emit
//! - Accumulation: per-sub-key accrual state collapsed into per-window maxima
//!
//! Alarm prediction lives in `dwell-alarm` and attaches through the
//! [`AccrualObserver`] seam; this crate has no dependency on it.

mod accumulator;
mod bucket;
mod keys;

pub use accumulator::{
    AccrualCandidate, AccrualObserver, AccumulatorConfig, DurationAccumulator, GuardrailReporter,
};
pub use bucket::{BucketWindow, NS_PER_SEC, OutputRecord, UploadThreshold};
pub use keys::{ConditionInstanceKey, OutputKey, SubKey, ValidationError};
