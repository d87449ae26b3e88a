//! Predictive threshold alarms for duration metrics.
//!
//! This crate contains the alarm side of the duration pipeline:
//! - Alert specs: validated, immutable alarm configuration
//! - Prediction: when will the fastest-growing accrual cross the threshold
//! - Registration: the external alarm-set collaborator interface
//!
//! The predictor implements `dwell-core`'s `AccrualObserver`, so it plugs
//! directly into a `DurationAccumulator`.

mod alert;
mod predictor;
mod registrar;

pub use alert::{AlertSpec, AlertSpecError};
pub use predictor::ThresholdPredictor;
pub use registrar::{AlarmRegistrar, InMemoryAlarmRegistrar};
