//! The external alarm-set collaborator.
//!
//! Alarms here are data (a registered fire time per owner key), not live
//! timers. Actual expiry and delivery belong to whatever service implements
//! [`AlarmRegistrar`]; the in-memory implementation below covers tests and
//! embedders that poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dwell_core::OutputKey;

/// Set-management interface for scheduled alarms.
///
/// The only ordering guarantee required of implementations: the latest
/// registration or cancellation for a given owner wins. Methods take `&self`
/// so one registrar can be shared by many metric instances.
pub trait AlarmRegistrar {
    /// Registers (or replaces) the alarm for `owner`.
    fn schedule(&self, owner: &OutputKey, fire_time_sec: i64);

    /// Removes any registered alarm for `owner`.
    fn cancel(&self, owner: &OutputKey);
}

impl<R: AlarmRegistrar + ?Sized> AlarmRegistrar for Arc<R> {
    fn schedule(&self, owner: &OutputKey, fire_time_sec: i64) {
        (**self).schedule(owner, fire_time_sec);
    }

    fn cancel(&self, owner: &OutputKey) {
        (**self).cancel(owner);
    }
}

/// In-memory alarm set with pull-style firing.
#[derive(Debug, Default)]
pub struct InMemoryAlarmRegistrar {
    alarms: Mutex<HashMap<OutputKey, i64>>,
}

impl InMemoryAlarmRegistrar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered fire time for `owner`, if any.
    pub fn scheduled_fire_time_sec(&self, owner: &OutputKey) -> Option<i64> {
        self.lock().get(owner).copied()
    }

    /// Number of registered alarms.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes and returns the owners whose alarms are due at `now_sec`.
    pub fn drain_fired(&self, now_sec: i64) -> Vec<OutputKey> {
        let mut alarms = self.lock();
        let fired: Vec<OutputKey> = alarms
            .iter()
            .filter(|(_, fire_time_sec)| **fire_time_sec <= now_sec)
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in &fired {
            alarms.remove(owner);
        }
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OutputKey, i64>> {
        self.alarms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AlarmRegistrar for InMemoryAlarmRegistrar {
    fn schedule(&self, owner: &OutputKey, fire_time_sec: i64) {
        self.lock().insert(owner.clone(), fire_time_sec);
    }

    fn cancel(&self, owner: &OutputKey) {
        self.lock().remove(owner);
    }
}
