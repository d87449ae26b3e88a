//! Predictive threshold alarms over accruing durations.
//!
//! Assuming every still-accruing sub-key keeps accruing as-is, the predictor
//! computes when the fastest-growing one would cross the configured
//! threshold, and keeps at most one scheduled alarm per output key pointed at
//! that moment. A fired alarm opens a refractory window: predictions made
//! inside it are clamped to its end, never discarded.

use std::collections::HashMap;

use dwell_core::{AccrualCandidate, AccrualObserver, NS_PER_SEC, OutputKey};

use crate::alert::AlertSpec;
use crate::registrar::AlarmRegistrar;

/// Alarm lifecycle state for one output key.
///
/// `Idle -> Scheduled` (re-entrant: recomputes replace the fire time in
/// place), `Scheduled -> Idle` on cancel, `Scheduled -> Refractory` on fire,
/// `Refractory -> Idle | Scheduled` as predictions continue. The map entry is
/// dropped once both fields are `None`.
#[derive(Debug, Clone, Copy, Default)]
struct AlarmState {
    scheduled_fire_time_sec: Option<i64>,
    refractory_ends_sec: Option<i64>,
}

/// Predicts threshold crossings and maintains scheduled alarms through an
/// [`AlarmRegistrar`].
///
/// Attach to a `DurationAccumulator` via
/// [`DurationAccumulator::with_observer`](dwell_core::DurationAccumulator::with_observer);
/// every accrual-relevant event re-invokes the prediction.
pub struct ThresholdPredictor<R> {
    spec: AlertSpec,
    registrar: R,
    states: HashMap<OutputKey, AlarmState>,
}

impl<R: AlarmRegistrar> ThresholdPredictor<R> {
    pub fn new(spec: AlertSpec, registrar: R) -> Self {
        Self {
            spec,
            registrar,
            states: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn spec(&self) -> &AlertSpec {
        &self.spec
    }

    #[must_use]
    pub const fn registrar(&self) -> &R {
        &self.registrar
    }

    /// The pending fire time for `output_key`, if an alarm is scheduled.
    pub fn scheduled_fire_time_sec(&self, output_key: &OutputKey) -> Option<i64> {
        self.states
            .get(output_key)
            .and_then(|state| state.scheduled_fire_time_sec)
    }

    /// When the refractory period for `output_key` ends, if one is active.
    pub fn refractory_period_ends_sec(&self, output_key: &OutputKey) -> Option<i64> {
        self.states
            .get(output_key)
            .and_then(|state| state.refractory_ends_sec)
    }

    /// Number of output keys with a scheduled alarm.
    pub fn scheduled_alarm_count(&self) -> usize {
        self.states
            .values()
            .filter(|state| state.scheduled_fire_time_sec.is_some())
            .count()
    }

    /// Feeds back alarms the delivery service has fired.
    ///
    /// Each fired key's scheduled alarm is cleared and its refractory window
    /// opened: `refractory_ends_sec = floor(now_ns / 1e9) + refractory_period_sec`.
    pub fn inform_alarms_fired(&mut self, now_ns: i64, fired: &[OutputKey]) {
        let refractory_ends_sec = now_ns / NS_PER_SEC + self.spec.refractory_period_sec();
        for output_key in fired {
            let state = self.states.entry(output_key.clone()).or_default();
            state.scheduled_fire_time_sec = None;
            state.refractory_ends_sec = Some(refractory_ends_sec);
            tracing::debug!(
                alert_id = self.spec.id(),
                output_key = %output_key,
                refractory_ends_sec,
                "alarm fired; refractory period begins"
            );
        }
    }

    /// Earliest whole second at which this candidate would reach the
    /// threshold, assuming it keeps accruing. Rounded up: an alarm that fires
    /// early would be ignored by the delivery service.
    const fn candidate_fire_time_sec(&self, candidate: &AccrualCandidate) -> i64 {
        let remaining_ns = self.spec.threshold_sum_ns() - candidate.banked_ns;
        (candidate.resume_time_ns + remaining_ns + NS_PER_SEC - 1) / NS_PER_SEC
    }

    fn reschedule(&mut self, output_key: &OutputKey, fire_time_sec: i64) {
        let state = self.states.entry(output_key.clone()).or_default();
        if state.scheduled_fire_time_sec == Some(fire_time_sec) {
            return;
        }
        state.scheduled_fire_time_sec = Some(fire_time_sec);
        self.registrar.schedule(output_key, fire_time_sec);
        tracing::debug!(
            alert_id = self.spec.id(),
            output_key = %output_key,
            fire_time_sec,
            "alarm scheduled"
        );
    }

    fn cancel(&mut self, output_key: &OutputKey) {
        let Some(state) = self.states.get_mut(output_key) else {
            return;
        };
        let had_alarm = state.scheduled_fire_time_sec.take().is_some();
        let in_refractory = state.refractory_ends_sec.is_some();
        if had_alarm {
            self.registrar.cancel(output_key);
            tracing::debug!(
                alert_id = self.spec.id(),
                output_key = %output_key,
                "alarm canceled"
            );
        }
        if !in_refractory {
            self.states.remove(output_key);
        }
    }
}

impl<R: AlarmRegistrar> AccrualObserver for ThresholdPredictor<R> {
    fn candidates_changed(&mut self, output_key: &OutputKey, candidates: &[AccrualCandidate]) {
        let predicted_sec = candidates
            .iter()
            .map(|candidate| self.candidate_fire_time_sec(candidate))
            .min();

        match predicted_sec {
            // No sub-key can still grow toward the threshold.
            None => self.cancel(output_key),
            Some(raw_sec) => {
                let refractory_ends_sec = self
                    .states
                    .get(output_key)
                    .and_then(|state| state.refractory_ends_sec);
                let fire_time_sec = match refractory_ends_sec {
                    Some(ends_sec) if raw_sec < ends_sec => ends_sec,
                    _ => raw_sec,
                };
                self.reschedule(output_key, fire_time_sec);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registrar::InMemoryAlarmRegistrar;

    fn spec_40s() -> AlertSpec {
        AlertSpec::new(101, 1, 40 * NS_PER_SEC, 2, 45).unwrap()
    }

    fn predictor() -> (
        ThresholdPredictor<Arc<InMemoryAlarmRegistrar>>,
        Arc<InMemoryAlarmRegistrar>,
    ) {
        let registrar = Arc::new(InMemoryAlarmRegistrar::new());
        (
            ThresholdPredictor::new(spec_40s(), Arc::clone(&registrar)),
            registrar,
        )
    }

    fn key() -> OutputKey {
        OutputKey::new("maps").unwrap()
    }

    const fn candidate(resume_sec: i64, banked_sec: i64) -> AccrualCandidate {
        AccrualCandidate {
            resume_time_ns: resume_sec * NS_PER_SEC,
            banked_ns: banked_sec * NS_PER_SEC,
        }
    }

    #[test]
    fn predicts_earliest_crossing_candidate() {
        let (mut predictor, registrar) = predictor();
        // Second candidate has a later resume but three banked seconds; the
        // first one still crosses sooner.
        predictor.candidates_changed(&key(), &[candidate(26, 0), candidate(30, 3)]);
        assert_eq!(predictor.scheduled_fire_time_sec(&key()), Some(66));
        assert_eq!(registrar.scheduled_fire_time_sec(&key()), Some(66));
    }

    #[test]
    fn recompute_moves_later_when_fastest_candidate_stops() {
        let (mut predictor, registrar) = predictor();
        predictor.candidates_changed(&key(), &[candidate(26, 0), candidate(30, 3)]);
        predictor.candidates_changed(&key(), &[candidate(30, 3)]);
        assert_eq!(registrar.scheduled_fire_time_sec(&key()), Some(67));
        assert_eq!(predictor.scheduled_alarm_count(), 1);
    }

    #[test]
    fn empty_candidate_set_cancels_alarm() {
        let (mut predictor, registrar) = predictor();
        predictor.candidates_changed(&key(), &[candidate(13, 0)]);
        assert_eq!(registrar.scheduled_fire_time_sec(&key()), Some(53));

        predictor.candidates_changed(&key(), &[]);
        assert_eq!(predictor.scheduled_fire_time_sec(&key()), None);
        assert!(registrar.is_empty());
        assert_eq!(predictor.scheduled_alarm_count(), 0);
    }

    #[test]
    fn fractional_second_fire_times_round_up() {
        let spec = AlertSpec::new(101, 1, 2 * NS_PER_SEC, 1, 45).unwrap();
        let registrar = Arc::new(InMemoryAlarmRegistrar::new());
        let mut predictor = ThresholdPredictor::new(spec, Arc::clone(&registrar));

        predictor.candidates_changed(
            &key(),
            &[AccrualCandidate {
                resume_time_ns: 1_500_000_000,
                banked_ns: 0,
            }],
        );
        assert_eq!(registrar.scheduled_fire_time_sec(&key()), Some(4));
    }

    #[test]
    fn refractory_clamps_prediction_but_does_not_erase_it() {
        let (mut predictor, registrar) = predictor();
        predictor.candidates_changed(&key(), &[candidate(26, 0)]);
        predictor.inform_alarms_fired(66 * NS_PER_SEC, std::slice::from_ref(&key()));
        assert_eq!(predictor.scheduled_fire_time_sec(&key()), None);
        assert_eq!(predictor.refractory_period_ends_sec(&key()), Some(111));

        // Raw prediction of 106s lands inside the refractory window.
        predictor.candidates_changed(&key(), &[candidate(66, 0)]);
        assert_eq!(registrar.scheduled_fire_time_sec(&key()), Some(111));

        // After the window, predictions report their true value again.
        predictor.candidates_changed(&key(), &[candidate(109, 0)]);
        assert_eq!(registrar.scheduled_fire_time_sec(&key()), Some(149));
    }

    #[test]
    fn inform_alarms_fired_floors_now_before_adding_period() {
        let (mut predictor, _registrar) = predictor();
        predictor.inform_alarms_fired(66 * NS_PER_SEC + 900_000_000, std::slice::from_ref(&key()));
        assert_eq!(predictor.refractory_period_ends_sec(&key()), Some(111));
    }

    #[test]
    fn unchanged_prediction_is_not_rescheduled() {
        let (mut predictor, registrar) = predictor();
        predictor.candidates_changed(&key(), &[candidate(13, 0)]);
        registrar.cancel(&key());
        // Same candidate set: the predictor treats the alarm as already
        // registered and stays quiet.
        predictor.candidates_changed(&key(), &[candidate(13, 0)]);
        assert!(registrar.is_empty());
        assert_eq!(predictor.scheduled_fire_time_sec(&key()), Some(53));
    }
}
