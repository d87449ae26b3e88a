//! Max-duration accumulation over reporting buckets.
//!
//! Tracks, per sub-key, how long a tagged condition of interest has been
//! active, and collapses resolved durations into bucket-sized output records.
//!
//! # Algorithm Summary
//!
//! 1. `note_start` creates (or nests) a tracked entry; accrual begins when the
//!    entry's condition holds
//! 2. `note_condition_changed` pauses and resumes accrual without ending the
//!    episode; paused time is banked, never lost
//! 3. When an entry resolves (final stop, or accrual pauses), its total
//!    episode duration is merged into the current window's pending value via
//!    max: concurrent holders report the longest episode, not the sum
//! 4. Window rolling happens inside every mutating call, so a resolution is
//!    always credited to the window that is current at resolution time

use std::collections::HashMap;
use std::sync::Arc;

use crate::bucket::{BucketWindow, OutputRecord, UploadThreshold};
use crate::keys::{ConditionInstanceKey, OutputKey, SubKey, ValidationError};

/// Snapshot of one still-accruing sub-key, handed to the [`AccrualObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccrualCandidate {
    /// When this sub-key most recently began (or resumed) accruing.
    pub resume_time_ns: i64,

    /// Time already credited to the episode before the current accrual run.
    pub banked_ns: i64,
}

/// Re-invoked after every state-mutating accumulator call with the set of
/// sub-keys still capable of growing their episode duration.
///
/// This is the seam the threshold predictor hangs off; the accumulator never
/// needs to know what the observer does with the candidate set. `()` is the
/// no-op observer for accumulators without alarms.
pub trait AccrualObserver {
    fn candidates_changed(&mut self, output_key: &OutputKey, candidates: &[AccrualCandidate]);
}

impl AccrualObserver for () {
    fn candidates_changed(&mut self, _output_key: &OutputKey, _candidates: &[AccrualCandidate]) {}
}

/// Side channel notified when the cardinality guardrail latches.
///
/// Passed explicitly rather than reached through a global so the counter can
/// be shared across metric instances by the caller that owns them.
pub trait GuardrailReporter: Send + Sync {
    fn guardrail_hit(&self, metric_id: i64);
}

/// Configuration for a [`DurationAccumulator`].
#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    /// Identifier of the metric this accumulator aggregates, for logs and
    /// guardrail reporting.
    pub metric_id: i64,

    /// The dimension all of this accumulator's sub-keys report under.
    pub output_key: OutputKey,

    /// Whether repeated starts for the same sub-key nest. When false,
    /// re-starting a running sub-key is a no-op; when true, each start must be
    /// matched by a stop before accrual ends.
    pub nested: bool,

    /// Start of the first reporting window, in elapsed-realtime nanoseconds.
    pub bucket_start_ns: i64,

    /// Size of each reporting window. Must be positive.
    pub bucket_size_ns: i64,

    /// Optional filter applied to a closing window's value before emitting.
    pub upload_threshold: Option<UploadThreshold>,
}

/// Live state for one sub-key's episode.
#[derive(Debug, Clone)]
struct TrackedEntry {
    /// Number of unmatched starts. An entry is Running iff `> 0`; entries are
    /// removed from the map when they resolve, so in-map entries are Running.
    nest_depth: u32,

    /// When accrual last began or resumed. Meaningful only while accruing.
    last_resume_time_ns: i64,

    /// Episode time credited so far across completed accrual runs.
    banked_duration_ns: i64,

    /// Predicate instance gating accrual, if any. Non-owning lookup key; the
    /// predicate's state arrives via `note_condition_changed`.
    condition_link: Option<ConditionInstanceKey>,

    condition_satisfied: bool,
}

impl TrackedEntry {
    const fn is_accruing(&self) -> bool {
        self.nest_depth > 0 && self.condition_satisfied
    }
}

/// Duration aggregator for a single logical duration metric.
///
/// Driven by a single time-ordered stream of calls; performs no internal
/// parallelism and never blocks. Distinct accumulators are independent and
/// share nothing mutable.
pub struct DurationAccumulator<O: AccrualObserver = ()> {
    config: AccumulatorConfig,
    window: BucketWindow,
    entries: HashMap<SubKey, TrackedEntry>,
    /// Max episode duration resolved during the current window. 0 = empty.
    pending_max_ns: i64,
    /// Records whose windows closed inside a mutating call, awaiting the next
    /// explicit flush.
    staged: Vec<OutputRecord>,
    guardrail_hit: bool,
    guardrail_reporter: Option<Arc<dyn GuardrailReporter>>,
    observer: O,
}

impl DurationAccumulator<()> {
    /// Creates an accumulator with no accrual observer.
    pub fn new(config: AccumulatorConfig) -> Result<Self, ValidationError> {
        Self::with_observer(config, ())
    }
}

impl<O: AccrualObserver> DurationAccumulator<O> {
    /// Creates an accumulator that re-invokes `observer` after every
    /// state-mutating call.
    pub fn with_observer(config: AccumulatorConfig, observer: O) -> Result<Self, ValidationError> {
        if config.bucket_size_ns <= 0 {
            return Err(ValidationError::NonPositiveBucketSize {
                size_ns: config.bucket_size_ns,
            });
        }
        let window = BucketWindow::new(config.bucket_start_ns, config.bucket_size_ns);
        Ok(Self {
            config,
            window,
            entries: HashMap::new(),
            pending_max_ns: 0,
            staged: Vec::new(),
            guardrail_hit: false,
            guardrail_reporter: None,
            observer,
        })
    }

    /// Attaches the guardrail side-channel reporter.
    #[must_use]
    pub fn with_guardrail_reporter(mut self, reporter: Arc<dyn GuardrailReporter>) -> Self {
        self.guardrail_reporter = Some(reporter);
        self
    }

    /// The attached observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Mutable access to the attached observer (e.g. to feed back fired
    /// alarms).
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// The reporting window currently being aggregated into.
    #[must_use]
    pub const fn current_window(&self) -> BucketWindow {
        self.window
    }

    /// Whether the cardinality guardrail has latched. Never un-trips.
    #[must_use]
    pub const fn has_hit_guardrail(&self) -> bool {
        self.guardrail_hit
    }

    /// Notes a start event for `sub_key` at `time_ns`.
    ///
    /// Creates the entry if absent, subject to the guardrail: once the number
    /// of live sub-keys reaches `dimension_hard_limit` (or the guardrail has
    /// already latched), new sub-keys are dropped silently. With
    /// `condition_met == false` the entry is created pending and accrues
    /// nothing until its condition flips true.
    pub fn note_start(
        &mut self,
        sub_key: SubKey,
        condition_met: bool,
        time_ns: i64,
        condition_link: Option<ConditionInstanceKey>,
        dimension_hard_limit: usize,
    ) {
        self.roll_window(time_ns);

        let known = self.entries.contains_key(&sub_key);
        if !known && !self.admit_new_key(&sub_key, dimension_hard_limit) {
            return;
        }

        let entry = self.entries.entry(sub_key).or_insert_with(|| TrackedEntry {
            nest_depth: 0,
            last_resume_time_ns: time_ns,
            banked_duration_ns: 0,
            condition_link,
            condition_satisfied: condition_met,
        });

        if entry.nest_depth == 0 {
            // First active nesting level: accrual begins now if the condition
            // already holds.
            entry.nest_depth = 1;
            if entry.condition_satisfied {
                entry.last_resume_time_ns = time_ns;
            }
        } else if self.config.nested {
            entry.nest_depth += 1;
        }
        // Re-starting a running, non-nested key changes nothing.

        self.notify_observer();
    }

    /// Notes a stop event for `sub_key` at `time_ns`.
    ///
    /// Decrements the nesting depth; only when it reaches zero does the
    /// episode resolve: elapsed accrual is banked, the total is merged into
    /// the current window's pending value, and the entry is dropped. Stopping
    /// an unknown key is a no-op.
    pub fn note_stop(&mut self, sub_key: &SubKey, time_ns: i64) {
        self.roll_window(time_ns);

        let resolved = match self.entries.get_mut(sub_key) {
            None => None,
            Some(entry) => {
                entry.nest_depth -= 1;
                if entry.nest_depth > 0 {
                    None
                } else {
                    if entry.condition_satisfied {
                        entry.banked_duration_ns += time_ns - entry.last_resume_time_ns;
                    }
                    Some(entry.banked_duration_ns)
                }
            }
        };

        if let Some(total_ns) = resolved {
            self.entries.remove(sub_key);
            self.merge_pending(total_ns);
        }

        self.notify_observer();
    }

    /// Resolves every live entry at `time_ns`, regardless of nesting depth.
    pub fn note_stop_all(&mut self, time_ns: i64) {
        self.roll_window(time_ns);

        let mut max_total_ns = 0;
        for (_, entry) in self.entries.drain() {
            let mut total_ns = entry.banked_duration_ns;
            if entry.condition_satisfied {
                total_ns += time_ns - entry.last_resume_time_ns;
            }
            max_total_ns = max_total_ns.max(total_ns);
        }
        self.merge_pending(max_total_ns);

        self.notify_observer();
    }

    /// Applies a condition flip to every entry linked to `condition_key`.
    ///
    /// A flip to true resumes accrual from `time_ns`; a flip to false banks
    /// the elapsed accrual and stages the entry's current total as a pending
    /// candidate. The entry stays Running, awaiting another flip or a stop.
    pub fn note_condition_changed(
        &mut self,
        condition_key: &ConditionInstanceKey,
        met: bool,
        time_ns: i64,
    ) {
        self.roll_window(time_ns);

        let mut paused_max_ns = 0;
        for entry in self.entries.values_mut() {
            if entry.condition_link.as_ref() != Some(condition_key) {
                continue;
            }
            if met && !entry.condition_satisfied {
                entry.condition_satisfied = true;
                entry.last_resume_time_ns = time_ns;
            } else if !met && entry.condition_satisfied {
                entry.condition_satisfied = false;
                entry.banked_duration_ns += time_ns - entry.last_resume_time_ns;
                paused_max_ns = paused_max_ns.max(entry.banked_duration_ns);
            }
        }
        self.merge_pending(paused_max_ns);

        self.notify_observer();
    }

    /// Closes any windows `now_ns` has moved past and drains the resulting
    /// records into `sink`.
    pub fn flush_if_needed(&mut self, now_ns: i64, sink: &mut Vec<OutputRecord>) {
        self.roll_window(now_ns);
        sink.append(&mut self.staged);
    }

    /// Whether any entry is currently accruing.
    #[must_use]
    pub fn has_started_duration(&self) -> bool {
        self.entries.values().any(TrackedEntry::is_accruing)
    }

    /// Whether the current window holds a resolved value awaiting flush.
    #[must_use]
    pub const fn has_accumulated_duration(&self) -> bool {
        self.pending_max_ns > 0
    }

    fn merge_pending(&mut self, total_ns: i64) {
        if total_ns > self.pending_max_ns {
            self.pending_max_ns = total_ns;
        }
    }

    /// Closes the current window if `now_ns` has moved past it, staging one
    /// record for the closing window, and jumps to the window containing
    /// `now_ns`. Empty intermediate windows are skipped without emitting.
    fn roll_window(&mut self, now_ns: i64) {
        if !self.window.is_stale_at(now_ns) {
            return;
        }
        if self.pending_max_ns > 0 {
            let passes = self
                .config
                .upload_threshold
                .is_none_or(|threshold| threshold.passes(self.pending_max_ns));
            if passes {
                tracing::debug!(
                    metric_id = self.config.metric_id,
                    bucket_index = self.window.index(),
                    duration_ns = self.pending_max_ns,
                    "closing bucket"
                );
                self.staged.push(OutputRecord {
                    output_key: self.config.output_key.clone(),
                    bucket_start_ns: self.window.start_ns(),
                    bucket_end_ns: self.window.end_ns(),
                    duration_ns: self.pending_max_ns,
                });
            }
            self.pending_max_ns = 0;
        }
        self.window.advance_to(now_ns);
    }

    /// Guardrail check for a sub-key not yet tracked. Returns whether the key
    /// may be admitted; on the first rejection the latch is set permanently
    /// and reported once.
    fn admit_new_key(&mut self, sub_key: &SubKey, dimension_hard_limit: usize) -> bool {
        if !self.guardrail_hit && self.entries.len() < dimension_hard_limit {
            return true;
        }
        if !self.guardrail_hit {
            self.guardrail_hit = true;
            tracing::warn!(
                metric_id = self.config.metric_id,
                limit = dimension_hard_limit,
                sub_key = %sub_key,
                "dimension guardrail hit; dropping new sub-keys"
            );
            if let Some(reporter) = &self.guardrail_reporter {
                reporter.guardrail_hit(self.config.metric_id);
            }
        }
        false
    }

    fn notify_observer(&mut self) {
        let candidates: Vec<AccrualCandidate> = self
            .entries
            .values()
            .filter(|entry| entry.is_accruing())
            .map(|entry| AccrualCandidate {
                resume_time_ns: entry.last_resume_time_ns,
                banked_ns: entry.banked_duration_ns,
            })
            .collect();
        self.observer
            .candidates_changed(&self.config.output_key, &candidates);
    }
}
