//! Event indicator bookkeeping and event location on dense output.

use tracing::warn;

use crate::brent::find_root;
use crate::constants::{is_equal, ABS_ERR};
use crate::diagnostics::DebugLog;
use crate::stage::StageEvaluator;

/// Continuous extension of the most recently accepted step.
pub trait DenseOutput {
    /// State at fraction `theta` of the step; 0 is the start, 1 the end.
    fn interpolate(&self, theta: f64, out: &mut [f64]);
}

/// The event that ended the most recent step early.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatedEvent {
    pub index: usize,
    /// Fraction of the accepted step at which the indicator crosses zero.
    pub fraction: f64,
    pub time: f64,
    /// Indicator value re-evaluated at the located state.
    pub value: f64,
    /// Magnitude below which the located indicator counts as zero.
    pub equal_to_zero: f64,
    pub cohort_end: bool,
}

#[derive(Debug, Clone, Default)]
pub struct EventTracker {
    old: Vec<f64>,
    new: Vec<f64>,
    located: Vec<bool>,
    pending: Vec<bool>,
    trial: Vec<f64>,
}

impl EventTracker {
    pub fn new(count: usize) -> Self {
        let mut tracker = Self::default();
        tracker.resize(count);
        tracker
    }

    pub fn resize(&mut self, count: usize) {
        if self.old.len() == count {
            return;
        }
        self.old = vec![crate::constants::NO_EVENT; count];
        self.new = vec![crate::constants::NO_EVENT; count];
        self.located = vec![false; count];
        self.pending = vec![false; count];
        self.trial = vec![0.0; count];
    }

    pub fn count(&self) -> usize {
        self.old.len()
    }

    pub fn old_values(&self) -> &[f64] {
        &self.old
    }

    pub fn new_values(&self) -> &[f64] {
        &self.new
    }

    pub fn located(&self) -> &[bool] {
        &self.located
    }

    /// Record indicator values at the start of a step.
    pub fn start_step(&mut self, stages: &mut StageEvaluator<'_>, y: &[f64]) {
        if self.old.is_empty() {
            return;
        }
        stages.indicators(y, &mut self.old);
    }

    /// Evaluate indicators at the end of an accepted step and flag the events
    /// whose sign changed. Returns the number of events to locate.
    pub fn detect(&mut self, stages: &mut StageEvaluator<'_>, y_new: &[f64], identical_zero: f64) -> usize {
        if self.old.is_empty() {
            return 0;
        }
        // An event located in the previous step is not located again while
        // its indicator keeps the value it had at that point.
        for i in 0..self.old.len() {
            self.pending[i] = !(self.located[i] && is_equal(self.old[i], self.new[i], identical_zero));
        }

        stages.indicators(y_new, &mut self.new);

        let mut events = 0;
        for i in 0..self.old.len() {
            let (old, new) = (self.old[i], self.new[i]);
            if (old < 0.0 && new < 0.0) || (old > 0.0 && new > 0.0) {
                self.pending[i] = false;
            }
            if self.pending[i] {
                events += 1;
            }
        }
        events
    }

    pub fn clear_located(&mut self) {
        self.located.fill(false);
    }

    /// Locate the earliest pending event within the step from `y` to `y_new`
    /// and move `y_new` back to it.
    ///
    /// Events whose root cannot be found are reported and skipped; when none
    /// is found `y_new` is left at the end of the step.
    #[allow(clippy::too_many_arguments)]
    pub fn locate(
        &mut self,
        stages: &mut StageEvaluator<'_>,
        dense: &dyn DenseOutput,
        y: &[f64],
        y_new: &mut [f64],
        scratch: &mut [f64],
        step: f64,
        identical_zero: f64,
        log: &mut DebugLog,
    ) -> Option<LocatedEvent> {
        let Self {
            old,
            new,
            located,
            pending,
            trial,
        } = self;

        let mut earliest: Option<(usize, f64)> = None;
        for i in 0..old.len() {
            located[i] = false;
            if !pending[i] {
                continue;
            }
            let result = find_root(
                |theta: f64| {
                    dense.interpolate(theta, scratch);
                    stages.indicators(scratch, trial);
                    trial[i]
                },
                0.0,
                old[i],
                1.0,
                new[i],
                identical_zero,
            );
            match result {
                Ok(fraction) if (0.0..=1.0).contains(&fraction) => {
                    if earliest.map_or(true, |(_, best)| fraction < best) {
                        earliest = Some((i, fraction));
                    }
                }
                outcome => {
                    if let Err(err) = outcome {
                        warn!(event = i, "{err}");
                    }
                    let fraction = outcome.unwrap_or(-1.0);
                    log.line(
                        1,
                        format_args!(
                            "Problem locating event {} at T = {:15.8}  Start = {:12.7e}  Stop = {:12.7e}  dt old = {:12.7e}  dt new = {:12.7e}",
                            i, y_new[0], old[i], new[i], step, fraction * step
                        ),
                    );
                }
            }
        }

        let (index, fraction) = earliest?;
        if fraction == 0.0 {
            y_new.copy_from_slice(y);
        } else {
            dense.interpolate(fraction, y_new);
        }
        located[index] = true;

        stages.indicators(y_new, new);
        let value = new[index];
        let equal_to_zero = identical_zero.max(10f64.powf((value.abs() + ABS_ERR).log10().ceil()));
        let cohort_end = stages.force_cohort_end(y_new);

        log.line(
            4,
            format_args!(
                "{:<14}{:3}: T = {:15.8}     dt = {:12.7e}",
                "Step to event",
                index,
                y[0],
                step * fraction
            ),
        );
        if log.enabled(2) || (log.enabled(1) && value.abs() >= identical_zero) {
            let label = if cohort_end { "Cohort closed:" } else { "Event located:" };
            let mut stars = String::new();
            if value.abs() >= identical_zero {
                let level = (value.abs() / identical_zero).log10().ceil().max(0.0) as usize;
                stars.push(' ');
                stars.push_str(&"*".repeat(level));
            }
            log.line(
                1,
                format_args!(
                    "{:<18} T = {:15.8}  Value = {:12.7e}{}",
                    label, y_new[0], value, stars
                ),
            );
        }

        Some(LocatedEvent {
            index,
            fraction,
            time: y_new[0],
            value,
            equal_to_zero,
            cohort_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{DerivativeView, StateView, Staging, SystemLayout};
    use crate::population::SystemState;
    use crate::traits::CohortModel;

    /// Two environment variables: time and x, with an event at x = 50.
    struct Threshold {
        closes: bool,
    }

    impl CohortModel for Threshold {
        fn gradient(&mut self, _state: &StateView<'_>, derivative: &mut DerivativeView<'_>, _staging: &Staging) {
            derivative.environment_mut()[1] = 100.0;
        }

        fn event_count(&self) -> usize {
            2
        }

        fn event_location(&mut self, state: &StateView<'_>, _staging: &Staging, indicators: &mut [f64]) {
            indicators[0] = state.environment()[1] - 50.0;
        }

        fn force_cohort_end(&mut self, _state: &StateView<'_>, _staging: &Staging) -> bool {
            self.closes
        }
    }

    /// Linear interpolation between two fixed states.
    struct Linear {
        from: Vec<f64>,
        to: Vec<f64>,
    }

    impl DenseOutput for Linear {
        fn interpolate(&self, theta: f64, out: &mut [f64]) {
            for i in 0..out.len() {
                out[i] = self.from[i] + theta * (self.to[i] - self.from[i]);
            }
        }
    }

    #[test]
    fn locates_linear_crossing_and_honours_closure() {
        let system = SystemState::new(vec![0.0, 20.0]);
        let layout = SystemLayout::from_state(&system);
        let staging = Staging::from_state(&system);
        let mut model = Threshold { closes: true };
        let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
        let mut tracker = EventTracker::new(2);
        let mut log = DebugLog::new(0);

        let y = vec![0.0, 20.0];
        let mut y_new = vec![0.5, 70.0];
        let mut scratch = vec![0.0; 2];
        tracker.start_step(&mut stages, &y);
        assert_eq!(tracker.detect(&mut stages, &y_new, 1.0e-10), 1);

        let dense = Linear {
            from: y.clone(),
            to: y_new.clone(),
        };
        let event = tracker
            .locate(&mut stages, &dense, &y, &mut y_new, &mut scratch, 0.5, 1.0e-10, &mut log)
            .expect("event located");
        assert_eq!(event.index, 0);
        assert!((event.fraction - 0.6).abs() < 1e-10);
        assert!((event.time - 0.3).abs() < 1e-10);
        assert!((y_new[1] - 50.0).abs() < 1e-8);
        assert!(event.cohort_end);
        assert!(event.equal_to_zero >= 1.0e-10);
        assert_eq!(tracker.located(), &[true, false]);
    }

    #[test]
    fn located_event_is_not_relocated_without_change() {
        let system = SystemState::new(vec![0.0, 20.0]);
        let layout = SystemLayout::from_state(&system);
        let staging = Staging::from_state(&system);
        let mut model = Threshold { closes: false };
        let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
        let mut tracker = EventTracker::new(2);

        // Pretend the previous step stopped exactly on the threshold.
        tracker.located[0] = true;
        tracker.new[0] = 0.0;
        tracker.start_step(&mut stages, &[0.3, 50.0]);
        assert_eq!(tracker.detect(&mut stages, &[0.4, 60.0], 1.0e-10), 0);
    }

    #[test]
    fn disabled_slots_never_fire() {
        let system = SystemState::new(vec![0.0, 20.0]);
        let layout = SystemLayout::from_state(&system);
        let staging = Staging::from_state(&system);
        let mut model = Threshold { closes: false };
        let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
        let mut tracker = EventTracker::new(2);
        tracker.start_step(&mut stages, &[0.0, 20.0]);
        tracker.detect(&mut stages, &[0.1, 30.0], 1.0e-10);
        assert_eq!(tracker.new_values()[1], crate::constants::NO_EVENT);
        assert!(!tracker.pending[1]);
    }
}
