use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Integration scheme used for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum IntegrationMethod {
    Rk2,
    Rk4,
    Rkf45,
    #[default]
    #[serde(rename = "RKCK")]
    CashKarp,
    Dopri5,
    Dopri8,
    Radau5,
}

impl IntegrationMethod {
    /// True for the methods that construct a dense-output interpolant.
    pub fn has_dense_output(self) -> bool {
        matches!(
            self,
            IntegrationMethod::Dopri5 | IntegrationMethod::Dopri8 | IntegrationMethod::Radau5
        )
    }

    /// Fixed-step methods take `accuracy` as their step length.
    pub fn is_fixed_step(self) -> bool {
        matches!(self, IntegrationMethod::Rk2 | IntegrationMethod::Rk4)
    }

    /// Method actually used for a model: event location needs dense output,
    /// so models with events are promoted to Dopri5.
    pub fn resolve(self, event_count: usize) -> IntegrationMethod {
        if event_count > 0 && !self.has_dense_output() {
            IntegrationMethod::Dopri5
        } else {
            self
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IntegrationMethod::Rk2 => "RK2",
            IntegrationMethod::Rk4 => "RK4",
            IntegrationMethod::Rkf45 => "RKF45",
            IntegrationMethod::CashKarp => "RKCK",
            IntegrationMethod::Dopri5 => "DOPRI5",
            IntegrationMethod::Dopri8 => "DOPRI8",
            IntegrationMethod::Radau5 => "RADAU5",
        }
    }
}

/// Run-level integration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub method: IntegrationMethod,
    /// Relative tolerance; the step length for fixed-step methods.
    pub accuracy: f64,
    /// Maximum step and cohort cycle length.
    pub cohort_limit: f64,
    /// Values closer than this are treated as identical.
    pub identical_zero: f64,
    /// Seed for the working step. Non-positive values leave the seeding to
    /// the cohort cycle loop.
    pub initial_step: f64,
    /// Interval for regular output; non-positive disables intermediate sampling.
    pub output_interval: f64,
    /// Interval for full state output; non-positive disables it.
    pub state_output_interval: f64,
    /// 0 disables the diagnostic log, 4 is the most verbose.
    pub debug_level: u8,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::default(),
            accuracy: 1.0e-6,
            cohort_limit: 1.0,
            identical_zero: 1.0e-10,
            initial_step: 0.0,
            output_interval: 0.0,
            state_output_interval: 0.0,
            debug_level: 0,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.accuracy.is_finite() && self.accuracy > 0.0) {
            bail!("Accuracy must be a positive finite number, got {}.", self.accuracy);
        }
        if !(self.cohort_limit.is_finite() && self.cohort_limit > 0.0) {
            bail!(
                "Cohort limit must be a positive finite number, got {}.",
                self.cohort_limit
            );
        }
        if !(self.identical_zero.is_finite() && self.identical_zero > 0.0) {
            bail!(
                "Identical-zero threshold must be positive, got {}.",
                self.identical_zero
            );
        }
        if !self.initial_step.is_finite() {
            bail!("Initial step must be finite.");
        }
        if !(self.output_interval.is_finite() && self.state_output_interval.is_finite()) {
            bail!("Output intervals must be finite.");
        }
        if self.debug_level > 4 {
            bail!("Debug level must be between 0 and 4, got {}.", self.debug_level);
        }
        Ok(())
    }
}

/// Times at which output collaborators fire between step boundaries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSchedule {
    pub next_output: f64,
    pub output_interval: f64,
    pub next_state_output: f64,
    pub state_output_interval: f64,
}

impl OutputSchedule {
    /// Schedule starting after `start`; disabled streams never become due.
    pub fn starting_at(start: f64, settings: &IntegratorSettings) -> Self {
        let next = |interval: f64| {
            if interval > 0.0 {
                start + interval
            } else {
                f64::INFINITY
            }
        };
        Self {
            next_output: next(settings.output_interval),
            output_interval: settings.output_interval,
            next_state_output: next(settings.state_output_interval),
            state_output_interval: settings.state_output_interval,
        }
    }

    /// Move streams that fell behind `time` to their first scheduled time
    /// not before it.
    pub fn catch_up(&mut self, time: f64) {
        if self.output_interval > 0.0 && self.next_output < time {
            let missed = ((time - self.next_output) / self.output_interval).ceil();
            self.next_output += missed * self.output_interval;
        }
        if self.state_output_interval > 0.0 && self.next_state_output < time {
            let missed = ((time - self.next_state_output) / self.state_output_interval).ceil();
            self.next_state_output += missed * self.state_output_interval;
        }
    }

    pub fn output_due(&self, time: f64, identical_zero: f64) -> bool {
        self.output_interval > 0.0 && self.next_output < time - identical_zero
    }

    pub fn state_output_due(&self, time: f64, identical_zero: f64) -> bool {
        self.state_output_interval > 0.0 && self.next_state_output < time - identical_zero
    }

    pub fn any_due(&self, time: f64, identical_zero: f64) -> bool {
        self.output_due(time, identical_zero) || self.state_output_due(time, identical_zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_err_contains(result: Result<()>, needle: &str) {
        let err = result.expect_err("expected validation failure");
        let msg = format!("{err}");
        assert!(msg.contains(needle), "unexpected error: {msg}");
    }

    #[test]
    fn defaults_are_valid() {
        let settings = IntegratorSettings::default();
        settings.validate().expect("defaults should validate");
        assert_eq!(settings.method, IntegrationMethod::CashKarp);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut settings = IntegratorSettings::default();
        settings.accuracy = 0.0;
        assert_err_contains(settings.validate(), "Accuracy");

        let mut settings = IntegratorSettings::default();
        settings.cohort_limit = f64::NAN;
        assert_err_contains(settings.validate(), "Cohort limit");

        let mut settings = IntegratorSettings::default();
        settings.debug_level = 9;
        assert_err_contains(settings.validate(), "Debug level");
    }

    #[test]
    fn events_promote_methods_without_dense_output() {
        assert_eq!(IntegrationMethod::Rk4.resolve(1), IntegrationMethod::Dopri5);
        assert_eq!(IntegrationMethod::CashKarp.resolve(0), IntegrationMethod::CashKarp);
        assert_eq!(IntegrationMethod::Radau5.resolve(2), IntegrationMethod::Radau5);
    }

    #[test]
    fn schedule_due_only_strictly_inside() {
        let settings = IntegratorSettings {
            output_interval: 0.25,
            ..IntegratorSettings::default()
        };
        let schedule = OutputSchedule::starting_at(0.0, &settings);
        assert!(!schedule.output_due(0.25, 1.0e-10));
        assert!(schedule.output_due(0.3, 1.0e-10));
        assert!(!schedule.state_output_due(10.0, 1.0e-10));
    }

    #[test]
    fn catch_up_skips_times_already_passed() {
        let settings = IntegratorSettings {
            output_interval: 0.5,
            state_output_interval: 2.0,
            ..IntegratorSettings::default()
        };
        let mut schedule = OutputSchedule::starting_at(0.0, &settings);
        schedule.catch_up(5.2);
        assert_eq!(schedule.next_output, 5.5);
        assert_eq!(schedule.next_state_output, 6.0);

        // Streams already ahead stay put.
        schedule.catch_up(1.0);
        assert_eq!(schedule.next_output, 5.5);

        let mut disabled = OutputSchedule::starting_at(0.0, &IntegratorSettings::default());
        disabled.catch_up(5.0);
        assert_eq!(disabled.next_output, f64::INFINITY);
    }
}
