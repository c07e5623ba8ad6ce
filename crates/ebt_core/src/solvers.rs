//! Integration methods.
//!
//! Every method implements [`Integrator`]: a single attempted step from `y`
//! into `y_new`, reporting acceptance or the step to retry with. Clamping,
//! the retry bound, event location and output sampling live in the driver.

mod cash_karp;
mod dopri5;
mod dopri8;
mod radau5;
mod rk2;
mod rk4;
mod rkf45;

pub use cash_karp::CashKarp;
pub use dopri5::Dopri5;
pub use dopri8::Dopri8;
pub use radau5::Radau5;
pub use rk2::Rk2;
pub use rk4::Rk4;
pub use rkf45::Rkf45;

use serde::{Deserialize, Serialize};

use crate::diagnostics::DebugLog;
use crate::error::Result;
use crate::events::DenseOutput;
use crate::settings::IntegrationMethod;
use crate::stage::StageEvaluator;

/// Step-size controller state shared by all methods; persists across steps
/// and cohort cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepControl {
    /// Working step proposed for the next call.
    pub step_size: f64,
    /// Set while retrying within one driver call; suppresses growth.
    pub step_failed: bool,
    pub accepted_steps: usize,
}

impl StepControl {
    pub fn new(step_size: f64) -> Self {
        Self {
            step_size,
            step_failed: false,
            accepted_steps: 0,
        }
    }
}

/// Counters reported by the methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStatistics {
    pub function_evaluations: usize,
    pub jacobians: usize,
    pub decompositions: usize,
    pub solves: usize,
    pub singularities: usize,
    pub accepted: usize,
    pub rejected: usize,
}

/// Everything an attempt needs besides its own buffers.
pub struct StepContext<'s, 'm> {
    pub stages: &'s mut StageEvaluator<'m>,
    pub log: &'s mut DebugLog,
    pub accuracy: f64,
    pub cohort_limit: f64,
    /// False when the step was clamped to the boundary; no growth then.
    pub adjust: bool,
    /// Retries already made within this driver call.
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Accepted,
    Rejected { next_step: f64 },
}

pub trait Integrator {
    fn method(&self) -> IntegrationMethod;

    /// Size internal buffers for a cycle of `size` values.
    fn prepare_cycle(&mut self, size: usize, control: &mut StepControl) -> Result<()>;

    /// Attempt one step of length `h`, writing the end state into `y_new`.
    /// On acceptance the controller in `control` has been updated.
    fn attempt(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        control: &mut StepControl,
        y: &[f64],
        y_new: &mut [f64],
        h: f64,
    ) -> Result<StepOutcome>;

    /// Bookkeeping after the driver has recorded an accepted step.
    fn after_accept(
        &mut self,
        _ctx: &mut StepContext<'_, '_>,
        _control: &StepControl,
        _y: &[f64],
        _y_new: &[f64],
        _h: f64,
    ) {
    }

    /// Interpolant for the step just accepted, if the method has one.
    fn dense_output(
        &mut self,
        _ctx: &mut StepContext<'_, '_>,
        _y: &[f64],
        _y_new: &[f64],
        _h: f64,
    ) -> Option<&dyn DenseOutput> {
        None
    }

    fn statistics(&self) -> SolverStatistics {
        SolverStatistics::default()
    }
}

/// The configured method, dispatched without boxing.
pub enum Solver {
    Rk2(Rk2),
    Rk4(Rk4),
    Rkf45(Rkf45),
    CashKarp(CashKarp),
    Dopri5(Dopri5),
    Dopri8(Dopri8),
    Radau5(Radau5),
}

impl Solver {
    pub fn build(method: IntegrationMethod) -> Self {
        match method {
            IntegrationMethod::Rk2 => Solver::Rk2(Rk2::new()),
            IntegrationMethod::Rk4 => Solver::Rk4(Rk4::new()),
            IntegrationMethod::Rkf45 => Solver::Rkf45(Rkf45::new()),
            IntegrationMethod::CashKarp => Solver::CashKarp(CashKarp::new()),
            IntegrationMethod::Dopri5 => Solver::Dopri5(Dopri5::new()),
            IntegrationMethod::Dopri8 => Solver::Dopri8(Dopri8::new()),
            IntegrationMethod::Radau5 => Solver::Radau5(Radau5::new()),
        }
    }

    fn inner(&self) -> &dyn Integrator {
        match self {
            Solver::Rk2(s) => s,
            Solver::Rk4(s) => s,
            Solver::Rkf45(s) => s,
            Solver::CashKarp(s) => s,
            Solver::Dopri5(s) => s,
            Solver::Dopri8(s) => s,
            Solver::Radau5(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Integrator {
        match self {
            Solver::Rk2(s) => s,
            Solver::Rk4(s) => s,
            Solver::Rkf45(s) => s,
            Solver::CashKarp(s) => s,
            Solver::Dopri5(s) => s,
            Solver::Dopri8(s) => s,
            Solver::Radau5(s) => s,
        }
    }
}

impl Integrator for Solver {
    fn method(&self) -> IntegrationMethod {
        self.inner().method()
    }

    fn prepare_cycle(&mut self, size: usize, control: &mut StepControl) -> Result<()> {
        self.inner_mut().prepare_cycle(size, control)
    }

    fn attempt(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        control: &mut StepControl,
        y: &[f64],
        y_new: &mut [f64],
        h: f64,
    ) -> Result<StepOutcome> {
        self.inner_mut().attempt(ctx, control, y, y_new, h)
    }

    fn after_accept(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        control: &StepControl,
        y: &[f64],
        y_new: &[f64],
        h: f64,
    ) {
        self.inner_mut().after_accept(ctx, control, y, y_new, h)
    }

    fn dense_output(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        y: &[f64],
        y_new: &[f64],
        h: f64,
    ) -> Option<&dyn DenseOutput> {
        self.inner_mut().dense_output(ctx, y, y_new, h)
    }

    fn statistics(&self) -> SolverStatistics {
        self.inner().statistics()
    }
}

/// Step actually attempted when `remaining` is left before the boundary.
///
/// Looks two steps ahead: if fewer than two requested steps fit, take half
/// the remaining distance (or all of it if even one step does not fit) and
/// report that growth must be suppressed.
pub fn clamp_step(requested: f64, remaining: f64) -> (f64, bool) {
    if remaining < 2.0 * requested {
        if remaining < requested {
            (remaining, false)
        } else {
            (0.5 * remaining, false)
        }
    } else {
        (requested, true)
    }
}

/// Scaled RMS of `err` against `ABS_ERR + accuracy * max(|y|, |y_new|)`.
/// Returns the norm and the index and share of the largest contribution.
pub(crate) fn rms_error_norm(err: &[f64], y: &[f64], y_new: &[f64], accuracy: f64) -> (f64, usize, f64) {
    let n = err.len();
    let mut sum = 0.0;
    let mut largest = 0.0;
    let mut largest_at = 0;
    for i in 0..n {
        let sk = crate::constants::ABS_ERR + accuracy * y[i].abs().max(y_new[i].abs());
        let scaled = err[i] / sk;
        if scaled > largest {
            largest = scaled;
            largest_at = i;
        }
        sum += scaled * scaled;
    }
    let share = if sum > 0.0 { largest * largest / sum } else { 0.0 };
    ((sum / n as f64).sqrt(), largest_at, share)
}

/// Watts & Shampine relative error used by the Fehlberg-type pairs.
pub(crate) fn relative_max_error(err: &[f64], y: &[f64], y_new: &[f64], accuracy: f64, h: f64) -> (f64, usize) {
    let abs_err = 2.0e-13 / accuracy;
    let mut errmax = 0.0;
    let mut at = 0;
    for i in 0..err.len() {
        let e = err[i].abs() / (y[i].abs() + y_new[i].abs() + abs_err);
        if e > errmax {
            errmax = e;
            at = i;
        }
    }
    (errmax * 2.0 * h / accuracy, at)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_looks_two_steps_ahead() {
        assert_eq!(clamp_step(0.1, 1.0), (0.1, true));
        assert_eq!(clamp_step(0.4, 0.6), (0.3, false));
        assert_eq!(clamp_step(0.4, 0.3), (0.3, false));
        assert_eq!(clamp_step(0.5, 1.0), (0.5, true));
    }

    #[test]
    fn relative_error_scales_by_step_over_accuracy() {
        let err = [0.0, 1.0e-8, 3.0e-9];
        let y = [0.0, 1.0, 0.5];
        let y_new = [0.1, 1.0, 0.5];
        let (errmax, at) = relative_max_error(&err, &y, &y_new, 1.0e-6, 0.1);
        assert_eq!(at, 1);
        let expected = 1.0e-8 / (2.0 + 2.0e-7) * 2.0 * 0.1 / 1.0e-6;
        assert!((errmax - expected).abs() < 1e-15, "errmax = {errmax}");
        assert!((errmax - 1.0e-3).abs() < 1e-9);

        // Vanishing states fall back to the absolute floor.
        let (floor, _) = relative_max_error(&[1.0e-12], &[0.0], &[0.0], 1.0e-6, 0.5);
        assert!((floor - 1.0e-12 / 2.0e-7 / 1.0e-6).abs() < 1e-9);
    }

    #[test]
    fn rms_norm_reports_largest_contribution() {
        let (norm, at, share) = rms_error_norm(&[0.0, 3.0e-6, 4.0e-6], &[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0], 1.0e-6);
        let sk = crate::constants::ABS_ERR + 1.0e-6;
        let expected = ((9.0e-12 + 16.0e-12) / (sk * sk) / 3.0).sqrt();
        assert!((norm - expected).abs() < 1e-12);
        assert_eq!(at, 2);
        assert!((share - 16.0 / 25.0).abs() < 1e-12);
    }

    #[test]
    fn built_solvers_report_their_method() {
        for method in [
            IntegrationMethod::Rk2,
            IntegrationMethod::Rk4,
            IntegrationMethod::Rkf45,
            IntegrationMethod::CashKarp,
            IntegrationMethod::Dopri5,
            IntegrationMethod::Dopri8,
            IntegrationMethod::Radau5,
        ] {
            assert_eq!(Solver::build(method).method(), method);
        }
    }
}
