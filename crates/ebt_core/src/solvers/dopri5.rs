use crate::constants::LARGEST_STEP;
use crate::error::Result;
use crate::events::DenseOutput;
use crate::layout::grow_buffers;
use crate::settings::IntegrationMethod;

use super::{rms_error_norm, Integrator, StepContext, StepControl, StepOutcome};

// Dormand-Prince 5(4) tableau.
const A21: f64 = 0.2;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const A71: f64 = 35.0 / 384.0;
const A73: f64 = 500.0 / 1113.0;
const A74: f64 = 125.0 / 192.0;
const A75: f64 = -2187.0 / 6784.0;
const A76: f64 = 11.0 / 84.0;

// Dense output.
const D1: f64 = -12715105075.0 / 11282082432.0;
const D3: f64 = 87487479700.0 / 32700410799.0;
const D4: f64 = -10690763975.0 / 1880347072.0;
const D5: f64 = 701980252875.0 / 199316789632.0;
const D6: f64 = -1453857185.0 / 822651844.0;
const D7: f64 = 69997945.0 / 29380423.0;

// Error estimate.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const BETA: f64 = 0.1;
const FACC1: f64 = 5.0;
const FACC2: f64 = 0.1;
const SAFETY: f64 = 0.9;
const FACOLD: f64 = 1.0e-4;
const NSTIFF: usize = 1000;
const STIFF_THRESHOLD: f64 = 3.25;

/// Quartic continuous extension of a Dormand-Prince 5(4) step.
#[derive(Debug, Default)]
pub struct Dopri5Dense {
    rcont: [Vec<f64>; 5],
}

impl DenseOutput for Dopri5Dense {
    fn interpolate(&self, theta: f64, out: &mut [f64]) {
        let theta1 = 1.0 - theta;
        let [r1, r2, r3, r4, r5] = &self.rcont;
        for i in 0..out.len() {
            out[i] = r1[i] + theta * (r2[i] + theta1 * (r3[i] + theta * (r4[i] + theta1 * r5[i])));
        }
    }
}

/// Stiffness detection state shared by the Dormand-Prince methods.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StiffnessMonitor {
    hlamb: f64,
    iasti: usize,
    nonsti: usize,
}

impl StiffnessMonitor {
    pub(crate) fn due(&self, accepted_steps: usize) -> bool {
        accepted_steps % NSTIFF == 0 || self.iasti > 0
    }

    /// Feed one estimate of `h * |lambda|`; true when the problem has just
    /// been judged stiff.
    pub(crate) fn observe(&mut self, h: f64, stnum: f64, stden: f64, threshold: f64) -> bool {
        if stden > 0.0 {
            self.hlamb = h * (stnum / stden).sqrt();
        }
        if self.hlamb > threshold {
            self.nonsti = 0;
            self.iasti += 1;
            self.iasti == 15
        } else {
            self.nonsti += 1;
            if self.nonsti == 6 {
                self.iasti = 0;
            }
            false
        }
    }
}

/// Dormand-Prince 5(4) with Lund-stabilized step control and dense output.
#[derive(Debug)]
pub struct Dopri5 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    err: Vec<f64>,
    ysti: Vec<f64>,
    dense: Dopri5Dense,
    k1_valid: bool,
    facold: f64,
    stiffness: StiffnessMonitor,
}

impl Default for Dopri5 {
    fn default() -> Self {
        Self {
            k1: Vec::new(),
            k2: Vec::new(),
            k3: Vec::new(),
            k4: Vec::new(),
            k5: Vec::new(),
            k6: Vec::new(),
            err: Vec::new(),
            ysti: Vec::new(),
            dense: Dopri5Dense::default(),
            k1_valid: false,
            facold: FACOLD,
            stiffness: StiffnessMonitor::default(),
        }
    }
}

impl Dopri5 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Dopri5 {
    fn method(&self) -> IntegrationMethod {
        IntegrationMethod::Dopri5
    }

    fn prepare_cycle(&mut self, size: usize, _control: &mut StepControl) -> Result<()> {
        self.k1_valid = false;
        let [r1, r2, r3, r4, r5] = &mut self.dense.rcont;
        grow_buffers(
            [
                &mut self.k1,
                &mut self.k2,
                &mut self.k3,
                &mut self.k4,
                &mut self.k5,
                &mut self.k6,
                &mut self.err,
                &mut self.ysti,
                r1,
                r2,
                r3,
                r4,
                r5,
            ],
            size,
        )
    }

    fn attempt(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        control: &mut StepControl,
        y: &[f64],
        y_new: &mut [f64],
        h: f64,
    ) -> Result<StepOutcome> {
        let n = y.len();

        if ctx.depth == 0 || !self.k1_valid {
            ctx.stages.gradient(1, y, &mut self.k1);
            self.k1_valid = true;
        }

        for i in 0..n {
            y_new[i] = y[i] + h * A21 * self.k1[i];
        }
        ctx.stages.gradient(2, y_new, &mut self.k2);

        for i in 0..n {
            y_new[i] = y[i] + h * (A31 * self.k1[i] + A32 * self.k2[i]);
        }
        ctx.stages.gradient(3, y_new, &mut self.k3);

        for i in 0..n {
            y_new[i] = y[i] + h * (A41 * self.k1[i] + A42 * self.k2[i] + A43 * self.k3[i]);
        }
        ctx.stages.gradient(4, y_new, &mut self.k4);

        for i in 0..n {
            y_new[i] = y[i]
                + h * (A51 * self.k1[i] + A52 * self.k2[i] + A53 * self.k3[i] + A54 * self.k4[i]);
        }
        ctx.stages.gradient(5, y_new, &mut self.k5);

        for i in 0..n {
            self.ysti[i] = y[i]
                + h * (A61 * self.k1[i]
                    + A62 * self.k2[i]
                    + A63 * self.k3[i]
                    + A64 * self.k4[i]
                    + A65 * self.k5[i]);
        }
        ctx.stages.gradient(6, &self.ysti, &mut self.k6);

        for i in 0..n {
            y_new[i] = y[i]
                + h * (A71 * self.k1[i]
                    + A73 * self.k3[i]
                    + A74 * self.k4[i]
                    + A75 * self.k5[i]
                    + A76 * self.k6[i]);
        }
        // Stage 7 is f(y_new); k2 is free again.
        ctx.stages.gradient(7, y_new, &mut self.k2);

        let r5 = &mut self.dense.rcont[4];
        for i in 0..n {
            r5[i] = h
                * (D1 * self.k1[i]
                    + D3 * self.k3[i]
                    + D4 * self.k4[i]
                    + D5 * self.k5[i]
                    + D6 * self.k6[i]
                    + D7 * self.k2[i]);
            self.err[i] = h
                * (E1 * self.k1[i]
                    + E3 * self.k3[i]
                    + E4 * self.k4[i]
                    + E5 * self.k5[i]
                    + E6 * self.k6[i]
                    + E7 * self.k2[i]);
        }

        let (err, largest_at, share) = rms_error_norm(&self.err[..n], y, y_new, ctx.accuracy);
        let fac11 = err.powf(0.2 - BETA * 0.75);

        if err > 1.0 {
            let detail = format!(
                "Largest error contribution in ODE #{} ({:.3}%)",
                largest_at,
                100.0 * share
            );
            ctx.log.step_failed(y[0], h, ctx.depth, Some(&detail));
            let next_step = h / FACC1.min(fac11 / SAFETY);
            return Ok(StepOutcome::Rejected { next_step });
        }

        // Lund stabilization: FACC2 <= h / hnew <= FACC1, no growth right after a failure.
        if ctx.adjust && !control.step_failed {
            let fac = fac11 / self.facold.powf(BETA);
            let fac = FACC2.max(FACC1.min(fac / SAFETY));
            let hnew = h / fac;
            self.facold = err.max(FACOLD);
            control.step_size = hnew.min(ctx.cohort_limit).min(LARGEST_STEP);
        }
        self.k1_valid = false;
        Ok(StepOutcome::Accepted)
    }

    fn after_accept(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        control: &StepControl,
        y: &[f64],
        y_new: &[f64],
        h: f64,
    ) {
        if !ctx.log.enabled(1) || !self.stiffness.due(control.accepted_steps) {
            return;
        }
        let mut stnum = 0.0;
        let mut stden = 0.0;
        for i in 0..y.len() {
            let d = self.k2[i] - self.k6[i];
            stnum += d * d;
            let d = y_new[i] - self.ysti[i];
            stden += d * d;
        }
        if self.stiffness.observe(h, stnum, stden, STIFF_THRESHOLD) {
            ctx.log.becoming_stiff(y[0]);
        }
    }

    fn dense_output(
        &mut self,
        _ctx: &mut StepContext<'_, '_>,
        y: &[f64],
        y_new: &[f64],
        h: f64,
    ) -> Option<&dyn DenseOutput> {
        let [r1, r2, r3, r4, _] = &mut self.dense.rcont;
        for i in 0..y.len() {
            let ydiff = y_new[i] - y[i];
            let bspl = h * self.k1[i] - ydiff;
            r1[i] = y[i];
            r2[i] = ydiff;
            r3[i] = bspl;
            r4[i] = -h * self.k2[i] + ydiff - bspl;
        }
        Some(&self.dense)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DebugLog;
    use crate::solvers::test_support::{single_cohort, Exponential};
    use crate::stage::StageEvaluator;

    #[test]
    fn dense_output_reproduces_step_endpoints() {
        let (_system, layout, staging) = single_cohort(100.0);
        let mut model = Exponential { rate: -1.0 };
        let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
        let mut log = DebugLog::default();
        let mut ctx = StepContext {
            stages: &mut stages,
            log: &mut log,
            accuracy: 1.0e-6,
            cohort_limit: 1.0,
            adjust: true,
            depth: 0,
        };
        let mut solver = Dopri5::new();
        let mut control = StepControl::new(0.1);
        solver.prepare_cycle(2, &mut control).expect("buffers");
        let y = [0.0, 100.0];
        let mut y_new = [0.0; 2];
        let outcome = solver.attempt(&mut ctx, &mut control, &y, &mut y_new, 0.1).expect("step");
        assert_eq!(outcome, StepOutcome::Accepted);

        let dense = solver.dense_output(&mut ctx, &y, &y_new, 0.1).expect("dense output");
        let mut sample = [0.0; 2];
        dense.interpolate(0.0, &mut sample);
        assert!((sample[1] - 100.0).abs() < 1e-10 * 100.0);
        dense.interpolate(1.0, &mut sample);
        assert!((sample[1] - y_new[1]).abs() < 1e-10 * 100.0);
        dense.interpolate(0.5, &mut sample);
        assert!((sample[0] - 0.05).abs() < 1e-12);
        assert!((sample[1] - 100.0 * (-0.05f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn accepted_step_is_deterministic() {
        let run = || {
            let (_system, layout, staging) = single_cohort(100.0);
            let mut model = Exponential { rate: -2.0 };
            let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
            let mut log = DebugLog::default();
            let mut ctx = StepContext {
                stages: &mut stages,
                log: &mut log,
                accuracy: 1.0e-6,
                cohort_limit: 1.0,
                adjust: true,
                depth: 0,
            };
            let mut solver = Dopri5::new();
            let mut control = StepControl::new(0.05);
            solver.prepare_cycle(2, &mut control).expect("buffers");
            let y = [0.0, 100.0];
            let mut y_new = [0.0; 2];
            solver.attempt(&mut ctx, &mut control, &y, &mut y_new, 0.05).expect("step");
            (y_new, control.step_size)
        };
        let (first_state, first_step) = run();
        let (second_state, second_step) = run();
        assert_eq!(first_state, second_state);
        assert_eq!(first_step.to_bits(), second_step.to_bits());
    }

    #[test]
    fn error_norm_matches_scaled_residual() {
        let (_system, layout, staging) = single_cohort(1.0);
        let mut model = Exponential { rate: -3.0 };
        let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
        let mut log = DebugLog::default();
        let mut ctx = StepContext {
            stages: &mut stages,
            log: &mut log,
            accuracy: 1.0e-8,
            cohort_limit: 1.0,
            adjust: true,
            depth: 0,
        };
        let mut solver = Dopri5::new();
        let mut control = StepControl::new(0.2);
        solver.prepare_cycle(2, &mut control).expect("buffers");
        let y = [0.0, 1.0];
        let mut y_new = [0.0; 2];
        solver.attempt(&mut ctx, &mut control, &y, &mut y_new, 0.2).expect("step");

        let mut sum = 0.0;
        for i in 0..2 {
            let sk = crate::constants::ABS_ERR + 1.0e-8 * y[i].abs().max(y_new[i].abs());
            sum += (solver.err[i] / sk).powi(2);
        }
        let (norm, _, _) = rms_error_norm(&solver.err, &y, &y_new, 1.0e-8);
        assert!((norm - (sum / 2.0).sqrt()).abs() <= 1e-12 * norm.max(1.0));
        // The time component integrates exactly.
        assert!(solver.err[0].abs() < 1e-15);
    }

    #[test]
    fn stiffness_monitor_reports_after_fifteen_hits() {
        let mut monitor = StiffnessMonitor::default();
        assert!(monitor.due(1000));
        assert!(!monitor.due(999));
        let mut reported = 0;
        for _ in 0..20 {
            if monitor.observe(1.0, 16.0, 1.0, STIFF_THRESHOLD) {
                reported += 1;
            }
        }
        assert_eq!(reported, 1);
        assert_eq!(monitor.iasti, 20);
        for _ in 0..6 {
            monitor.observe(1.0, 1.0, 1.0, STIFF_THRESHOLD);
        }
        assert_eq!(monitor.iasti, 0);
    }
}
