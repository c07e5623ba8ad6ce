use crate::error::Result;
use crate::layout::grow_buffers;
use crate::settings::IntegrationMethod;

use super::{relative_max_error, Integrator, StepContext, StepControl, StepOutcome};

// Runge-Kutta-Fehlberg 4(5) tableau.
const B11: f64 = 1.0 / 4.0;
const B21: f64 = 3.0 / 32.0;
const B22: f64 = 9.0 / 32.0;
const B31: f64 = 1932.0 / 2197.0;
const B32: f64 = -7200.0 / 2197.0;
const B33: f64 = 7296.0 / 2197.0;
const B41: f64 = 8341.0 / 4104.0;
const B42: f64 = -32832.0 / 4104.0;
const B43: f64 = 29440.0 / 4104.0;
const B44: f64 = -845.0 / 4104.0;
const B51: f64 = -6080.0 / 20520.0;
const B52: f64 = 41040.0 / 20520.0;
const B53: f64 = -28352.0 / 20520.0;
const B54: f64 = 9295.0 / 20520.0;
const B55: f64 = -5643.0 / 20520.0;
// Fourth order weights.
const B61: f64 = 2375.0 / 20520.0;
const B63: f64 = 11264.0 / 20520.0;
const B64: f64 = 10985.0 / 20520.0;
const B65: f64 = -4104.0 / 20520.0;
// Fifth order weights.
const B71: f64 = 902880.0 / 7618050.0;
const B73: f64 = 3953664.0 / 7618050.0;
const B74: f64 = 3855735.0 / 7618050.0;
const B75: f64 = -1371249.0 / 7618050.0;
const B76: f64 = 277020.0 / 7618050.0;

const SAFETY: f64 = 0.9;
const PSHRINK: f64 = -0.2;
const PGROW: f64 = -0.2;

/// Shrink factor for a rejected step of a Fehlberg-type pair.
pub(crate) fn shrink_factor(errmax: f64, exponent: f64) -> f64 {
    if errmax < 59049.0 {
        (SAFETY * errmax.powf(exponent)).max(0.1)
    } else {
        0.1
    }
}

/// Growth factor after an accepted step, at most 5.
pub(crate) fn growth_factor(errmax: f64) -> f64 {
    if errmax > 1.889568e-4 {
        (SAFETY * errmax.powf(PGROW)).min(5.0)
    } else {
        5.0
    }
}

/// Embedded Runge-Kutta-Fehlberg 4(5) with Watts & Shampine step control.
#[derive(Debug, Default)]
pub struct Rkf45 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    err: Vec<f64>,
    k1_valid: bool,
}

impl Rkf45 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Rkf45 {
    fn method(&self) -> IntegrationMethod {
        IntegrationMethod::Rkf45
    }

    fn prepare_cycle(&mut self, size: usize, _control: &mut StepControl) -> Result<()> {
        self.k1_valid = false;
        grow_buffers(
            [
                &mut self.k1,
                &mut self.k2,
                &mut self.k3,
                &mut self.k4,
                &mut self.k5,
                &mut self.k6,
                &mut self.err,
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
            y_new[i] = y[i] + h * B11 * self.k1[i];
        }
        ctx.stages.gradient(2, y_new, &mut self.k2);

        for i in 0..n {
            y_new[i] = y[i] + h * (B21 * self.k1[i] + B22 * self.k2[i]);
        }
        ctx.stages.gradient(3, y_new, &mut self.k3);

        for i in 0..n {
            y_new[i] = y[i] + h * (B31 * self.k1[i] + B32 * self.k2[i] + B33 * self.k3[i]);
        }
        ctx.stages.gradient(4, y_new, &mut self.k4);

        for i in 0..n {
            y_new[i] = y[i]
                + h * (B41 * self.k1[i] + B42 * self.k2[i] + B43 * self.k3[i] + B44 * self.k4[i]);
        }
        ctx.stages.gradient(5, y_new, &mut self.k5);

        for i in 0..n {
            y_new[i] = y[i]
                + h * (B51 * self.k1[i]
                    + B52 * self.k2[i]
                    + B53 * self.k3[i]
                    + B54 * self.k4[i]
                    + B55 * self.k5[i]);
        }
        ctx.stages.gradient(6, y_new, &mut self.k6);

        // Fifth order solution, and its difference from the fourth order one.
        for i in 0..n {
            y_new[i] = y[i]
                + h * (B71 * self.k1[i]
                    + B73 * self.k3[i]
                    + B74 * self.k4[i]
                    + B75 * self.k5[i]
                    + B76 * self.k6[i]);
            self.err[i] = y[i] - y_new[i]
                + h * (B61 * self.k1[i] + B63 * self.k3[i] + B64 * self.k4[i] + B65 * self.k5[i]);
        }

        let (errmax, at) = relative_max_error(&self.err[..n], y, y_new, ctx.accuracy, h);
        ctx.log.line(
            4,
            format_args!("Largest error {errmax:15.8e} in component {at:2}"),
        );

        if errmax > 1.0 {
            let next_step = h * shrink_factor(errmax, PSHRINK);
            ctx.log.step_failed(y[0], next_step, ctx.depth + 1, None);
            return Ok(StepOutcome::Rejected { next_step });
        }

        if ctx.adjust && !control.step_failed {
            control.step_size = (growth_factor(errmax) * h).min(ctx.cohort_limit);
        }
        self.k1_valid = false;
        Ok(StepOutcome::Accepted)
    }
}
