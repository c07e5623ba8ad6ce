use crate::error::Result;
use crate::layout::grow_buffers;
use crate::settings::IntegrationMethod;

use super::rkf45::{growth_factor, shrink_factor};
use super::{relative_max_error, Integrator, StepContext, StepControl, StepOutcome};

const B11: f64 = 0.2;
const B21: f64 = 3.0 / 40.0;
const B22: f64 = 9.0 / 40.0;
const B31: f64 = 0.3;
const B32: f64 = -0.9;
const B33: f64 = 1.2;
const B41: f64 = -11.0 / 54.0;
const B42: f64 = 2.5;
const B43: f64 = -70.0 / 27.0;
const B44: f64 = 35.0 / 27.0;
const B51: f64 = 1631.0 / 55296.0;
const B52: f64 = 175.0 / 512.0;
const B53: f64 = 575.0 / 13824.0;
const B54: f64 = 44275.0 / 110592.0;
const B55: f64 = 253.0 / 4096.0;

const C1: f64 = 37.0 / 378.0;
const C3: f64 = 250.0 / 621.0;
const C4: f64 = 125.0 / 594.0;
const C6: f64 = 512.0 / 1771.0;

// Fifth minus fourth order weights.
const DC1: f64 = C1 - 2825.0 / 27648.0;
const DC3: f64 = C3 - 18575.0 / 48384.0;
const DC4: f64 = C4 - 13525.0 / 55296.0;
const DC5: f64 = -277.0 / 14336.0;
const DC6: f64 = C6 - 0.25;

const PSHRINK: f64 = -0.25;

/// Cash-Karp embedded 5(4) pair with Watts & Shampine step control.
#[derive(Debug, Default)]
pub struct CashKarp {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    err: Vec<f64>,
    k1_valid: bool,
}

impl CashKarp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for CashKarp {
    fn method(&self) -> IntegrationMethod {
        IntegrationMethod::CashKarp
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

        for i in 0..n {
            y_new[i] = y[i] + h * (C1 * self.k1[i] + C3 * self.k3[i] + C4 * self.k4[i] + C6 * self.k6[i]);
            self.err[i] = h
                * (DC1 * self.k1[i]
                    + DC3 * self.k3[i]
                    + DC4 * self.k4[i]
                    + DC5 * self.k5[i]
                    + DC6 * self.k6[i]);
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
