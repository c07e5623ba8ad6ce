use crate::error::Result;
use crate::layout::grow_buffers;
use crate::settings::IntegrationMethod;

use super::{Integrator, StepContext, StepControl, StepOutcome};

/// Classic Runge-Kutta 4th Order Solver, fixed step.
#[derive(Debug, Default)]
pub struct Rk4 {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
}

impl Rk4 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Rk4 {
    fn method(&self) -> IntegrationMethod {
        IntegrationMethod::Rk4
    }

    fn prepare_cycle(&mut self, size: usize, _control: &mut StepControl) -> Result<()> {
        grow_buffers([&mut self.k1, &mut self.k2, &mut self.k3, &mut self.k4], size)
    }

    fn attempt(
        &mut self,
        ctx: &mut StepContext<'_, '_>,
        _control: &mut StepControl,
        y: &[f64],
        y_new: &mut [f64],
        h: f64,
    ) -> Result<StepOutcome> {
        let n = y.len();
        let half = 0.5 * h;
        let sixth = h / 6.0;

        // k1 = f(y)
        ctx.stages.gradient(1, y, &mut self.k1);

        // k2 = f(y + h/2 k1)
        for i in 0..n {
            y_new[i] = y[i] + half * self.k1[i];
        }
        ctx.stages.gradient(2, y_new, &mut self.k2);

        // k3 = f(y + h/2 k2)
        for i in 0..n {
            y_new[i] = y[i] + half * self.k2[i];
        }
        ctx.stages.gradient(3, y_new, &mut self.k3);

        // k4 = f(y + h k3)
        for i in 0..n {
            y_new[i] = y[i] + h * self.k3[i];
        }
        ctx.stages.gradient(4, y_new, &mut self.k4);

        // y_next = y + h/6 (k1 + 2k2 + 2k3 + k4)
        for i in 0..n {
            y_new[i] = y[i] + sixth * (self.k1[i] + 2.0 * self.k2[i] + 2.0 * self.k3[i] + self.k4[i]);
        }
        Ok(StepOutcome::Accepted)
    }
}
