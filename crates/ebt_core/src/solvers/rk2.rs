use crate::error::Result;
use crate::layout::grow_buffers;
use crate::settings::IntegrationMethod;

use super::{Integrator, StepContext, StepControl, StepOutcome};

/// Two-stage second order method (nodes 0 and 2/3, weights 1/4 and 3/4).
/// Fixed step: never rejects.
#[derive(Debug, Default)]
pub struct Rk2 {
    k1: Vec<f64>,
    k2: Vec<f64>,
}

impl Rk2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Rk2 {
    fn method(&self) -> IntegrationMethod {
        IntegrationMethod::Rk2
    }

    fn prepare_cycle(&mut self, size: usize, _control: &mut StepControl) -> Result<()> {
        grow_buffers([&mut self.k1, &mut self.k2], size)
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
        let hh = 2.0 * h / 3.0;
        let h4 = h / 4.0;

        // k1 = f(y)
        ctx.stages.gradient(1, y, &mut self.k1);

        // k2 = f(y + 2h/3 k1)
        for i in 0..n {
            y_new[i] = y[i] + hh * self.k1[i];
        }
        ctx.stages.gradient(2, y_new, &mut self.k2);

        // y_next = y + h/4 (k1 + 3 k2)
        for i in 0..n {
            y_new[i] = y[i] + h4 * (self.k1[i] + 3.0 * self.k2[i]);
        }
        Ok(StepOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DebugLog;
    use crate::solvers::test_support::{single_cohort, Exponential};
    use crate::stage::StageEvaluator;

    #[test]
    fn second_order_step_matches_taylor_expansion() {
        let (_system, layout, staging) = single_cohort(1.0);
        let mut model = Exponential { rate: -1.0 };
        let mut stages = StageEvaluator::new(&mut model, &layout, &staging);
        let mut log = DebugLog::default();
        let mut ctx = StepContext {
            stages: &mut stages,
            log: &mut log,
            accuracy: 0.1,
            cohort_limit: 1.0,
            adjust: false,
            depth: 0,
        };
        let mut rk2 = Rk2::new();
        let mut control = StepControl::new(0.1);
        rk2.prepare_cycle(2, &mut control).expect("buffers");
        let y = [0.0, 1.0];
        let mut y_new = [0.0; 2];
        let outcome = rk2.attempt(&mut ctx, &mut control, &y, &mut y_new, 0.1).expect("step");
        assert_eq!(outcome, StepOutcome::Accepted);
        // 1 - h + h^2/2 exactly for a linear problem.
        assert!((y_new[1] - 0.905).abs() < 1e-14);
        assert!((y_new[0] - 0.1).abs() < 1e-15);
    }
}
