//! Stage evaluator: hands flat buffers to the model as structured views.

use crate::constants::NO_EVENT;
use crate::layout::{DerivativeView, StateView, Staging, SystemLayout};
use crate::traits::CohortModel;

pub struct StageEvaluator<'a> {
    model: &'a mut dyn CohortModel,
    layout: &'a SystemLayout,
    staging: &'a Staging,
    evaluations: usize,
}

impl<'a> StageEvaluator<'a> {
    pub fn new(model: &'a mut dyn CohortModel, layout: &'a SystemLayout, staging: &'a Staging) -> Self {
        Self {
            model,
            layout,
            staging,
            evaluations: 0,
        }
    }

    /// Gradient evaluations made through this evaluator.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Evaluate the gradient at `state` for the given stage, writing into `out`.
    pub fn gradient(&mut self, stage: usize, state: &[f64], out: &mut [f64]) {
        let n = self.layout.system_size;
        if n == 0 {
            return;
        }
        out[0] = 1.0;
        self.evaluations += 1;
        let view = StateView::new(self.layout, &state[..n]).at_stage(stage);
        let mut derivative = DerivativeView::new(self.layout, &mut out[..n]);
        self.model.gradient(&view, &mut derivative, self.staging);
    }

    /// Evaluate all event indicators at `state`.
    pub fn indicators(&mut self, state: &[f64], out: &mut [f64]) {
        out.fill(NO_EVENT);
        if out.is_empty() {
            return;
        }
        let view = StateView::new(self.layout, &state[..self.layout.system_size]);
        self.model.event_location(&view, self.staging, out);
    }

    pub fn force_cohort_end(&mut self, state: &[f64]) -> bool {
        let view = StateView::new(self.layout, &state[..self.layout.system_size]);
        self.model.force_cohort_end(&view, self.staging)
    }
}
