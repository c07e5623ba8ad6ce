//! One cohort cycle: repeated integration steps up to the next cycle boundary.

use serde::Serialize;
use tracing::debug;

use crate::constants::SMALLEST_STEP;
use crate::driver::IntegrationCore;
use crate::error::Result;
use crate::population::SystemState;
use crate::solvers::Integrator;
use crate::traits::{CohortModel, OutputSink};

/// Summary of a completed cohort cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CycleReport {
    pub steps: usize,
    pub min_step: f64,
    pub max_step: f64,
    /// True when a located event closed the cycle before `cycle_end`.
    pub cohort_end: bool,
    pub end_time: f64,
}

/// Integrate `system` from its current time up to `cycle_end`, or until a
/// located event closes the cycle.
///
/// Boundary-cohort transforms and cohort insertion at the end of the cycle
/// remain the caller's business.
pub fn run_cohort_cycle<S: Integrator>(
    core: &mut IntegrationCore<S>,
    system: &mut SystemState,
    model: &mut dyn CohortModel,
    sink: &mut dyn OutputSink,
    cycle_end: f64,
) -> Result<CycleReport> {
    if core.step_size() <= SMALLEST_STEP {
        core.set_step_size(core.settings().cohort_limit);
    }
    let mut min_step = core.step_size();
    let mut max_step = core.step_size();

    core.prepare_cycle(system, model)?;

    let mut steps = 0;
    while cycle_end - system.time() >= SMALLEST_STEP && !core.cohort_end() {
        let remaining = cycle_end - system.time();
        core.integration_step(system, model, sink, core.step_size(), remaining, 0)?;
        steps += 1;
        min_step = min_step.min(core.step_size());
        max_step = max_step.max(core.step_size());
    }

    core.log_mut().cohort_end(system.time(), min_step, max_step);
    debug!(time = system.time(), steps, min_step, max_step, "cohort cycle finished");

    Ok(CycleReport {
        steps,
        min_step,
        max_step,
        cohort_end: core.cohort_end(),
        end_time: system.time(),
    })
}
