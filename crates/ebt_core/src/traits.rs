use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::layout::{DerivativeView, StateView, Staging};
use crate::population::SystemState;

/// Scalar types accepted by the generic numerical helpers.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A structured-population model plugged into the integration core.
///
/// None of these callbacks may re-enter the integrator.
pub trait CohortModel {
    /// Fills the derivative of every environment variable, cohort and
    /// boundary record. The time slot arrives pre-set to 1.0.
    fn gradient(&mut self, state: &StateView<'_>, derivative: &mut DerivativeView<'_>, staging: &Staging);

    /// Number of event indicators reported by `event_location`.
    fn event_count(&self) -> usize {
        0
    }

    /// Writes one signed indicator per event. Slots arrive filled with
    /// `NO_EVENT`; leaving a slot untouched disables that event.
    fn event_location(&mut self, _state: &StateView<'_>, _staging: &Staging, _indicators: &mut [f64]) {}

    /// Asked after an event has been located: true ends the cohort cycle there.
    fn force_cohort_end(&mut self, _state: &StateView<'_>, _staging: &Staging) -> bool {
        false
    }
}

/// Output collaborators invoked during intermediate sampling. The system
/// tables already hold the interpolated state when these run.
pub trait OutputSink {
    fn file_out(&mut self, system: &SystemState);

    fn file_state(&mut self, _system: &SystemState) {}
}

/// Sink that discards all output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn file_out(&mut self, _system: &SystemState) {}
}
