//! ODE integration core for Escalator Boxcar Train cohort simulations.
//!
//! The cohort-management layer owns the environment and population tables;
//! this crate advances them through time between cohort-cycle boundaries.
//!
//! Key components:
//! - **Layout**: flat state buffers and the per-population offsets into them.
//! - **Stage evaluator**: hands flat stage states to a [`CohortModel`] as structured views.
//! - **Solvers**: RK2, RK4, RKF45, Cash-Karp, Dopri5, Dopri8 and Radau5 behind one [`solvers::Integrator`] trait.
//! - **Events**: sign-change detection and Brent root finding on dense output.
//! - **Driver**: step clamping, retries, event location and intermediate output sampling.
//! - **Cycle**: repeated steps up to the next cohort-cycle boundary.
pub mod brent;
pub mod constants;
pub mod cycle;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod events;
pub mod layout;
pub mod population;
pub mod settings;
pub mod solvers;
pub mod stage;
pub mod traits;

pub use cycle::{run_cohort_cycle, CycleReport};
pub use driver::IntegrationCore;
pub use error::{IntegrationError, Result};
pub use population::{Population, SystemState};
pub use settings::{IntegrationMethod, IntegratorSettings, OutputSchedule};
pub use traits::{CohortModel, NullSink, OutputSink};
