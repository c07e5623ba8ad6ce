use thiserror::Error;

/// Conditions that end a run. The driver flushes staged boundary cohorts
/// before any of these is returned to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("Too many recursions in integration to find suitable stepsize! (T = {time:.8}, dt = {step:.7e})")]
    TooManyRecursions { time: f64, step: f64 },

    #[error("Step size in integration routine too small! (T = {time:.8}, dt = {step:.7e})")]
    StepTooSmall { time: f64, step: f64 },

    #[error("Iteration matrix is repeatedly singular! (T = {time:.8}, dt = {step:.7e})")]
    RepeatedSingularity { time: f64, step: f64 },

    #[error("Memory allocation failure in ODE integration routine! ({requested} values requested)")]
    Allocation { requested: usize },
}

impl IntegrationError {
    /// Simulation time at which the failure occurred, if it has one.
    pub fn time(&self) -> Option<f64> {
        match self {
            IntegrationError::TooManyRecursions { time, .. }
            | IntegrationError::StepTooSmall { time, .. }
            | IntegrationError::RepeatedSingularity { time, .. } => Some(*time),
            IntegrationError::Allocation { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, IntegrationError>;

/// Advisory failures of the Brent root finder; never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RootError {
    #[error("Root is not bracketed by the indicator values")]
    NotBracketed,
    #[error("Maximum number of root finding iterations exceeded")]
    IterationLimit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_time_and_step() {
        let err = IntegrationError::StepTooSmall {
            time: 2.5,
            step: 1.0e-13,
        };
        let msg = format!("{err}");
        assert!(msg.contains("too small"), "unexpected message: {msg}");
        assert!(msg.contains("2.50000000"), "unexpected message: {msg}");
        assert_eq!(err.time(), Some(2.5));
        assert_eq!(IntegrationError::Allocation { requested: 8 }.time(), None);
    }
}
