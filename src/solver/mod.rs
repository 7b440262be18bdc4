//! Stiff IVP integration
//!
//! [`Bdf`] is a variable-step, variable-order (1-5) backward differentiation
//! formula solver with a modified-Newton corrector and a dense LU linear
//! solve, in the backward-difference formulation. It exposes the surface the
//! simulation driver needs: one-step advance (which may pass a requested
//! horizon; the driver rewinds via dense output), dense output over the most
//! recent steps, single-function root finding, and reinitialization after a
//! discontinuity.
//!
//! The right-hand side is passed in per call as a fallible closure; an error
//! returned from the RHS aborts the step.

mod bdf;

pub use bdf::{Bdf, BdfOptions, RootSpec, StepOutcome};

use nalgebra::DVector;
use thiserror::Error;

/// Right-hand side closure: `f(t, y, ydot)`.
pub type RhsFn<'a> =
    dyn FnMut(f64, &DVector<f64>, &mut DVector<f64>) -> Result<(), SolverError> + 'a;

/// Error kinds for the stiff solver.
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    #[error("right-hand side evaluation failed: {0}")]
    RhsFailed(String),
    #[error("right-hand side returned a non-finite value at t={0}")]
    RhsNotFinite(f64),
    #[error("newton iteration failed to converge at t={t} with step size {h}")]
    ConvergenceFailure { t: f64, h: f64 },
    #[error("step size underflow at t={t}: needed {h}, minimum is {min}")]
    StepSizeTooSmall { t: f64, h: f64, min: f64 },
    #[error("interpolation time {t} outside the retained steps [{t0}, {t1}]")]
    BadInterpolationTime { t: f64, t0: f64, t1: f64 },
    #[error("dense output requested before the first step")]
    NoStepTaken,
    #[error("invalid solver input: {0}")]
    InvalidInput(String),
}
