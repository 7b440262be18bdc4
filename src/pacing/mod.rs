//! Pacing systems
//!
//! The external stimulus driving a simulation comes from one or more pacing
//! systems. Two kinds exist:
//!
//! - [`EventPacing`]: a piecewise-constant level from a schedule of events.
//!   Its level changes only at discontinuity times, which the simulation
//!   driver must stop at and reinitialize the solver after.
//! - [`FixedPacing`]: a continuously varying level interpolated from a
//!   precomputed time series, sampled afresh at every RHS evaluation. It
//!   never produces discontinuity events.

mod event;
mod fixed;

pub use event::{EventPacing, PacingEvent};
pub use fixed::FixedPacing;

use thiserror::Error;

/// Error kinds for pacing operations.
#[derive(Debug, Clone, Error)]
pub enum PacingError {
    #[error("invalid pacing: {0}")]
    Invalid(String),
    #[error("pacing time cannot decrease (asked for {t}, currently at {current})")]
    NegativeTimeIncrement { t: f64, current: f64 },
}

/// The event stream consumed to build one pacing system.
#[derive(Debug, Clone)]
pub enum Protocol {
    /// An event schedule for [`EventPacing`].
    Event(Vec<PacingEvent>),
    /// A `(times, values)` series for [`FixedPacing`].
    Fixed { times: Vec<f64>, values: Vec<f64> },
}

/// A pacing system of either kind.
pub enum PacingSystem {
    Event(EventPacing),
    Fixed(FixedPacing),
}

impl PacingSystem {
    pub fn from_protocol(protocol: &Protocol) -> Result<Self, PacingError> {
        match protocol {
            Protocol::Event(schedule) => Ok(Self::Event(EventPacing::populate(schedule)?)),
            Protocol::Fixed { times, values } => {
                Ok(Self::Fixed(FixedPacing::populate(times, values)?))
            }
        }
    }

    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    /// Advance to time `t`. Fixed-form pacing has no cursor to move.
    pub fn advance(&mut self, t: f64) -> Result<(), PacingError> {
        match self {
            Self::Event(event) => event.advance(t),
            Self::Fixed(_) => Ok(()),
        }
    }

    /// The next discontinuity this system forces on the integrator.
    /// Fixed-form pacing varies continuously and never proposes one.
    pub fn next_time(&self) -> f64 {
        match self {
            Self::Event(event) => event.next_time(),
            Self::Fixed(_) => f64::INFINITY,
        }
    }

    /// The stimulus level at time `t`. Event pacing reports the level at
    /// its current cursor; `t` only matters for fixed-form interpolation.
    pub fn level_at(&self, t: f64) -> f64 {
        match self {
            Self::Event(event) => event.level(),
            Self::Fixed(fixed) => fixed.level_at(t),
        }
    }
}

/// Approximate time equality, used to snap the simulation time onto `tmax`
/// when the solver lands within floating tolerance of it.
pub fn time_eq(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= 1e-9 * scale
}
