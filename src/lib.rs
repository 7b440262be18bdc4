//! cardiosim - Stiff ODE simulation engine for single cardiac cells
//!
//! A simulation core that couples four subsystems:
//!
//! - A pluggable biophysical [`model::Model`] holding all numerical state of
//!   one cell instance (states, derivatives, intermediaries, constants,
//!   bound inputs, sensitivities).
//! - Pacing state machines ([`pacing::EventPacing`], [`pacing::FixedPacing`])
//!   producing the time-varying external stimulus.
//! - A stiff BDF integrator with a dense Newton corrector
//!   ([`solver::Bdf`]) supporting one-step advance, dense output, root
//!   finding and reinitialization after discontinuities.
//! - A logging engine appending model variables to externally owned sinks
//!   ([`sinks`]), in dynamic, periodic or point-list mode, optionally with
//!   forward sensitivity matrices.
//!
//! The [`sim`] module composes these into the run/step/clean lifecycle.
//!
//! # Example
//!
//! ```rust,ignore
//! use cardiosim::model::LUO_RUDY_1991;
//! use cardiosim::pacing::{PacingEvent, Protocol};
//! use cardiosim::sim::{RunArgs, Simulator, StepProgress};
//! use cardiosim::sinks::Series;
//!
//! let mut sim = Simulator::new(&LUO_RUDY_1991);
//! let time = Series::new();
//! let vm = Series::new();
//!
//! let mut args = RunArgs::new(0.0, 500.0);
//! args.protocols.push(Protocol::Event(vec![PacingEvent {
//!     level: 1.0, start: 10.0, duration: 2.0, period: 0.0, multiplier: 0,
//! }]));
//! args.log_interval = 1.0;
//! args.log.push(("engine.time".into(), Box::new(time.clone())));
//! args.log.push(("membrane.V".into(), Box::new(vm.clone())));
//!
//! let mut run = sim.init(args)?;
//! loop {
//!     match run.step()? {
//!         StepProgress::Continue(_) => continue,
//!         StepProgress::Finished(_) => break,
//!     }
//! }
//! ```

pub mod model;
pub mod pacing;
pub mod sim;
pub mod sinks;
pub mod solver;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::model::{Model, ModelDef, VarRef};
    pub use crate::pacing::{EventPacing, FixedPacing, PacingEvent, PacingSystem, Protocol};
    pub use crate::sim::{RunArgs, SimulationError, Simulator, StepProgress};
    pub use crate::sinks::{CrossingLog, MatrixLog, Series, SharedMatrix, SharedVec};
    pub use crate::solver::{Bdf, BdfOptions, StepOutcome};
}
