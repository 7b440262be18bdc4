//! Simulation driver
//!
//! Composes the model, pacing systems, stiff solver and logging substrate
//! into the run/step/clean lifecycle:
//!
//! - [`Simulator`] is the long-lived facade. It stores the solver settings
//!   applied to the next run and the diagnostic counters of the last one.
//! - [`Simulator::init`] arms a run from a [`RunArgs`] bundle and returns a
//!   [`Run`], which mutably borrows the simulator: a second run cannot be
//!   armed until the first is finished or dropped.
//! - [`Run::step`] advances the simulation, yielding control back to the
//!   host every 100 iterations so it can service interrupts, and finishes
//!   when the end time is reached. [`Run::clean`] is an idempotent teardown,
//!   also invoked on drop and before any error is surfaced.
//!
//! Per iteration the driver backs up the current state, takes one solver
//! step (or, for models without ODEs, jumps to the next pacing transition),
//! rewinds to the transition time via dense output when the step passed it,
//! performs interpolated logging strictly before the reached time, advances
//! the event pacing systems, performs dynamic logging, and reinitializes the
//! solver after a rewind.
//!
//! Forward sensitivities use the simultaneous approach: the state vector is
//! augmented with one block per independent and the sensitivity RHS is
//! formed by internal differencing, so the one solver corrects states and
//! sensitivities together.

use std::time::Instant;

use nalgebra::DVector;
use thiserror::Error;

use crate::model::{Independent, Model, ModelDef, ModelError};
use crate::pacing::{time_eq, PacingError, PacingSystem, Protocol};
use crate::sinks::{CrossingSink, FloatSink, MatrixSink, SharedMatrix, SharedVec, SinkError};
use crate::solver::{Bdf, BdfOptions, RootSpec, SolverError, StepOutcome};

const MAX_ZERO_STEP_COUNT: u32 = 500;
const STEPS_PER_YIELD: u32 = 100;

/// Error kinds surfaced by a simulation run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Pacing(#[from] PacingError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error("maximum number of zero-length steps taken at t={t}")]
    MaxZeroStepsTaken { t: f64 },
    #[error("values in log_times must be non-decreasing")]
    NonMonotonicLogTimes,
    #[error("overflow in logged step count: simulation too long")]
    LogIndexOverflow,
    #[error(
        "log interval is too small compared to tmax; issue with numerical precision: \
         float(tmax + log_interval) == float(tmax)"
    )]
    LogIntervalPrecision,
    #[error("sensitivity logging requested, but sensitivity calculations are not enabled")]
    NoSensitivitiesToLog,
    #[error("this model calculates sensitivities: a sensitivity sink is required")]
    MissingSensitivitySink,
    #[error("root-finding index {0} is not a state index")]
    RootIndexOutOfRange(usize),
    #[error("{name} must have length {expected}, got {actual}")]
    ArgumentDimension {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("append failed on root finding sink")]
    RootLogAppendFailed(#[source] SinkError),
    #[error("simulation interrupted by host")]
    Interrupted,
}

/// Wall-clock measurement for realtime logging.
pub trait Benchmarker {
    /// Seconds since some fixed origin.
    fn time(&mut self) -> f64;
}

/// Default benchmarker counting seconds since its construction.
pub struct WallClock {
    start: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Benchmarker for WallClock {
    fn time(&mut self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Root-finding request: report crossings of `state[index]` through
/// `threshold` into `sink` as `(time, direction)` entries.
pub struct RootFinding {
    pub index: usize,
    pub threshold: f64,
    pub sink: Box<dyn CrossingSink>,
}

/// Everything needed to arm one run.
pub struct RunArgs {
    pub tmin: f64,
    pub tmax: f64,
    /// Initial state on input; final state on output.
    pub state: SharedVec,
    /// Initial state sensitivities on input (one row per independent);
    /// final sensitivities on output.
    pub s_state: SharedMatrix,
    /// Receives `[t, realtime, evaluations, pace_0, pace_1, ...]`.
    pub bound_out: SharedVec,
    pub literals: Vec<f64>,
    pub parameters: Vec<f64>,
    pub protocols: Vec<Protocol>,
    /// Log descriptor: fully qualified variable name to sink.
    pub log: Vec<(String, Box<dyn FloatSink>)>,
    /// Periodic logging interval; 0 or negative selects dynamic or
    /// point-list logging.
    pub log_interval: f64,
    /// Point-list logging times; entries must be non-decreasing.
    pub log_times: Option<Vec<f64>>,
    /// Sink for sensitivity matrices, required when the model calculates
    /// sensitivities.
    pub sensitivities: Option<Box<dyn MatrixSink>>,
    pub root_finding: Option<RootFinding>,
    pub benchmarker: Option<Box<dyn Benchmarker>>,
    pub log_realtime: bool,
    /// Cooperative cancellation, checked between iterations.
    pub interrupt: Option<Box<dyn FnMut() -> bool>>,
}

impl RunArgs {
    /// Arguments for a run over `[tmin, tmax]` with dynamic logging, no
    /// pacing, no sensitivities and no root finding. The initial state is
    /// taken from the model defaults unless `state` is assigned.
    pub fn new(tmin: f64, tmax: f64) -> Self {
        Self {
            tmin,
            tmax,
            state: SharedVec::default(),
            s_state: SharedMatrix::default(),
            bound_out: SharedVec::default(),
            literals: Vec::new(),
            parameters: Vec::new(),
            protocols: Vec::new(),
            log: Vec::new(),
            log_interval: 0.0,
            log_times: None,
            sensitivities: None,
            root_finding: None,
            benchmarker: None,
            log_realtime: false,
            interrupt: None,
        }
    }
}

/// Result of one [`Run::step`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepProgress {
    /// The run yielded control; call `step` again to continue.
    Continue(f64),
    /// The run reached `tmax`; final outputs have been written and the run
    /// has been cleaned.
    Finished(f64),
}

/// Solver settings stored on the simulator until the next `init`.
#[derive(Debug, Clone, Copy)]
struct SolverSettings {
    abs_tol: f64,
    rel_tol: f64,
    dt_max: f64,
    dt_min: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            abs_tol: 1e-6,
            rel_tol: 1e-4,
            dt_max: 0.0,
            dt_min: 0.0,
        }
    }
}

/// The long-lived simulation facade for one compiled model.
pub struct Simulator {
    def: &'static dyn ModelDef,
    settings: SolverSettings,
    steps: u64,
    evaluations: u64,
    warnings: Vec<String>,
}

impl Simulator {
    pub fn new(def: &'static dyn ModelDef) -> Self {
        Self {
            def,
            settings: SolverSettings::default(),
            steps: 0,
            evaluations: 0,
            warnings: Vec::new(),
        }
    }

    /// Set the absolute and relative solver tolerances for the next run.
    pub fn set_tolerance(&mut self, abs_tol: f64, rel_tol: f64) {
        self.settings.abs_tol = abs_tol;
        self.settings.rel_tol = rel_tol;
    }

    /// Set the maximum solver step size for the next run (0 for none).
    pub fn set_max_step_size(&mut self, dt: f64) {
        self.settings.dt_max = dt.max(0.0);
    }

    /// Set the minimum solver step size for the next run (0 for none).
    pub fn set_min_step_size(&mut self, dt: f64) {
        self.settings.dt_min = dt.max(0.0);
    }

    /// Number of driver iterations completed in the last run.
    pub fn number_of_steps(&self) -> u64 {
        self.steps
    }

    /// Number of RHS evaluations performed in the last run.
    pub fn number_of_evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Solver warnings collected during the last run. Warnings never abort
    /// a run; the host decides what to do with them.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// One-shot RHS evaluation on a scratch model.
    pub fn eval_derivatives(
        &self,
        t: f64,
        pace: &[f64],
        state: &[f64],
        derivatives: &mut [f64],
        literals: &[f64],
        parameters: &[f64],
    ) -> Result<(), SimulationError> {
        let mut model = Model::new(self.def);
        model.setup_pacing(pace.len())?;
        model.set_bound(t, pace, 0.0, 0.0)?;
        model.set_literals(literals)?;
        if model.parameters().len() > 0 {
            model.set_parameters(parameters)?;
        }
        model.set_states(state)?;
        model.evaluate_derivatives();
        if derivatives.len() != model.n_states() {
            return Err(SimulationError::ArgumentDimension {
                name: "derivatives",
                expected: model.n_states(),
                actual: derivatives.len(),
            });
        }
        derivatives.copy_from_slice(model.derivatives());
        Ok(())
    }

    /// Arm a run. The returned [`Run`] borrows the simulator, so only one
    /// run can be active at a time.
    pub fn init(&mut self, args: RunArgs) -> Result<Run<'_>, SimulationError> {
        self.steps = 0;
        self.evaluations = 0;
        self.warnings.clear();
        Run::init(self, args)
    }
}

/// The RHS context: everything a right-hand-side evaluation touches.
struct Engine {
    model: Model,
    pacing: Vec<PacingSystem>,
    pace: Vec<f64>,
    evaluations: u64,
    realtime: f64,
    n_states: usize,
    ns: usize,
    independents: Vec<Independent>,
    /// Current values of the independents, fed to the model on every
    /// evaluation so perturbed parameters are always restored.
    nominal: Vec<f64>,
    /// Internal-difference increment per independent.
    sigma: Vec<f64>,
    base_deriv: Vec<f64>,
    pert_states: Vec<f64>,
    pert_independents: Vec<f64>,
}

impl Engine {
    /// Update pacing, bound variables, parameters and states for `(t, y)`
    /// and evaluate the model RHS, leaving derivatives and intermediary
    /// variables current.
    fn refresh(&mut self, t: f64, y: &DVector<f64>) -> Result<(), SolverError> {
        for (i, system) in self.pacing.iter().enumerate() {
            if let PacingSystem::Fixed(fixed) = system {
                self.pace[i] = fixed.level_at(t);
            }
        }
        self.evaluations += 1;
        self.model
            .set_bound(t, &self.pace, self.realtime, self.evaluations as f64)
            .map_err(to_rhs_error)?;
        if self.ns > 0 {
            self.model
                .set_parameters_from_independents(&self.nominal)
                .map_err(to_rhs_error)?;
        }
        self.model
            .set_states(&y.as_slice()[..self.n_states])
            .map_err(to_rhs_error)?;
        self.model.evaluate_derivatives();
        Ok(())
    }

    /// Full augmented RHS: base derivatives plus, per independent, an
    /// internal-difference sensitivity RHS
    /// `(f(t, y + sigma_i s_i, p + sigma_i e_i) - f(t, y, p)) / sigma_i`.
    fn rhs(&mut self, t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>) -> Result<(), SolverError> {
        self.refresh(t, y)?;
        let n = self.n_states;
        ydot.as_mut_slice()[..n].copy_from_slice(self.model.derivatives());

        if self.ns > 0 {
            self.base_deriv.copy_from_slice(self.model.derivatives());
            for i in 0..self.ns {
                let sigma = self.sigma[i];
                let block = n * (1 + i);
                for k in 0..n {
                    self.pert_states[k] = y[k] + sigma * y[block + k];
                }
                self.pert_independents.copy_from_slice(&self.nominal);
                if matches!(self.independents[i], Independent::Parameter(_)) {
                    self.pert_independents[i] += sigma;
                }
                self.model
                    .set_parameters_from_independents(&self.pert_independents)
                    .map_err(to_rhs_error)?;
                self.model
                    .set_states(&self.pert_states)
                    .map_err(to_rhs_error)?;
                self.model.evaluate_derivatives();
                for k in 0..n {
                    ydot[block + k] = (self.model.derivatives()[k] - self.base_deriv[k]) / sigma;
                }
            }
            // Leave the model at the unperturbed point.
            self.model
                .set_parameters_from_independents(&self.nominal)
                .map_err(to_rhs_error)?;
            self.model
                .set_states(&y.as_slice()[..n])
                .map_err(to_rhs_error)?;
            self.model.evaluate_derivatives();
        }
        Ok(())
    }

    /// Copy the sensitivity blocks of `y` into the model and evaluate the
    /// sensitivity outputs.
    fn load_sensitivities(&mut self, y: &DVector<f64>) -> Result<(), ModelError> {
        let n = self.n_states;
        for i in 0..self.ns {
            let block = n * (1 + i);
            self.model
                .set_state_sensitivities(i, &y.as_slice()[block..block + n])?;
        }
        self.model.evaluate_sensitivity_outputs();
        Ok(())
    }
}

fn to_rhs_error(err: ModelError) -> SolverError {
    SolverError::RhsFailed(err.to_string())
}

enum LogMode {
    Dynamic,
    Periodic,
    PointList,
}

/// One armed simulation run.
pub struct Run<'s> {
    sim: &'s mut Simulator,
    engine: Engine,
    solver: Option<Bdf>,
    is_ode: bool,

    state_out: SharedVec,
    s_state_out: SharedMatrix,
    bound_out: SharedVec,
    sens_sink: Option<Box<dyn MatrixSink>>,
    root_sink: Option<Box<dyn CrossingSink>>,

    tmin: f64,
    tmax: f64,
    t: f64,
    tlast: f64,
    tnext: f64,
    y: DVector<f64>,
    ylast: DVector<f64>,
    z: DVector<f64>,

    log_mode: LogMode,
    tlog: f64,
    ilog: u64,
    log_interval: f64,
    log_times: Vec<f64>,

    benchmarker: Option<Box<dyn Benchmarker>>,
    log_realtime: bool,
    realtime_start: Option<f64>,
    interrupt: Option<Box<dyn FnMut() -> bool>>,

    steps: u64,
    zero_step_count: u32,
    warnings: Vec<String>,
    finished: bool,
    cleaned: bool,
}

impl<'s> Run<'s> {
    fn init(sim: &'s mut Simulator, args: RunArgs) -> Result<Run<'s>, SimulationError> {
        let RunArgs {
            tmin,
            tmax,
            state,
            s_state,
            bound_out,
            literals,
            parameters,
            protocols,
            log,
            log_interval,
            log_times,
            sensitivities,
            root_finding,
            benchmarker,
            log_realtime,
            interrupt,
        } = args;

        let log_mode = if log_interval > 0.0 {
            LogMode::Periodic
        } else if log_times.is_some() {
            LogMode::PointList
        } else {
            LogMode::Dynamic
        };

        // Model, constants, initial state.
        let mut model = Model::new(sim.def);
        let is_ode = model.is_ode();
        let n = model.n_states();
        let ns = model.ns_independents();

        if state.len() == 0 {
            state.assign(&model.def().initial_states());
        }
        let initial_state = state.snapshot();
        if initial_state.len() != n {
            return Err(SimulationError::ArgumentDimension {
                name: "state",
                expected: n,
                actual: initial_state.len(),
            });
        }
        model.set_states(&initial_state)?;

        let initial_sens = if ns > 0 {
            let rows = s_state.snapshot();
            if rows.len() != ns {
                return Err(SimulationError::ArgumentDimension {
                    name: "s_state",
                    expected: ns,
                    actual: rows.len(),
                });
            }
            for (i, row) in rows.iter().enumerate() {
                model.set_state_sensitivities(i, row)?;
            }
            rows
        } else {
            Vec::new()
        };

        if !literals.is_empty() || model.literals().len() == 0 {
            model.set_literals(&literals)?;
        }
        if model.parameters().len() > 0 && !parameters.is_empty() {
            model.set_parameters(&parameters)?;
        }

        // Sensitivity plumbing: nominal independent values and the
        // internal-difference increments scaled by pbar_i = max(|p_i|, 1).
        let independents = model.sensitivity().independents.clone();
        let mut nominal = vec![0.0; ns];
        let mut pbar = vec![0.0; ns];
        for i in 0..ns {
            nominal[i] = model.independent_value(i)?;
            pbar[i] = nominal[i].abs().max(1.0);
        }
        let sigma: Vec<f64> = pbar.iter().map(|p| f64::EPSILON.sqrt() * p).collect();

        if ns > 0 && sensitivities.is_none() {
            return Err(SimulationError::MissingSensitivitySink);
        }
        if ns == 0 && sensitivities.is_some() {
            return Err(SimulationError::NoSensitivitiesToLog);
        }

        // Pacing systems; the initial halting point is tmax unless an event
        // system proposes an earlier transition.
        let n_pace = protocols.len();
        let mut pacing = Vec::with_capacity(n_pace);
        let mut pace = vec![0.0; n_pace];
        model.setup_pacing(n_pace)?;
        let mut tnext = tmax;
        for (i, protocol) in protocols.iter().enumerate() {
            let mut system = PacingSystem::from_protocol(protocol)?;
            if let PacingSystem::Event(event) = &mut system {
                event.advance(tmin)?;
                pace[i] = event.level();
                tnext = tnext.min(event.next_time());
            }
            pacing.push(system);
        }

        let mut engine = Engine {
            model,
            pacing,
            pace,
            evaluations: 0,
            realtime: 0.0,
            n_states: n,
            ns,
            independents,
            nominal,
            sigma,
            base_deriv: vec![0.0; n],
            pert_states: vec![0.0; n],
            pert_independents: vec![0.0; ns],
        };

        // Augmented initial vector: states then one block per independent.
        let n_aug = n * (1 + ns);
        let mut y0 = DVector::zeros(n_aug);
        y0.as_mut_slice()[..n].copy_from_slice(&initial_state);
        for (i, row) in initial_sens.iter().enumerate() {
            if row.len() != n {
                return Err(SimulationError::ArgumentDimension {
                    name: "s_state row",
                    expected: n,
                    actual: row.len(),
                });
            }
            y0.as_mut_slice()[n * (1 + i)..n * (2 + i)].copy_from_slice(row);
        }

        // Solver, with per-block error weights for the sensitivities.
        let solver = if is_ode {
            let abs_tol_vector = if ns > 0 {
                let mut atol = DVector::from_element(n_aug, sim.settings.abs_tol);
                for i in 0..ns {
                    for k in 0..n {
                        atol[n * (1 + i) + k] = sim.settings.abs_tol / pbar[i];
                    }
                }
                Some(atol)
            } else {
                None
            };
            let root = match &root_finding {
                Some(rf) => {
                    if rf.index >= n {
                        return Err(SimulationError::RootIndexOutOfRange(rf.index));
                    }
                    Some(RootSpec {
                        index: rf.index,
                        threshold: rf.threshold,
                    })
                }
                None => None,
            };
            let options = BdfOptions {
                abs_tol: sim.settings.abs_tol,
                rel_tol: sim.settings.rel_tol,
                abs_tol_vector,
                max_step: sim.settings.dt_max,
                min_step: sim.settings.dt_min,
                root,
            };
            let horizon = if tnext > tmin { tnext } else { tmax };
            let eng = &mut engine;
            Some(Bdf::new(
                tmin,
                y0.clone(),
                horizon,
                options,
                &mut |t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>| eng.rhs(t, y, ydot),
            )?)
        } else {
            None
        };
        let root_sink = root_finding.and_then(|rf| if is_ode { Some(rf.sink) } else { None });

        // Precision check for periodic logging.
        if log_interval > 0.0 && tmax + log_interval == tmax {
            return Err(SimulationError::LogIntervalPrecision);
        }

        engine.model.initialize_logging(log)?;

        // First log point per mode.
        let mut run = Run {
            sim,
            engine,
            solver,
            is_ode,
            state_out: state,
            s_state_out: s_state,
            bound_out,
            sens_sink: sensitivities,
            root_sink,
            tmin,
            tmax,
            t: tmin,
            tlast: tmin,
            tnext,
            ylast: y0.clone(),
            z: DVector::zeros(n_aug),
            y: y0,
            log_mode,
            tlog: 0.0,
            ilog: 0,
            log_interval,
            log_times: log_times.unwrap_or_default(),
            benchmarker,
            log_realtime,
            realtime_start: None,
            interrupt,
            steps: 0,
            zero_step_count: 0,
            warnings: Vec::new(),
            finished: false,
            cleaned: false,
        };

        match run.log_mode {
            LogMode::Periodic => {
                run.ilog = 0;
                run.tlog = run.tmin;
            }
            LogMode::PointList => {
                // Skip entries before the start time.
                run.tlog = run.t - 1.0;
                while (run.ilog as usize) < run.log_times.len() && run.tlog < run.t {
                    run.tlog = run.log_times[run.ilog as usize];
                    run.ilog += 1;
                }
                if run.tlog < run.t {
                    run.tlog = run.tmax + 1.0;
                }
            }
            LogMode::Dynamic => {
                // Log the first point, but only when not continuing into an
                // already filled log.
                let log_first = run.engine.model.logged_so_far().map_or(true, |len| len == 0);
                if log_first {
                    let y = run.y.clone();
                    if let Err(err) = run.engine.refresh(run.t, &y) {
                        return Err(run.fail(err.into()));
                    }
                    if let Err(err) = run.engine.model.log() {
                        return Err(run.fail(err.into()));
                    }
                    if run.engine.ns > 0 {
                        if let Err(err) = run.log_sensitivity_point(&y) {
                            return Err(run.fail(err));
                        }
                    }
                }
            }
        }

        Ok(run)
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.t
    }

    /// Advance the run. Returns [`StepProgress::Continue`] after every 100
    /// iterations and [`StepProgress::Finished`] once `tmax` is reached; on
    /// any error the run is cleaned before the error is surfaced.
    pub fn step(&mut self) -> Result<StepProgress, SimulationError> {
        if self.finished {
            return Ok(StepProgress::Finished(self.t));
        }

        // Realtime logging starts at the first step call so initialization
        // cost is excluded.
        if self.log_realtime && self.realtime_start.is_none() {
            let start = self.benchmarker.as_mut().map(|b| b.time()).unwrap_or(0.0);
            self.realtime_start = Some(start);
        }

        let mut steps_taken: u32 = 0;
        loop {
            self.ylast.copy_from(&self.y);
            self.tlast = self.t;

            let mut root_hit: Option<i32> = None;
            if self.is_ode {
                let engine = &mut self.engine;
                let solver = self.solver.as_mut().expect("ODE run has a solver");
                let outcome = solver.step(
                    &mut |t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>| {
                        engine.rhs(t, y, ydot)
                    },
                );
                match outcome {
                    Ok(StepOutcome::Advanced(t)) => self.t = t,
                    Ok(StepOutcome::Root { t, direction }) => {
                        self.t = t;
                        root_hit = Some(direction);
                    }
                    Err(err) => {
                        self.write_error_outputs();
                        return Err(self.fail(err.into()));
                    }
                }
                self.y.copy_from(self.solver.as_ref().unwrap().y());
                self.drain_solver_warnings();
            } else {
                self.t = if self.tmax > self.tnext {
                    self.tnext
                } else {
                    self.tmax
                };
            }

            // Progress check: too many zero-length steps in a row is an
            // arithmetic failure.
            if self.t == self.tlast {
                self.zero_step_count += 1;
                if self.zero_step_count >= MAX_ZERO_STEP_COUNT {
                    let t = self.t;
                    return Err(self.fail(SimulationError::MaxZeroStepsTaken { t }));
                }
            } else {
                self.zero_step_count = 0;
            }
            self.steps += 1;

            let mut reinit_needed = false;
            if self.is_ode {
                if self.t > self.tnext {
                    // The step passed the next pacing transition: rewind to
                    // it and reinitialize afterwards.
                    let tnext = self.tnext;
                    let solver = self.solver.as_ref().unwrap();
                    if let Err(err) = solver.interpolate(tnext, &mut self.y) {
                        self.write_error_outputs();
                        return Err(self.fail(err.into()));
                    }
                    self.t = tnext;
                    reinit_needed = true;
                } else if let Some(direction) = root_hit {
                    let t = self.t;
                    if let Some(sink) = self.root_sink.as_mut() {
                        if let Err(err) = sink.append_crossing(t, direction) {
                            return Err(self.fail(SimulationError::RootLogAppendFailed(err)));
                        }
                    }
                }
            }

            // Interpolated logging: strictly before the reached time, so
            // intervals stay half-open and the final point is excluded.
            if !matches!(self.log_mode, LogMode::Dynamic) && self.t > self.tlog {
                while self.t > self.tlog {
                    self.update_realtime();
                    let tlog = self.tlog;
                    if self.is_ode {
                        let solver = self.solver.as_ref().unwrap();
                        if let Err(err) = solver.interpolate(tlog, &mut self.z) {
                            self.write_error_outputs();
                            return Err(self.fail(err.into()));
                        }
                    } else {
                        self.z.copy_from(&self.y);
                    }
                    let z = self.z.clone();
                    if let Err(err) = self.engine.refresh(tlog, &z) {
                        return Err(self.fail(err.into()));
                    }
                    if let Err(err) = self.engine.model.log() {
                        return Err(self.fail(err.into()));
                    }
                    if self.engine.ns > 0 {
                        if let Err(err) = self.log_sensitivity_point(&z) {
                            return Err(self.fail(err));
                        }
                    }
                    if let Err(err) = self.advance_log_point() {
                        return Err(self.fail(err));
                    }
                }
            }

            // Event pacing: everything before t is logged, so the pacing
            // systems can move to t and propose the next transition.
            let mut tnext = self.tmax;
            let mut pacing_err = None;
            for (i, system) in self.engine.pacing.iter_mut().enumerate() {
                if let PacingSystem::Event(event) = system {
                    if let Err(err) = event.advance(self.t) {
                        pacing_err = Some(err);
                        break;
                    }
                    tnext = tnext.min(event.next_time());
                    self.engine.pace[i] = event.level();
                }
            }
            if let Some(err) = pacing_err {
                return Err(self.fail(err.into()));
            }
            self.tnext = tnext;

            // Dynamic logging: log every visited point.
            if matches!(self.log_mode, LogMode::Dynamic) {
                self.update_realtime();
                let needs_rhs = self.engine.model.logging_derivatives()
                    || self.engine.model.logging_intermediary()
                    || self.engine.ns > 0;
                if needs_rhs {
                    let (t, y) = (self.t, self.y.clone());
                    if let Err(err) = self.engine.refresh(t, &y) {
                        return Err(self.fail(err.into()));
                    }
                } else if self.engine.model.logging_bound() {
                    let (t, realtime, evaluations) = (
                        self.t,
                        self.engine.realtime,
                        self.engine.evaluations as f64,
                    );
                    let engine = &mut self.engine;
                    if let Err(err) =
                        engine
                            .model
                            .set_bound(t, &engine.pace, realtime, evaluations)
                    {
                        return Err(self.fail(err.into()));
                    }
                }
                if let Err(err) = self.engine.model.log() {
                    return Err(self.fail(err.into()));
                }
                if self.engine.ns > 0 {
                    let y = self.y.clone();
                    if let Err(err) = self.log_sensitivity_point(&y) {
                        return Err(self.fail(err));
                    }
                }
            }

            // Reinitialize after a rewind, sensitivities included.
            if reinit_needed {
                let engine = &mut self.engine;
                let solver = self.solver.as_mut().unwrap();
                let (t, tnext) = (self.t, self.tnext);
                let horizon = if tnext > t { tnext } else { self.tmax };
                if let Err(err) = solver.reinit(
                    t,
                    &self.y,
                    horizon,
                    &mut |t: f64, y: &DVector<f64>, ydot: &mut DVector<f64>| {
                        engine.rhs(t, y, ydot)
                    },
                ) {
                    self.write_error_outputs();
                    return Err(self.fail(err.into()));
                }
            }

            // Termination: snap onto tmax within floating tolerance.
            if time_eq(self.t, self.tmax) {
                self.t = self.tmax;
            }
            if self.t >= self.tmax {
                break;
            }

            // Host interrupt?
            if let Some(interrupt) = self.interrupt.as_mut() {
                if interrupt() {
                    return Err(self.fail(SimulationError::Interrupted));
                }
            }

            steps_taken += 1;
            if steps_taken >= STEPS_PER_YIELD {
                return Ok(StepProgress::Continue(self.t));
            }
        }

        // Finished: write final state, sensitivities and bound variables.
        let n = self.engine.n_states;
        self.state_out.assign(&self.y.as_slice()[..n]);
        if self.engine.ns > 0 {
            let rows: Vec<Vec<f64>> = (0..self.engine.ns)
                .map(|i| self.y.as_slice()[n * (1 + i)..n * (2 + i)].to_vec())
                .collect();
            self.s_state_out.assign(&rows);
        }
        self.write_bound_out(self.t);
        self.finished = true;
        self.clean();
        Ok(StepProgress::Finished(self.t))
    }

    /// Run to completion, stepping through all yield points.
    pub fn run(&mut self) -> Result<f64, SimulationError> {
        loop {
            match self.step()? {
                StepProgress::Continue(_) => continue,
                StepProgress::Finished(t) => return Ok(t),
            }
        }
    }

    /// Idempotent teardown: releases the solver and flushes the diagnostic
    /// counters to the simulator. Safe to call at any point, in any state,
    /// any number of times; also invoked on drop.
    pub fn clean(&mut self) {
        if self.cleaned {
            return;
        }
        self.drain_solver_warnings();
        self.solver = None;
        self.sim.steps = self.steps;
        self.sim.evaluations = self.engine.evaluations;
        self.sim.warnings = std::mem::take(&mut self.warnings);
        self.cleaned = true;
    }

    fn drain_solver_warnings(&mut self) {
        if let Some(solver) = self.solver.as_mut() {
            let warnings = solver.take_warnings();
            self.warnings.extend(warnings);
        }
    }

    fn fail(&mut self, err: SimulationError) -> SimulationError {
        self.finished = true;
        self.clean();
        err
    }

    fn update_realtime(&mut self) {
        if !self.log_realtime {
            return;
        }
        if let (Some(bench), Some(start)) = (self.benchmarker.as_mut(), self.realtime_start) {
            self.engine.realtime = bench.time() - start;
        }
    }

    /// Load the sensitivity blocks of `y`, evaluate the sensitivity outputs
    /// and append the matrix snapshot.
    fn log_sensitivity_point(&mut self, y: &DVector<f64>) -> Result<(), SimulationError> {
        self.engine.load_sensitivities(y)?;
        let sink = self
            .sens_sink
            .as_mut()
            .ok_or(SimulationError::MissingSensitivitySink)?;
        self.engine.model.log_sensitivity_matrix(sink.as_mut())?;
        Ok(())
    }

    /// Move `tlog` to the next logging point.
    fn advance_log_point(&mut self) -> Result<(), SimulationError> {
        match self.log_mode {
            LogMode::Periodic => {
                self.ilog = self
                    .ilog
                    .checked_add(1)
                    .ok_or(SimulationError::LogIndexOverflow)?;
                self.tlog = self.tmin + self.ilog as f64 * self.log_interval;
            }
            LogMode::PointList => {
                if (self.ilog as usize) < self.log_times.len() {
                    let proposed = self.log_times[self.ilog as usize];
                    if proposed < self.tlog {
                        return Err(SimulationError::NonMonotonicLogTimes);
                    }
                    self.tlog = proposed;
                    self.ilog += 1;
                } else {
                    self.tlog = self.tmax + 1.0;
                }
            }
            LogMode::Dynamic => {}
        }
        Ok(())
    }

    /// On a solver failure the outputs reflect the last good point.
    fn write_error_outputs(&mut self) {
        let n = self.engine.n_states;
        self.state_out.assign(&self.ylast.as_slice()[..n]);
        self.write_bound_out(self.tlast);
    }

    fn write_bound_out(&mut self, t: f64) {
        let mut bound = vec![t, self.engine.realtime, self.engine.evaluations as f64];
        bound.extend_from_slice(&self.engine.pace);
        self.bound_out.assign(&bound);
    }
}

impl Drop for Run<'_> {
    fn drop(&mut self) {
        self.clean();
    }
}
