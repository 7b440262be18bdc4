//! Cell model storage and evaluation
//!
//! All information about one cell instance lives in a [`Model`]: a block of
//! numeric storage ([`Variables`]) plus a reference to the compiled-in model
//! definition ([`ModelDef`]) that knows how to evaluate it.
//!
//! Model variables are divided into non-overlapping groups:
//!
//! - **States**: independent variables, varied during integration.
//! - **State derivatives**: calculated by the model.
//! - **Bound variables**: external inputs (time, pacing, realtime,
//!   evaluation count).
//! - **Intermediary variables**: variables that depend on states.
//! - **Constants**: everything else, split into *parameters* (inputs to
//!   sensitivity analysis), *parameter-derived*, *literals* and
//!   *literal-derived* values. Literal-derived and parameter-derived values
//!   are pure functions of their inputs and are recalculated whenever those
//!   change.
//!
//! Sensitivities `dy/dx` can be requested for dependents `y` that are states
//! or intermediary variables, with respect to independents `x` that are
//! parameters or initial state values. Independents and log bindings are
//! tagged indices ([`VarRef`], [`Independent`]) resolved at access time, so
//! nothing holds a pointer into reallocatable storage.

mod luo_rudy;

pub use luo_rudy::{LuoRudy1991, LUO_RUDY_1991};

use nalgebra::DMatrix;
use thiserror::Error;

use crate::sinks::{FloatSink, MatrixSink, SinkError};

/// Error kinds for model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("logging initialized twice")]
    LoggingAlreadyInitialized,
    #[error("logging not initialized")]
    LoggingNotInitialized,
    #[error("unknown variables in log: {0:?}")]
    UnknownVariablesInLog(Vec<String>),
    #[error("append failed on logging sink")]
    LogAppendFailed(#[source] SinkError),
    #[error("append failed on sensitivity logging sink")]
    SensitivityLogAppendFailed(#[source] SinkError),
    #[error("sensitivity logging requested, but sensitivity calculations are not enabled")]
    NoSensitivitiesToLog,
    #[error("invalid pacing: {0}")]
    InvalidPacing(String),
    #[error("{name} expects {expected} values, got {actual}")]
    DimensionMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("independent index {0} out of range")]
    IndependentOutOfRange(usize),
}

/// Tagged address of a loggable model variable, resolved at access time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarRef {
    State(usize),
    Derivative(usize),
    Intermediary(usize),
    Time,
    Pace(usize),
}

/// An independent variable `x` of a sensitivity `dy/dx`: either a parameter
/// slot or the initial value of a state (referenced through its state slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Independent {
    Parameter(usize),
    InitialState(usize),
}

/// A dependent variable `y` of a sensitivity `dy/dx`: a state, or an
/// intermediary variable identified by its row in the `s_intermediary`
/// storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependent {
    State(usize),
    Intermediary(usize),
}

/// The sensitivity configuration of a compiled model: which outputs form the
/// rows and which independents form the columns of the logged matrix.
#[derive(Debug, Clone, Default)]
pub struct SensitivityLayout {
    pub dependents: Vec<Dependent>,
    pub independents: Vec<Independent>,
}

impl SensitivityLayout {
    pub fn none() -> Self {
        Self::default()
    }

    /// Number of rows of `s_intermediary` storage this layout needs.
    pub fn n_intermediary_rows(&self) -> usize {
        self.dependents
            .iter()
            .filter(|d| matches!(d, Dependent::Intermediary(_)))
            .count()
    }
}

/// Bound variables: external inputs to the model.
#[derive(Debug, Clone, Default)]
pub struct Bound {
    pub time: f64,
    pub pace: Vec<f64>,
    pub realtime: f64,
    pub evaluations: f64,
}

/// The numeric storage of one model instance.
#[derive(Debug, Clone)]
pub struct Variables {
    pub states: Vec<f64>,
    pub derivatives: Vec<f64>,
    pub intermediary: Vec<f64>,
    pub literals: Vec<f64>,
    pub literal_derived: Vec<f64>,
    pub parameters: Vec<f64>,
    pub parameter_derived: Vec<f64>,
    pub bound: Bound,
    /// State sensitivities, `ns_independents x n_states`, flat row-major.
    pub s_states: Vec<f64>,
    /// Intermediary-dependent sensitivities,
    /// `n_intermediary_rows x ns_independents`, flat row-major.
    pub s_intermediary: Vec<f64>,
}

/// A compiled-in model definition: sizes, defaults, names and the generated
/// evaluation code, all operating on a [`Variables`] block.
pub trait ModelDef: Sync {
    fn name(&self) -> &'static str;

    /// False for models solved without an ODE integrator (states stay fixed,
    /// only intermediary variables respond to the bound inputs).
    fn is_ode(&self) -> bool {
        true
    }

    fn n_states(&self) -> usize;
    fn n_intermediary(&self) -> usize;
    fn n_literals(&self) -> usize;
    fn n_literal_derived(&self) -> usize;
    fn n_parameters(&self) -> usize {
        0
    }
    fn n_parameter_derived(&self) -> usize {
        0
    }

    fn initial_states(&self) -> Vec<f64>;
    fn default_literals(&self) -> Vec<f64>;
    fn default_parameters(&self) -> Vec<f64> {
        Vec::new()
    }

    fn sensitivity(&self) -> SensitivityLayout {
        SensitivityLayout::none()
    }

    /// Recalculate all constants derived from literals.
    fn evaluate_literal_derived(&self, vars: &mut Variables);

    /// Recalculate all constants derived from sensitivity parameters.
    fn evaluate_parameter_derived(&self, _vars: &mut Variables) {}

    /// Calculate all intermediary variables and state derivatives, in
    /// topological order of the model's internal dataflow. Must be pure:
    /// repeated calls without intervening mutation produce identical output.
    fn evaluate_derivatives(&self, vars: &mut Variables);

    /// Calculate the sensitivities of intermediary dependents, assuming the
    /// state sensitivities in `s_states` are current.
    fn evaluate_sensitivity_outputs(&self, _vars: &mut Variables) {}

    /// Look up a fully qualified variable name (`"membrane.V"`,
    /// `"dot(ina.m)"`, `"engine.time"`, ...).
    fn variable(&self, name: &str) -> Option<VarRef>;
}

struct LogBindings {
    entries: Vec<(VarRef, Box<dyn FloatSink>)>,
    states: bool,
    derivatives: bool,
    intermediary: bool,
    bound: bool,
}

/// One cell instance: storage plus its compiled definition, plus the logging
/// bindings once configured.
pub struct Model {
    def: &'static dyn ModelDef,
    vars: Variables,
    sensitivity: SensitivityLayout,
    logging: Option<LogBindings>,
}

impl Model {
    /// Create a model with default literals, parameters and initial state.
    /// Literal-derived and parameter-derived constants are evaluated.
    pub fn new(def: &'static dyn ModelDef) -> Self {
        let sensitivity = def.sensitivity();
        let n_states = def.n_states();
        let ns = sensitivity.independents.len();
        let mut vars = Variables {
            states: def.initial_states(),
            derivatives: vec![0.0; n_states],
            intermediary: vec![0.0; def.n_intermediary()],
            literals: def.default_literals(),
            literal_derived: vec![0.0; def.n_literal_derived()],
            parameters: def.default_parameters(),
            parameter_derived: vec![0.0; def.n_parameter_derived()],
            bound: Bound::default(),
            s_states: vec![0.0; ns * n_states],
            s_intermediary: vec![0.0; sensitivity.n_intermediary_rows() * ns],
        };
        def.evaluate_literal_derived(&mut vars);
        def.evaluate_parameter_derived(&mut vars);
        Self {
            def,
            vars,
            sensitivity,
            logging: None,
        }
    }

    pub fn def(&self) -> &'static dyn ModelDef {
        self.def
    }

    pub fn is_ode(&self) -> bool {
        self.def.is_ode()
    }

    pub fn n_states(&self) -> usize {
        self.vars.states.len()
    }

    pub fn states(&self) -> &[f64] {
        &self.vars.states
    }

    pub fn derivatives(&self) -> &[f64] {
        &self.vars.derivatives
    }

    pub fn intermediary(&self) -> &[f64] {
        &self.vars.intermediary
    }

    pub fn literals(&self) -> &[f64] {
        &self.vars.literals
    }

    pub fn literal_derived(&self) -> &[f64] {
        &self.vars.literal_derived
    }

    pub fn parameters(&self) -> &[f64] {
        &self.vars.parameters
    }

    pub fn bound(&self) -> &Bound {
        &self.vars.bound
    }

    pub fn s_states(&self) -> &[f64] {
        &self.vars.s_states
    }

    pub fn sensitivity(&self) -> &SensitivityLayout {
        &self.sensitivity
    }

    pub fn has_sensitivities(&self) -> bool {
        !self.sensitivity.independents.is_empty()
    }

    /// Number of rows of the logged sensitivity matrix.
    pub fn ns_dependents(&self) -> usize {
        self.sensitivity.dependents.len()
    }

    /// Number of columns of the logged sensitivity matrix.
    pub fn ns_independents(&self) -> usize {
        self.sensitivity.independents.len()
    }

    /// Current value of the i-th independent: the parameter value, or the
    /// current value of the state whose initial value it refers to.
    pub fn independent_value(&self, i: usize) -> Result<f64, ModelError> {
        let independent = self
            .sensitivity
            .independents
            .get(i)
            .ok_or(ModelError::IndependentOutOfRange(i))?;
        Ok(match independent {
            Independent::Parameter(slot) => self.vars.parameters[*slot],
            Independent::InitialState(slot) => self.vars.states[*slot],
        })
    }

    /// (Re)allocate the vector of pacing values. Fails when an existing log
    /// binding refers to a pacing slot the new size would no longer hold.
    pub fn setup_pacing(&mut self, n_pace: usize) -> Result<(), ModelError> {
        if let Some(bindings) = &self.logging {
            for (var, _) in &bindings.entries {
                if let VarRef::Pace(slot) = var {
                    if *slot >= n_pace {
                        return Err(ModelError::InvalidPacing(format!(
                            "pacing slot {} is bound for logging, but only {} pacing values \
                             were configured",
                            slot, n_pace
                        )));
                    }
                }
            }
        }
        self.vars.bound.pace = vec![0.0; n_pace];
        Ok(())
    }

    /// Update the literal constants. On any change, the literal-derived and
    /// parameter-derived constants are recalculated.
    pub fn set_literals(&mut self, values: &[f64]) -> Result<(), ModelError> {
        check_len("literals", self.vars.literals.len(), values.len())?;
        if self.vars.literals != values {
            self.vars.literals.copy_from_slice(values);
            self.def.evaluate_literal_derived(&mut self.vars);
            self.def.evaluate_parameter_derived(&mut self.vars);
        }
        Ok(())
    }

    /// Update the sensitivity parameters. On any change, the
    /// parameter-derived constants are recalculated.
    pub fn set_parameters(&mut self, values: &[f64]) -> Result<(), ModelError> {
        check_len("parameters", self.vars.parameters.len(), values.len())?;
        if self.vars.parameters != values {
            self.vars.parameters.copy_from_slice(values);
            self.def.evaluate_parameter_derived(&mut self.vars);
        }
        Ok(())
    }

    /// Update the sensitivity parameters from a vector of independent
    /// variable values, ignoring the initial-state entries.
    ///
    /// Assumes parameters are ordered the same way as the independents.
    pub fn set_parameters_from_independents(
        &mut self,
        independents: &[f64],
    ) -> Result<(), ModelError> {
        check_len(
            "independents",
            self.sensitivity.independents.len(),
            independents.len(),
        )?;
        let mut changed = false;
        for (i, independent) in self.sensitivity.independents.iter().enumerate() {
            if let Independent::Parameter(slot) = independent {
                if self.vars.parameters[*slot] != independents[i] {
                    self.vars.parameters[*slot] = independents[i];
                    changed = true;
                }
            }
        }
        if changed {
            self.def.evaluate_parameter_derived(&mut self.vars);
        }
        Ok(())
    }

    /// Update the bound variables. `realtime` and `evaluations` are
    /// diagnostics and never affect evaluation results.
    pub fn set_bound(
        &mut self,
        time: f64,
        pace: &[f64],
        realtime: f64,
        evaluations: f64,
    ) -> Result<(), ModelError> {
        check_len("pace", self.vars.bound.pace.len(), pace.len())?;
        self.vars.bound.time = time;
        self.vars.bound.pace.copy_from_slice(pace);
        self.vars.bound.realtime = realtime;
        self.vars.bound.evaluations = evaluations;
        Ok(())
    }

    /// Update the state variables.
    pub fn set_states(&mut self, values: &[f64]) -> Result<(), ModelError> {
        check_len("states", self.vars.states.len(), values.len())?;
        if self.vars.states != values {
            self.vars.states.copy_from_slice(values);
        }
        Ok(())
    }

    /// Write the state sensitivities w.r.t. the i-th independent into row
    /// `i` of the flat `s_states` storage.
    pub fn set_state_sensitivities(&mut self, i: usize, row: &[f64]) -> Result<(), ModelError> {
        if i >= self.sensitivity.independents.len() {
            return Err(ModelError::IndependentOutOfRange(i));
        }
        let n = self.vars.states.len();
        check_len("state sensitivities", n, row.len())?;
        self.vars.s_states[i * n..(i + 1) * n].copy_from_slice(row);
        Ok(())
    }

    /// Calculate all intermediary variables and state derivatives for the
    /// current states, bound variables and constants.
    pub fn evaluate_derivatives(&mut self) {
        self.def.evaluate_derivatives(&mut self.vars);
    }

    /// Calculate the sensitivities of intermediary dependents from the
    /// current `s_states`.
    pub fn evaluate_sensitivity_outputs(&mut self) {
        self.def.evaluate_sensitivity_outputs(&mut self.vars);
    }

    /// Bind every named variable in the descriptor to its sink. Fails if any
    /// name is unknown, or if logging is already initialized.
    ///
    /// Bindings are ordered states, derivatives, bound variables,
    /// intermediary variables (each group in slot order), independent of
    /// descriptor order.
    pub fn initialize_logging(
        &mut self,
        descriptor: Vec<(String, Box<dyn FloatSink>)>,
    ) -> Result<(), ModelError> {
        if self.logging.is_some() {
            return Err(ModelError::LoggingAlreadyInitialized);
        }

        let mut entries = Vec::with_capacity(descriptor.len());
        let mut unknown = Vec::new();
        for (name, sink) in descriptor {
            match self.def.variable(&name) {
                Some(var) => entries.push((var, sink)),
                None => unknown.push(name),
            }
        }
        if !unknown.is_empty() {
            return Err(ModelError::UnknownVariablesInLog(unknown));
        }

        entries.sort_by_key(|(var, _)| binding_rank(*var));

        let bindings = LogBindings {
            states: entries
                .iter()
                .any(|(v, _)| matches!(v, VarRef::State(_))),
            derivatives: entries
                .iter()
                .any(|(v, _)| matches!(v, VarRef::Derivative(_))),
            intermediary: entries
                .iter()
                .any(|(v, _)| matches!(v, VarRef::Intermediary(_))),
            bound: entries
                .iter()
                .any(|(v, _)| matches!(v, VarRef::Time | VarRef::Pace(_))),
            entries,
        };
        self.logging = Some(bindings);
        Ok(())
    }

    /// Undo `initialize_logging`, allowing logging to be configured again.
    pub fn deinitialize_logging(&mut self) -> Result<(), ModelError> {
        if self.logging.is_none() {
            return Err(ModelError::LoggingNotInitialized);
        }
        self.logging = None;
        Ok(())
    }

    pub fn logging_initialized(&self) -> bool {
        self.logging.is_some()
    }

    pub fn logging_states(&self) -> bool {
        self.logging.as_ref().map_or(false, |l| l.states)
    }

    pub fn logging_derivatives(&self) -> bool {
        self.logging.as_ref().map_or(false, |l| l.derivatives)
    }

    pub fn logging_intermediary(&self) -> bool {
        self.logging.as_ref().map_or(false, |l| l.intermediary)
    }

    pub fn logging_bound(&self) -> bool {
        self.logging.as_ref().map_or(false, |l| l.bound)
    }

    /// Number of values already appended to the first bound sink. Used to
    /// decide whether a dynamic-logging run continues an existing log.
    pub fn logged_so_far(&self) -> Option<usize> {
        self.logging
            .as_ref()
            .and_then(|l| l.entries.first())
            .map(|(_, sink)| sink.len())
    }

    /// Append the current value of each bound variable to its sink, in
    /// binding order.
    ///
    /// This does not update any values; the caller decides what "current"
    /// means (typically by evaluating the RHS first).
    pub fn log(&mut self) -> Result<(), ModelError> {
        let bindings = self
            .logging
            .as_mut()
            .ok_or(ModelError::LoggingNotInitialized)?;
        for (var, sink) in bindings.entries.iter_mut() {
            let value = read_var(&self.vars, *var);
            sink.append(value).map_err(ModelError::LogAppendFailed)?;
        }
        Ok(())
    }

    /// Build the current `ns_dependents x ns_independents` sensitivity
    /// matrix: state rows read from `s_states`, intermediary rows from
    /// `s_intermediary`.
    pub fn sensitivity_matrix(&self) -> Result<DMatrix<f64>, ModelError> {
        if !self.has_sensitivities() {
            return Err(ModelError::NoSensitivitiesToLog);
        }
        let n = self.vars.states.len();
        let ns = self.sensitivity.independents.len();
        let nd = self.sensitivity.dependents.len();
        let mut matrix = DMatrix::zeros(nd, ns);
        for (row, dependent) in self.sensitivity.dependents.iter().enumerate() {
            for col in 0..ns {
                matrix[(row, col)] = match dependent {
                    Dependent::State(k) => self.vars.s_states[col * n + k],
                    Dependent::Intermediary(r) => self.vars.s_intermediary[r * ns + col],
                };
            }
        }
        Ok(matrix)
    }

    /// Append a snapshot of the sensitivity matrix to the given sink.
    pub fn log_sensitivity_matrix(&self, sink: &mut dyn MatrixSink) -> Result<(), ModelError> {
        let matrix = self.sensitivity_matrix()?;
        sink.append_matrix(&matrix)
            .map_err(ModelError::SensitivityLogAppendFailed)
    }
}

fn check_len(name: &'static str, expected: usize, actual: usize) -> Result<(), ModelError> {
    if expected != actual {
        return Err(ModelError::DimensionMismatch {
            name,
            expected,
            actual,
        });
    }
    Ok(())
}

fn binding_rank(var: VarRef) -> (u8, usize) {
    match var {
        VarRef::State(i) => (0, i),
        VarRef::Derivative(i) => (1, i),
        VarRef::Time => (2, 0),
        VarRef::Pace(i) => (2, 1 + i),
        VarRef::Intermediary(i) => (3, i),
    }
}

fn read_var(vars: &Variables, var: VarRef) -> f64 {
    match var {
        VarRef::State(i) => vars.states[i],
        VarRef::Derivative(i) => vars.derivatives[i],
        VarRef::Intermediary(i) => vars.intermediary[i],
        VarRef::Time => vars.bound.time,
        VarRef::Pace(i) => vars.bound.pace[i],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::Series;

    #[test]
    fn test_create_sets_defaults() {
        let model = Model::new(&LUO_RUDY_1991);
        assert_eq!(model.n_states(), 8);
        assert_eq!(model.states()[0], -84.5286);
        assert_eq!(model.literals().len(), 17);
        assert_eq!(model.literal_derived().len(), 6);
        assert!(!model.has_sensitivities());
        // RTF = R * T / F
        let rtf = 8314.0 * 310.0 / 96500.0;
        assert_eq!(model.literal_derived()[0], rtf);
    }

    #[test]
    fn test_set_states_and_bound_roundtrip() {
        let mut model = Model::new(&LUO_RUDY_1991);
        model.setup_pacing(1).unwrap();
        let states: Vec<f64> = (0..8).map(|i| 0.1 * i as f64 - 40.0).collect();
        model.set_states(&states).unwrap();
        model.set_bound(12.5, &[1.0], 0.0, 3.0).unwrap();
        model.evaluate_derivatives();

        // Inputs are untouched by evaluation.
        assert_eq!(model.states(), &states[..]);
        assert_eq!(model.bound().time, 12.5);
        assert_eq!(model.bound().pace, vec![1.0]);
    }

    #[test]
    fn test_evaluate_derivatives_is_pure() {
        let mut model = Model::new(&LUO_RUDY_1991);
        model.setup_pacing(1).unwrap();
        model.set_bound(0.0, &[0.0], 0.0, 0.0).unwrap();
        model.evaluate_derivatives();
        let first: Vec<f64> = model.derivatives().to_vec();
        let inter_first: Vec<f64> = model.intermediary().to_vec();
        model.evaluate_derivatives();
        assert_eq!(model.derivatives(), &first[..]);
        assert_eq!(model.intermediary(), &inter_first[..]);
    }

    #[test]
    fn test_set_literals_recomputes_derived() {
        let mut model = Model::new(&LUO_RUDY_1991);
        let mut literals = model.literals().to_vec();
        literals[2] = 4.0; // K_o
        model.set_literals(&literals).unwrap();
        // gK = 0.282 * sqrt(K_o / 5.4)
        let expected = 0.282 * (4.0f64 / 5.4).sqrt();
        assert_eq!(model.literal_derived()[1], expected);
    }

    #[test]
    fn test_logging_lifecycle() {
        let mut model = Model::new(&LUO_RUDY_1991);
        model.setup_pacing(1).unwrap();

        let descriptor = vec![(
            "membrane.V".to_string(),
            Box::new(Series::new()) as Box<dyn FloatSink>,
        )];
        model.initialize_logging(descriptor).unwrap();
        assert!(model.logging_states());
        assert!(!model.logging_derivatives());

        let again = vec![(
            "membrane.V".to_string(),
            Box::new(Series::new()) as Box<dyn FloatSink>,
        )];
        assert!(matches!(
            model.initialize_logging(again),
            Err(ModelError::LoggingAlreadyInitialized)
        ));

        model.deinitialize_logging().unwrap();
        assert!(matches!(
            model.deinitialize_logging(),
            Err(ModelError::LoggingNotInitialized)
        ));
    }

    #[test]
    fn test_unknown_variables_rejected() {
        let mut model = Model::new(&LUO_RUDY_1991);
        let descriptor = vec![
            (
                "membrane.V".to_string(),
                Box::new(Series::new()) as Box<dyn FloatSink>,
            ),
            (
                "no.such_variable".to_string(),
                Box::new(Series::new()) as Box<dyn FloatSink>,
            ),
        ];
        match model.initialize_logging(descriptor) {
            Err(ModelError::UnknownVariablesInLog(names)) => {
                assert_eq!(names, vec!["no.such_variable".to_string()]);
            }
            other => panic!("expected UnknownVariablesInLog, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_log_appends_in_binding_order() {
        let mut model = Model::new(&LUO_RUDY_1991);
        model.setup_pacing(1).unwrap();
        model.set_bound(3.0, &[0.5], 0.0, 0.0).unwrap();
        model.evaluate_derivatives();

        let time = Series::new();
        let vm = Series::new();
        let descriptor = vec![
            (
                "engine.time".to_string(),
                Box::new(time.clone()) as Box<dyn FloatSink>,
            ),
            (
                "membrane.V".to_string(),
                Box::new(vm.clone()) as Box<dyn FloatSink>,
            ),
        ];
        model.initialize_logging(descriptor).unwrap();
        model.log().unwrap();
        model.log().unwrap();

        assert_eq!(time.values(), vec![3.0, 3.0]);
        assert_eq!(vm.values(), vec![-84.5286, -84.5286]);
    }

    #[test]
    fn test_setup_pacing_respects_log_bindings() {
        let mut model = Model::new(&LUO_RUDY_1991);
        model.setup_pacing(1).unwrap();
        let descriptor = vec![(
            "engine.pace".to_string(),
            Box::new(Series::new()) as Box<dyn FloatSink>,
        )];
        model.initialize_logging(descriptor).unwrap();

        // Shrinking the pace vector would orphan the binding.
        assert!(matches!(
            model.setup_pacing(0),
            Err(ModelError::InvalidPacing(_))
        ));
        // Growing it is fine.
        model.setup_pacing(2).unwrap();
    }

    #[test]
    fn test_sensitivity_matrix_requires_sensitivities() {
        let model = Model::new(&LUO_RUDY_1991);
        assert!(matches!(
            model.sensitivity_matrix(),
            Err(ModelError::NoSensitivitiesToLog)
        ));
    }
}
