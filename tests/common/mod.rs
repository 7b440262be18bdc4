//! Shared fixtures for integration tests: small compiled model definitions
//! standing in for other generated models, and a sink that always fails.
#![allow(dead_code)]

use cardiosim::model::{Dependent, Independent, ModelDef, SensitivityLayout, VarRef, Variables};
use cardiosim::sinks::{FloatSink, SinkError};

/// Two-state decay model with one sensitivity parameter:
///
/// ```text
/// flux = k * a
/// dot(a) = -k * a + pace * amp
/// dot(b) = flux - b / tau_b
/// ```
///
/// Sensitivities are calculated for dependents `a` and `flux` w.r.t. the
/// parameter `k` and the initial value of `a`. Without pacing the solution
/// is `a(t) = a0 exp(-k t)`, giving analytic sensitivities
/// `da/dk = -t a0 exp(-k t)` and `da/da0 = exp(-k t)`.
pub struct DecayModel;

pub static DECAY: DecayModel = DecayModel;

const A: usize = 0;
const B: usize = 1;
const PULSE: usize = 0;
const FLUX: usize = 1;
const AMP: usize = 0;
const TAU_B: usize = 1;
const INV_TAU_B: usize = 0;
const K: usize = 0;
const NEG_K: usize = 0;

impl ModelDef for DecayModel {
    fn name(&self) -> &'static str {
        "decay"
    }

    fn n_states(&self) -> usize {
        2
    }

    fn n_intermediary(&self) -> usize {
        2
    }

    fn n_literals(&self) -> usize {
        2
    }

    fn n_literal_derived(&self) -> usize {
        1
    }

    fn n_parameters(&self) -> usize {
        1
    }

    fn n_parameter_derived(&self) -> usize {
        1
    }

    fn initial_states(&self) -> Vec<f64> {
        vec![1.0, 0.0]
    }

    fn default_literals(&self) -> Vec<f64> {
        vec![1.0, 2.0]
    }

    fn default_parameters(&self) -> Vec<f64> {
        vec![0.5]
    }

    fn sensitivity(&self) -> SensitivityLayout {
        SensitivityLayout {
            dependents: vec![Dependent::State(A), Dependent::Intermediary(0)],
            independents: vec![Independent::Parameter(K), Independent::InitialState(A)],
        }
    }

    fn evaluate_literal_derived(&self, vars: &mut Variables) {
        vars.literal_derived[INV_TAU_B] = 1.0 / vars.literals[TAU_B];
    }

    fn evaluate_parameter_derived(&self, vars: &mut Variables) {
        vars.parameter_derived[NEG_K] = -vars.parameters[K];
    }

    fn evaluate_derivatives(&self, vars: &mut Variables) {
        let a = vars.states[A];
        let b = vars.states[B];
        let pace = vars.bound.pace.first().copied().unwrap_or(0.0);

        vars.intermediary[PULSE] = pace * vars.literals[AMP];
        vars.intermediary[FLUX] = vars.parameters[K] * a;
        vars.derivatives[A] = vars.parameter_derived[NEG_K] * a + vars.intermediary[PULSE];
        vars.derivatives[B] = vars.intermediary[FLUX] - vars.literal_derived[INV_TAU_B] * b;
    }

    fn evaluate_sensitivity_outputs(&self, vars: &mut Variables) {
        // d(flux)/dx_j = (d k / d x_j) a + k * d a / d x_j
        let ns = 2;
        let n = 2;
        let a = vars.states[A];
        let k = vars.parameters[K];
        for j in 0..ns {
            let direct = if j == 0 { a } else { 0.0 };
            vars.s_intermediary[j] = direct + k * vars.s_states[j * n + A];
        }
    }

    fn variable(&self, name: &str) -> Option<VarRef> {
        let var = match name {
            "cell.a" => VarRef::State(A),
            "cell.b" => VarRef::State(B),
            "dot(cell.a)" => VarRef::Derivative(A),
            "dot(cell.b)" => VarRef::Derivative(B),
            "engine.time" => VarRef::Time,
            "engine.pace" => VarRef::Pace(0),
            "stim.pulse" => VarRef::Intermediary(PULSE),
            "cell.flux" => VarRef::Intermediary(FLUX),
            _ => return None,
        };
        Some(var)
    }
}

/// A model without ODEs: the state never changes, and the only interesting
/// output is an intermediary variable following the pacing input.
pub struct ConstantModel;

pub static CONSTANT: ConstantModel = ConstantModel;

impl ModelDef for ConstantModel {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn is_ode(&self) -> bool {
        false
    }

    fn n_states(&self) -> usize {
        1
    }

    fn n_intermediary(&self) -> usize {
        1
    }

    fn n_literals(&self) -> usize {
        1
    }

    fn n_literal_derived(&self) -> usize {
        0
    }

    fn initial_states(&self) -> Vec<f64> {
        vec![1.5]
    }

    fn default_literals(&self) -> Vec<f64> {
        vec![2.0]
    }

    fn evaluate_literal_derived(&self, _vars: &mut Variables) {}

    fn evaluate_derivatives(&self, vars: &mut Variables) {
        let pace = vars.bound.pace.first().copied().unwrap_or(0.0);
        vars.intermediary[0] = pace * vars.literals[0];
        vars.derivatives[0] = 0.0;
    }

    fn variable(&self, name: &str) -> Option<VarRef> {
        let var = match name {
            "cell.c" => VarRef::State(0),
            "env.level" => VarRef::Intermediary(0),
            "engine.time" => VarRef::Time,
            "engine.pace" => VarRef::Pace(0),
            _ => return None,
        };
        Some(var)
    }
}

/// A float sink whose append always fails.
#[derive(Debug, Clone, Default)]
pub struct FailingSink;

impl FloatSink for FailingSink {
    fn append(&mut self, _value: f64) -> Result<(), SinkError> {
        Err(SinkError("sink is read-only".to_string()))
    }

    fn len(&self) -> usize {
        0
    }

    fn value_at(&self, _index: usize) -> Option<f64> {
        None
    }
}
