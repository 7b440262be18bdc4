//! The 1991 Luo-Rudy ventricular action potential model
//!
//! Eight states, 27 intermediary variables, 17 literal constants and six
//! literal-derived constants. The membrane equation sums six currents (INa,
//! IK, IK1, IKp, ICa, Ib) plus a diffusion term and the pacing-driven
//! stimulus `i_stim = pace * stim_amplitude`.

use super::{ModelDef, VarRef, Variables};

/// Shared instance, for use as `Model::new(&LUO_RUDY_1991)`.
pub static LUO_RUDY_1991: LuoRudy1991 = LuoRudy1991;

/// Compiled definition of the Luo-Rudy 1991 model.
#[derive(Debug, Clone, Copy)]
pub struct LuoRudy1991;

// States
const V: usize = 0;
const M: usize = 1;
const H: usize = 2;
const J: usize = 3;
const D: usize = 4;
const F: usize = 5;
const X: usize = 6;
const CA_I: usize = 7;

// Intermediary variables
const I_ION: usize = 0;
const I_STIM: usize = 1;
const IK_X_ALPHA: usize = 2;
const IK_X_BETA: usize = 3;
const XI: usize = 4;
const IK: usize = 5;
const A: usize = 6;
const INA_M_ALPHA: usize = 7;
const INA_M_BETA: usize = 8;
const INA_H_ALPHA: usize = 9;
const INA_H_BETA: usize = 10;
const INA_J_ALPHA: usize = 11;
const INA_J_BETA: usize = 12;
const INA: usize = 13;
const KP: usize = 14;
const IKP: usize = 15;
const ICA_E: usize = 16;
const ICA_D_ALPHA: usize = 17;
const ICA_D_BETA: usize = 18;
const ICA_F_ALPHA: usize = 19;
const ICA_F_BETA: usize = 20;
const ICA: usize = 21;
const G: usize = 22;
const IK1_G_ALPHA: usize = 23;
const IK1_G_BETA: usize = 24;
const IK1: usize = 25;
const IB: usize = 26;

// Literals
const CA_O: usize = 0;
const K_I: usize = 1;
const K_O: usize = 2;
const NA_I: usize = 3;
const NA_O: usize = 4;
const FARADAY: usize = 5;
const R_GAS: usize = 6;
const T: usize = 7;
const EB: usize = 8;
const GB: usize = 9;
const GCA: usize = 10;
const PNA_K: usize = 11;
const GNA: usize = 12;
const GKP: usize = 13;
const C: usize = 14;
const I_DIFF: usize = 15;
const STIM_AMPLITUDE: usize = 16;

// Literal-derived constants
const RTF: usize = 0;
const GK: usize = 1;
const IK_E: usize = 2;
const IK1_E: usize = 3;
const GK1: usize = 4;
const ENA: usize = 5;

impl ModelDef for LuoRudy1991 {
    fn name(&self) -> &'static str {
        "luo-1991"
    }

    fn n_states(&self) -> usize {
        8
    }

    fn n_intermediary(&self) -> usize {
        27
    }

    fn n_literals(&self) -> usize {
        17
    }

    fn n_literal_derived(&self) -> usize {
        6
    }

    fn initial_states(&self) -> Vec<f64> {
        vec![-84.5286, 0.0017, 0.9832, 0.995484, 3e-6, 1.0, 0.0057, 0.0002]
    }

    fn default_literals(&self) -> Vec<f64> {
        vec![
            1.8,      // Ca_o
            145.0,    // K_i
            5.4,      // K_o
            10.0,     // Na_i
            140.0,    // Na_o
            96500.0,  // F
            8314.0,   // R
            310.0,    // T
            -59.87,   // Eb
            0.03921,  // gb
            0.09,     // gCa
            0.01833,  // PNa_K
            16.0,     // gNa
            0.0183,   // gKp
            1.0,      // C
            0.0,      // i_diff
            -80.0,    // stim_amplitude
        ]
    }

    fn evaluate_literal_derived(&self, vars: &mut Variables) {
        let lit = &vars.literals;
        let rtf = lit[R_GAS] * lit[T] / lit[FARADAY];
        let derived = &mut vars.literal_derived;
        derived[RTF] = rtf;
        derived[GK] = 0.282 * (lit[K_O] / 5.4).sqrt();
        derived[IK_E] = rtf
            * ((lit[K_O] + lit[PNA_K] * lit[NA_O]) / (lit[K_I] + lit[PNA_K] * lit[NA_I])).ln();
        derived[IK1_E] = rtf * (lit[K_O] / lit[K_I]).ln();
        derived[GK1] = 0.6047 * (lit[K_O] / 5.4).sqrt();
        derived[ENA] = rtf * (lit[NA_O] / lit[NA_I]).ln();
    }

    fn evaluate_derivatives(&self, vars: &mut Variables) {
        let v = vars.states[V];
        let m = vars.states[M];
        let h = vars.states[H];
        let j = vars.states[J];
        let d = vars.states[D];
        let f = vars.states[F];
        let x = vars.states[X];
        let ca_i = vars.states[CA_I];
        let pace = vars.bound.pace.first().copied().unwrap_or(0.0);
        let lit = &vars.literals;
        let con = &vars.literal_derived;
        let inter = &mut vars.intermediary;
        let deriv = &mut vars.derivatives;

        // ib
        inter[IB] = lit[GB] * (v - lit[EB]);

        // ica
        inter[ICA_E] = 7.7 - 13.0287 * (ca_i / lit[CA_O]).ln();
        inter[ICA_D_ALPHA] =
            0.095 * ((-0.01) * (v - 5.0)).exp() / (1.0 + ((-0.072) * (v - 5.0)).exp());
        inter[ICA_D_BETA] =
            0.07 * ((-0.017) * (v + 44.0)).exp() / (1.0 + (0.05 * (v + 44.0)).exp());
        deriv[D] = inter[ICA_D_ALPHA] * (1.0 - d) - inter[ICA_D_BETA] * d;
        inter[ICA_F_ALPHA] =
            0.012 * ((-0.008) * (v + 28.0)).exp() / (1.0 + (0.15 * (v + 28.0)).exp());
        inter[ICA_F_BETA] =
            0.0065 * ((-0.02) * (v + 30.0)).exp() / (1.0 + ((-0.2) * (v + 30.0)).exp());
        deriv[F] = inter[ICA_F_ALPHA] * (1.0 - f) - inter[ICA_F_BETA] * f;
        inter[ICA] = lit[GCA] * d * f * (v - inter[ICA_E]);
        deriv[CA_I] = (-0.0001) * inter[ICA] + 0.07 * (0.0001 - ca_i);

        // ik
        inter[XI] = if v < -100.0 {
            1.0
        } else if v == -77.0 {
            2.837 * 0.04 / (0.04 * (v + 35.0)).exp()
        } else {
            2.837 * ((0.04 * (v + 77.0)).exp() - 1.0) / ((v + 77.0) * (0.04 * (v + 35.0)).exp())
        };
        inter[IK_X_ALPHA] =
            0.0005 * (0.083 * (v + 50.0)).exp() / (1.0 + (0.057 * (v + 50.0)).exp());
        inter[IK_X_BETA] =
            0.0013 * ((-0.06) * (v + 20.0)).exp() / (1.0 + ((-0.04) * (v + 20.0)).exp());
        deriv[X] = inter[IK_X_ALPHA] * (1.0 - x) - inter[IK_X_BETA] * x;
        inter[IK] = con[GK] * inter[XI] * x * (v - con[IK_E]);

        // ik1
        inter[IK1_G_ALPHA] = 1.02 / (1.0 + (0.2385 * (v - con[IK1_E] - 59.215)).exp());
        inter[IK1_G_BETA] = (0.49124 * (0.08032 * (v - con[IK1_E] + 5.476)).exp()
            + 1.0 * (0.06175 * (v - con[IK1_E] - 594.31)).exp())
            / (1.0 + ((-0.5143) * (v - con[IK1_E] + 4.753)).exp());
        inter[G] = inter[IK1_G_ALPHA] / (inter[IK1_G_ALPHA] + inter[IK1_G_BETA]);
        inter[IK1] = con[GK1] * inter[G] * (v - con[IK1_E]);

        // ina
        inter[A] = 1.0 - 1.0 / (1.0 + ((-(v + 40.0)) / 0.24).exp());
        inter[INA_M_ALPHA] = 0.32 * (v + 47.13) / (1.0 - ((-0.1) * (v + 47.13)).exp());
        inter[INA_M_BETA] = 0.08 * ((-v) / 11.0).exp();
        deriv[M] = inter[INA_M_ALPHA] * (1.0 - m) - inter[INA_M_BETA] * m;
        inter[INA] = lit[GNA] * m.powi(3) * h * j * (v - con[ENA]);
        inter[INA_H_ALPHA] = inter[A] * 0.135 * ((80.0 + v) / (-6.8)).exp();
        inter[INA_H_BETA] = inter[A]
            * (3.56 * (0.079 * v).exp() + 310000.0 * (0.35 * v).exp())
            + (1.0 - inter[A]) / (0.13 * (1.0 + ((v + 10.66) / (-11.1)).exp()));
        deriv[H] = inter[INA_H_ALPHA] * (1.0 - h) - inter[INA_H_BETA] * h;
        inter[INA_J_ALPHA] = inter[A]
            * ((-127140.0) * (0.2444 * v).exp() - 3.474e-5 * ((-0.04391) * v).exp())
            * (v + 37.78)
            / (1.0 + (0.311 * (v + 79.23)).exp());
        inter[INA_J_BETA] = inter[A]
            * (0.1212 * ((-0.01052) * v).exp() / (1.0 + ((-0.1378) * (v + 40.14)).exp()))
            + (1.0 - inter[A])
                * (0.3 * ((-2.535e-7) * v).exp() / (1.0 + ((-0.1) * (v + 32.0)).exp()));
        deriv[J] = inter[INA_J_ALPHA] * (1.0 - j) - inter[INA_J_BETA] * j;

        // ikp
        inter[KP] = 1.0 / (1.0 + ((7.488 - v) / 5.98).exp());
        inter[IKP] = lit[GKP] * inter[KP] * (v - con[IK1_E]);

        // membrane
        inter[I_ION] =
            inter[INA] + inter[IK] + inter[IB] + inter[IKP] + inter[IK1] + inter[ICA];
        inter[I_STIM] = pace * lit[STIM_AMPLITUDE];
        deriv[V] = (-(1.0 / lit[C])) * (inter[I_ION] + lit[I_DIFF] + inter[I_STIM]);
    }

    fn variable(&self, name: &str) -> Option<VarRef> {
        let var = match name {
            // States
            "membrane.V" => VarRef::State(V),
            "ina.m" => VarRef::State(M),
            "ina.h" => VarRef::State(H),
            "ina.j" => VarRef::State(J),
            "ica.d" => VarRef::State(D),
            "ica.f" => VarRef::State(F),
            "ik.x" => VarRef::State(X),
            "ica.Ca_i" => VarRef::State(CA_I),
            // Derivatives
            "dot(membrane.V)" => VarRef::Derivative(V),
            "dot(ina.m)" => VarRef::Derivative(M),
            "dot(ina.h)" => VarRef::Derivative(H),
            "dot(ina.j)" => VarRef::Derivative(J),
            "dot(ica.d)" => VarRef::Derivative(D),
            "dot(ica.f)" => VarRef::Derivative(F),
            "dot(ik.x)" => VarRef::Derivative(X),
            "dot(ica.Ca_i)" => VarRef::Derivative(CA_I),
            // Bound variables
            "engine.time" => VarRef::Time,
            "engine.pace" => VarRef::Pace(0),
            // Intermediary variables
            "membrane.i_ion" => VarRef::Intermediary(I_ION),
            "membrane.i_stim" => VarRef::Intermediary(I_STIM),
            "ik.x.alpha" => VarRef::Intermediary(IK_X_ALPHA),
            "ik.x.beta" => VarRef::Intermediary(IK_X_BETA),
            "ik.xi" => VarRef::Intermediary(XI),
            "ik.IK" => VarRef::Intermediary(IK),
            "ina.a" => VarRef::Intermediary(A),
            "ina.m.alpha" => VarRef::Intermediary(INA_M_ALPHA),
            "ina.m.beta" => VarRef::Intermediary(INA_M_BETA),
            "ina.h.alpha" => VarRef::Intermediary(INA_H_ALPHA),
            "ina.h.beta" => VarRef::Intermediary(INA_H_BETA),
            "ina.j.alpha" => VarRef::Intermediary(INA_J_ALPHA),
            "ina.j.beta" => VarRef::Intermediary(INA_J_BETA),
            "ina.INa" => VarRef::Intermediary(INA),
            "ikp.Kp" => VarRef::Intermediary(KP),
            "ikp.IKp" => VarRef::Intermediary(IKP),
            "ica.E" => VarRef::Intermediary(ICA_E),
            "ica.d.alpha" => VarRef::Intermediary(ICA_D_ALPHA),
            "ica.d.beta" => VarRef::Intermediary(ICA_D_BETA),
            "ica.f.alpha" => VarRef::Intermediary(ICA_F_ALPHA),
            "ica.f.beta" => VarRef::Intermediary(ICA_F_BETA),
            "ica.ICa" => VarRef::Intermediary(ICA),
            "ik1.g" => VarRef::Intermediary(G),
            "ik1.g.alpha" => VarRef::Intermediary(IK1_G_ALPHA),
            "ik1.g.beta" => VarRef::Intermediary(IK1_G_BETA),
            "ik1.IK1" => VarRef::Intermediary(IK1),
            "ib.Ib" => VarRef::Intermediary(IB),
            _ => return None,
        };
        Some(var)
    }
}
