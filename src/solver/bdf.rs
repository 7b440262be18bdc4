//! Variable-step, variable-order BDF core
//!
//! Backward differentiation formulas of orders 1-5 in the
//! backward-difference formulation of Shampine and Reichelt: the solution
//! history is held as an array of scaled backward differences `D`, predicted
//! forward by accumulation, and corrected by a modified Newton iteration on
//!
//! `y_new = y_predict + d`,  `d = c * f(t_new, y_new) - psi - d`
//!
//! with iteration matrix `I - c * J`. The Jacobian is approximated by
//! forward differences and reused until a Newton failure with a stale
//! Jacobian forces a refresh; the LU factorization is redone whenever the
//! step size, order or Jacobian changes.
//!
//! Error control uses the per-component scale `atol_i + rtol * |y_i|`; a
//! rejected step shrinks `h` and rescales `D`. After `order + 1` steps at
//! constant step size the order is adapted by comparing error estimates at
//! the neighboring orders.
//!
//! Dense output evaluates the backward-difference interpolation polynomial
//! over the most recent step; the previous step's polynomial is retained as
//! well, so a caller that was handed a root inside a step can still request
//! times shortly before the current window.

use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use super::{RhsFn, SolverError};

const MAX_ORDER: usize = 5;
const NEWTON_MAXITER: usize = 4;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 10.0;
const KAPPA: [f64; MAX_ORDER + 1] = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];

/// Root-finding configuration: one scalar `g(t, y) = y[index] - threshold`.
#[derive(Debug, Clone, Copy)]
pub struct RootSpec {
    pub index: usize,
    pub threshold: f64,
}

/// Solver configuration.
#[derive(Debug, Clone)]
pub struct BdfOptions {
    /// Absolute tolerance (default 1e-6).
    pub abs_tol: f64,
    /// Relative tolerance (default 1e-4).
    pub rel_tol: f64,
    /// Per-component absolute tolerances; overrides `abs_tol` when set.
    pub abs_tol_vector: Option<DVector<f64>>,
    /// Maximum step size, 0 for unbounded.
    pub max_step: f64,
    /// Minimum step size, 0 for unbounded.
    pub min_step: f64,
    /// Optional root function.
    pub root: Option<RootSpec>,
}

impl Default for BdfOptions {
    fn default() -> Self {
        Self {
            abs_tol: 1e-6,
            rel_tol: 1e-4,
            abs_tol_vector: None,
            max_step: 0.0,
            min_step: 0.0,
            root: None,
        }
    }
}

/// Result of a one-step advance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// An internal step completed; the reported time is its endpoint, which
    /// may lie beyond any horizon the caller had in mind.
    Advanced(f64),
    /// The root function changed sign; the reported time and state are at
    /// the crossing, inside the current internal step.
    Root { t: f64, direction: i32 },
}

/// Dense-output data for one completed step.
struct DenseWindow {
    t_old: f64,
    t_new: f64,
    h: f64,
    order: usize,
    d: Vec<DVector<f64>>,
}

impl DenseWindow {
    fn contains(&self, t: f64) -> bool {
        let fuzz = 100.0 * f64::EPSILON * (self.t_new.abs() + self.h.abs()).max(1.0);
        t >= self.t_old - fuzz && t <= self.t_new + fuzz
    }

    /// Evaluate the interpolation polynomial at `t`.
    fn eval(&self, t: f64, out: &mut DVector<f64>) {
        out.copy_from(&self.d[0]);
        let mut p = 1.0;
        for j in 1..=self.order {
            let node = self.t_new - (j as f64 - 1.0) * self.h;
            p *= (t - node) / (j as f64 * self.h);
            out.axpy(p, &self.d[j], 1.0);
        }
    }
}

struct RootState {
    index: usize,
    threshold: f64,
    /// Value of g at the last examined point.
    g_last: f64,
    /// Time up to which the current window has been examined.
    scan_from: f64,
}

/// The BDF solver.
pub struct Bdf {
    n: usize,
    t: f64,
    y: DVector<f64>,
    d: Vec<DVector<f64>>,
    order: usize,
    h_abs: f64,
    max_step: f64,
    min_step: f64,
    rtol: f64,
    atol: DVector<f64>,
    newton_tol: f64,
    jac: Option<DMatrix<f64>>,
    lu: Option<LU<f64, Dyn, Dyn>>,
    current_jac: bool,
    n_equal_steps: usize,
    gamma: [f64; MAX_ORDER + 1],
    alpha: [f64; MAX_ORDER + 1],
    error_const: [f64; MAX_ORDER + 1],
    dense: Option<DenseWindow>,
    dense_prev: Option<DenseWindow>,
    root: Option<RootState>,
    pending_root_scan: bool,
    reported_t: f64,
    reported_y: DVector<f64>,
    n_accepted: u64,
    warnings: Vec<String>,
    hnil_count: u32,
}

/// Warnings about a step size at the limit of time precision are reported
/// at most this many times per solver instance.
const MAX_HNIL_WARNINGS: u32 = 10;

/// Why the last step attempt was rejected. Decides which error is reported
/// when the step size underflows the minimum: a corrector that cannot
/// converge is a different failure from an error estimate that stays too
/// large.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFailure {
    Convergence,
    Accuracy,
}

impl Bdf {
    /// Create a solver at `(t0, y0)`. The startup step size is chosen from
    /// the RHS, aiming at `horizon`.
    pub fn new(
        t0: f64,
        y0: DVector<f64>,
        horizon: f64,
        options: BdfOptions,
        rhs: &mut RhsFn<'_>,
    ) -> Result<Self, SolverError> {
        let n = y0.len();
        let atol = match options.abs_tol_vector {
            Some(v) => {
                if v.len() != n {
                    return Err(SolverError::InvalidInput(format!(
                        "absolute tolerance vector has length {}, expected {}",
                        v.len(),
                        n
                    )));
                }
                v
            }
            None => DVector::from_element(n, options.abs_tol),
        };
        if options.rel_tol <= 0.0 || options.abs_tol <= 0.0 {
            return Err(SolverError::InvalidInput(
                "tolerances must be positive".to_string(),
            ));
        }
        if let Some(spec) = options.root {
            if spec.index >= n {
                return Err(SolverError::InvalidInput(format!(
                    "root-finding index {} out of range for {} states",
                    spec.index, n
                )));
            }
        }

        let mut gamma = [0.0; MAX_ORDER + 1];
        let mut alpha = [0.0; MAX_ORDER + 1];
        let mut error_const = [0.0; MAX_ORDER + 1];
        for k in 1..=MAX_ORDER {
            gamma[k] = gamma[k - 1] + 1.0 / k as f64;
        }
        for k in 0..=MAX_ORDER {
            alpha[k] = (1.0 - KAPPA[k]) * gamma[k];
            error_const[k] = KAPPA[k] * gamma[k] + 1.0 / (k as f64 + 1.0);
        }

        let max_step = if options.max_step > 0.0 {
            options.max_step
        } else {
            f64::INFINITY
        };
        let min_step = options.min_step.max(0.0);
        let rtol = options.rel_tol;
        let newton_tol = (10.0 * f64::EPSILON / rtol).max(rtol.sqrt().min(0.03));

        let mut f0 = DVector::zeros(n);
        rhs(t0, &y0, &mut f0)?;
        check_finite(&f0, t0)?;

        let scale = atol.zip_map(&y0, |a, y| a + rtol * y.abs());
        let h_abs = select_initial_step(rhs, t0, &y0, &f0, &scale, horizon, max_step)?
            .max(min_step.min(max_step));

        let mut d = vec![DVector::zeros(n); MAX_ORDER + 3];
        d[0] = y0.clone();
        d[1] = &f0 * h_abs;

        let root = options.root.map(|spec| RootState {
            index: spec.index,
            threshold: spec.threshold,
            g_last: y0[spec.index] - spec.threshold,
            scan_from: t0,
        });

        Ok(Self {
            n,
            t: t0,
            reported_t: t0,
            reported_y: y0.clone(),
            y: y0,
            d,
            order: 1,
            h_abs,
            max_step,
            min_step,
            rtol,
            atol,
            newton_tol,
            jac: None,
            lu: None,
            current_jac: false,
            n_equal_steps: 0,
            gamma,
            alpha,
            error_const,
            dense: None,
            dense_prev: None,
            root,
            pending_root_scan: false,
            n_accepted: 0,
            warnings: Vec::new(),
            hnil_count: 0,
        })
    }

    /// Time of the last reported point (step end or root crossing).
    pub fn t(&self) -> f64 {
        self.reported_t
    }

    /// State at the last reported point.
    pub fn y(&self) -> &DVector<f64> {
        &self.reported_y
    }

    /// Number of accepted internal steps.
    pub fn n_accepted(&self) -> u64 {
        self.n_accepted
    }

    /// Drain the warnings accumulated since the last call. Warnings never
    /// abort the integration.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Take one internal step (or report a root remaining in the current
    /// window from a previous crossing).
    pub fn step(&mut self, rhs: &mut RhsFn<'_>) -> Result<StepOutcome, SolverError> {
        if self.pending_root_scan {
            self.pending_root_scan = false;
            if let Some(outcome) = self.scan_roots() {
                return Ok(outcome);
            }
        }
        self.take_step(rhs)?;
        if let Some(outcome) = self.scan_roots() {
            return Ok(outcome);
        }
        self.reported_t = self.t;
        self.reported_y.copy_from(&self.y);
        Ok(StepOutcome::Advanced(self.t))
    }

    /// Dense output at `t`, which must lie inside the current or the
    /// previous step window.
    pub fn interpolate(&self, t: f64, out: &mut DVector<f64>) -> Result<(), SolverError> {
        let Some(dense) = self.dense.as_ref() else {
            return Err(SolverError::NoStepTaken);
        };
        if dense.contains(t) {
            dense.eval(t, out);
            return Ok(());
        }
        if let Some(prev) = self.dense_prev.as_ref() {
            if prev.contains(t) {
                prev.eval(t, out);
                return Ok(());
            }
        }
        let t0 = self.dense_prev.as_ref().map_or(dense.t_old, |p| p.t_old);
        Err(SolverError::BadInterpolationTime {
            t,
            t0,
            t1: dense.t_new,
        })
    }

    /// Restart integration at `(t, y)`: order drops to 1, the history and
    /// dense output are discarded, and a fresh startup step size is chosen
    /// aiming at `horizon`.
    pub fn reinit(
        &mut self,
        t: f64,
        y: &DVector<f64>,
        horizon: f64,
        rhs: &mut RhsFn<'_>,
    ) -> Result<(), SolverError> {
        if y.len() != self.n {
            return Err(SolverError::InvalidInput(format!(
                "reinit state has length {}, expected {}",
                y.len(),
                self.n
            )));
        }
        let mut f0 = DVector::zeros(self.n);
        rhs(t, y, &mut f0)?;
        check_finite(&f0, t)?;

        let scale = self.atol.zip_map(y, |a, yi| a + self.rtol * yi.abs());
        self.h_abs = select_initial_step(rhs, t, y, &f0, &scale, horizon, self.max_step)?
            .max(self.min_step.min(self.max_step));

        for d in self.d.iter_mut() {
            d.fill(0.0);
        }
        self.d[0].copy_from(y);
        self.d[1] = &f0 * self.h_abs;
        self.order = 1;
        self.n_equal_steps = 0;
        self.jac = None;
        self.lu = None;
        self.current_jac = false;
        self.t = t;
        self.y.copy_from(y);
        self.reported_t = t;
        self.reported_y.copy_from(y);
        self.dense = None;
        self.dense_prev = None;
        self.pending_root_scan = false;
        if let Some(root) = self.root.as_mut() {
            root.g_last = y[root.index] - root.threshold;
            root.scan_from = t;
        }
        Ok(())
    }

    fn take_step(&mut self, rhs: &mut RhsFn<'_>) -> Result<(), SolverError> {
        let t = self.t;
        let min_step = self.min_step.max(10.0 * f64::EPSILON * t.abs().max(1.0));

        if self.h_abs > self.max_step {
            let factor = self.max_step / self.h_abs;
            self.change_d(self.order, factor);
            self.h_abs = self.max_step;
            self.n_equal_steps = 0;
            self.lu = None;
        } else if self.h_abs < min_step {
            if min_step > self.min_step && self.hnil_count < MAX_HNIL_WARNINGS {
                // h has shrunk to the limit of time precision: t + h will
                // barely differ from t on the next step.
                self.hnil_count += 1;
                self.warnings.push(format!(
                    "step size {} at t={} is at the limit of time precision",
                    self.h_abs, t
                ));
            }
            let factor = min_step / self.h_abs;
            self.change_d(self.order, factor);
            self.h_abs = min_step;
            self.n_equal_steps = 0;
            self.lu = None;
        }

        let order = self.order;
        let mut last_failure: Option<StepFailure> = None;
        let (t_new, h, y_new, d, safety) = loop {
            if self.h_abs < min_step {
                return Err(match last_failure {
                    Some(StepFailure::Convergence) => SolverError::ConvergenceFailure {
                        t,
                        h: self.h_abs,
                    },
                    _ => SolverError::StepSizeTooSmall {
                        t,
                        h: self.h_abs,
                        min: min_step,
                    },
                });
            }
            let h_try = self.h_abs;
            let t_try = t + h_try;

            // Predict y and the correction offset psi.
            let mut y_predict = DVector::zeros(self.n);
            for k in 0..=self.order {
                y_predict += &self.d[k];
            }
            let scale = self
                .atol
                .zip_map(&y_predict, |a, y| a + self.rtol * y.abs());
            let mut psi = DVector::zeros(self.n);
            for k in 1..=self.order {
                psi.axpy(self.gamma[k], &self.d[k], 1.0);
            }
            psi /= self.alpha[self.order];
            let c = h_try / self.alpha[self.order];

            // Modified Newton, refreshing the Jacobian once on failure.
            let mut converged = false;
            let mut n_iter = 0;
            let mut y_corr = DVector::zeros(self.n);
            let mut d_corr = DVector::zeros(self.n);
            loop {
                if self.jac.is_none() {
                    self.jac = Some(fd_jacobian(rhs, t_try, &y_predict, &self.atol, self.rtol)?);
                    self.current_jac = true;
                    self.lu = None;
                }
                if self.lu.is_none() {
                    let iteration_matrix =
                        DMatrix::identity(self.n, self.n) - self.jac.as_ref().unwrap() * c;
                    self.lu = Some(LU::new(iteration_matrix));
                }
                let result = newton_solve(
                    rhs,
                    self.lu.as_ref().unwrap(),
                    t_try,
                    &y_predict,
                    c,
                    &psi,
                    &scale,
                    self.newton_tol,
                )?;
                n_iter = result.n_iter;
                if result.converged {
                    converged = true;
                    y_corr = result.y;
                    d_corr = result.d;
                    break;
                }
                if self.current_jac {
                    break;
                }
                // Retry once with a fresh Jacobian.
                self.jac = None;
            }

            if !converged {
                last_failure = Some(StepFailure::Convergence);
                self.h_abs *= 0.5;
                self.change_d(self.order, 0.5);
                self.n_equal_steps = 0;
                self.lu = None;
                continue;
            }

            let safety = 0.9 * (2.0 * NEWTON_MAXITER as f64 + 1.0)
                / (2.0 * NEWTON_MAXITER as f64 + n_iter as f64);
            let error = &d_corr * self.error_const[self.order];
            let error_norm = rms_norm(&error.component_div(&scale));
            if error_norm > 1.0 {
                last_failure = Some(StepFailure::Accuracy);
                let factor =
                    MIN_FACTOR.max(safety * error_norm.powf(-1.0 / (self.order as f64 + 1.0)));
                self.h_abs *= factor;
                self.change_d(self.order, factor);
                self.n_equal_steps = 0;
                self.lu = None;
                continue;
            }

            break (t_try, h_try, y_corr, d_corr, safety);
        };

        self.n_equal_steps += 1;
        self.n_accepted += 1;
        self.t = t_new;
        self.y.copy_from(&y_new);
        self.current_jac = false;

        // Update the difference array for the completed step.
        let diff = &d - &self.d[order + 1];
        self.d[order + 2] = diff;
        self.d[order + 1] = d;
        for i in (0..=order).rev() {
            let next = self.d[i + 1].clone();
            self.d[i] += &next;
        }

        // Snapshot the interpolation polynomial before any rescaling.
        self.dense_prev = self.dense.take();
        self.dense = Some(DenseWindow {
            t_old: t,
            t_new,
            h,
            order,
            d: self.d[0..=order].to_vec(),
        });

        if self.n_equal_steps < self.order + 1 {
            return Ok(());
        }

        // Order adaptation: compare error estimates at order-1, order, order+1.
        let scale = self.atol.zip_map(&self.y, |a, y| a + self.rtol * y.abs());
        let error_norm = rms_norm(
            &(&self.d[self.order + 1] * self.error_const[self.order]).component_div(&scale),
        );
        let error_m_norm = if self.order > 1 {
            rms_norm(&(&self.d[self.order] * self.error_const[self.order - 1]).component_div(&scale))
        } else {
            f64::INFINITY
        };
        let error_p_norm = if self.order < MAX_ORDER {
            rms_norm(
                &(&self.d[self.order + 2] * self.error_const[self.order + 1])
                    .component_div(&scale),
            )
        } else {
            f64::INFINITY
        };

        let norms = [error_m_norm, error_norm, error_p_norm];
        let mut best = 1;
        let mut best_factor = 0.0;
        for (i, norm) in norms.iter().enumerate() {
            let k = self.order as f64 + i as f64; // order - 1 + i + 1
            let factor = if *norm == 0.0 {
                MAX_FACTOR
            } else {
                norm.powf(-1.0 / k)
            };
            if factor > best_factor {
                best_factor = factor;
                best = i;
            }
        }
        self.order = self.order + best - 1;

        let factor = MAX_FACTOR.min(safety * best_factor).max(MIN_FACTOR);
        self.h_abs *= factor;
        self.change_d(self.order, factor);
        self.n_equal_steps = 0;
        self.lu = None;

        Ok(())
    }

    /// Rescale the difference array to a new step size `factor * h`.
    fn change_d(&mut self, order: usize, factor: f64) {
        let r = compute_r(order, factor);
        let u = compute_r(order, 1.0);
        let ru = r * u;
        let old: Vec<DVector<f64>> = self.d[0..=order].to_vec();
        for (i, slot) in self.d[0..=order].iter_mut().enumerate() {
            slot.fill(0.0);
            for (j, source) in old.iter().enumerate() {
                slot.axpy(ru[(j, i)], source, 1.0);
            }
        }
    }

    /// Scan the unexamined part of the current window for a sign change of
    /// the root function, localizing it by bisection on dense output.
    fn scan_roots(&mut self) -> Option<StepOutcome> {
        let root = self.root.as_mut()?;
        let dense = self.dense.as_ref()?;
        let from = root.scan_from.max(dense.t_old);
        let to = dense.t_new;
        if !(to > from) {
            return None;
        }
        let g_from = root.g_last;
        let g_to = self.y[root.index] - root.threshold;
        if g_from == 0.0 {
            root.g_last = g_to;
            root.scan_from = to;
            return None;
        }
        let crossed = (g_from < 0.0 && g_to >= 0.0) || (g_from > 0.0 && g_to <= 0.0);
        if !crossed {
            root.g_last = g_to;
            root.scan_from = to;
            return None;
        }

        let mut lo = from;
        let mut hi = to;
        let mut buf = DVector::zeros(self.n);
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            dense.eval(mid, &mut buf);
            let g_mid = buf[root.index] - root.threshold;
            if g_mid != 0.0 && ((g_mid < 0.0) == (g_from < 0.0)) {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let direction = if g_from < 0.0 { 1 } else { -1 };
        dense.eval(hi, &mut buf);
        root.g_last = buf[root.index] - root.threshold;
        root.scan_from = hi;
        self.reported_t = hi;
        self.reported_y.copy_from(&buf);
        self.pending_root_scan = true;
        Some(StepOutcome::Root { t: hi, direction })
    }
}

struct NewtonResult {
    converged: bool,
    n_iter: usize,
    y: DVector<f64>,
    d: DVector<f64>,
}

/// Solve the BDF corrector equation by modified Newton iteration.
#[allow(clippy::too_many_arguments)]
fn newton_solve(
    rhs: &mut RhsFn<'_>,
    lu: &LU<f64, Dyn, Dyn>,
    t_new: f64,
    y_predict: &DVector<f64>,
    c: f64,
    psi: &DVector<f64>,
    scale: &DVector<f64>,
    tol: f64,
) -> Result<NewtonResult, SolverError> {
    let n = y_predict.len();
    let mut d = DVector::zeros(n);
    let mut y = y_predict.clone();
    let mut f = DVector::zeros(n);
    let mut dy_norm_old: Option<f64> = None;
    let mut converged = false;
    let mut n_iter = 0;

    for k in 0..NEWTON_MAXITER {
        n_iter = k + 1;
        rhs(t_new, &y, &mut f)?;
        if !f.iter().all(|v| v.is_finite()) {
            break;
        }
        let residual = &f * c - psi - &d;
        let Some(dy) = lu.solve(&residual) else {
            break;
        };
        let dy_norm = rms_norm(&dy.component_div(scale));

        let mut rate = None;
        if let Some(old) = dy_norm_old {
            if old > 0.0 {
                let r: f64 = dy_norm / old;
                if r >= 1.0
                    || r.powi((NEWTON_MAXITER - k) as i32) / (1.0 - r) * dy_norm > tol
                {
                    break;
                }
                rate = Some(r);
            }
        }

        y += &dy;
        d += &dy;

        if dy_norm == 0.0 || rate.map_or(false, |r| r / (1.0 - r) * dy_norm < tol) {
            converged = true;
            break;
        }
        dy_norm_old = Some(dy_norm);
    }

    Ok(NewtonResult {
        converged,
        n_iter,
        y,
        d,
    })
}

/// Forward-difference Jacobian of the RHS at `(t, y)`.
fn fd_jacobian(
    rhs: &mut RhsFn<'_>,
    t: f64,
    y: &DVector<f64>,
    atol: &DVector<f64>,
    rtol: f64,
) -> Result<DMatrix<f64>, SolverError> {
    let n = y.len();
    let mut f0 = DVector::zeros(n);
    rhs(t, y, &mut f0)?;
    let mut jac = DMatrix::zeros(n, n);
    let mut yp = y.clone();
    let mut fp = DVector::zeros(n);
    let sqrt_eps = f64::EPSILON.sqrt();
    for j in 0..n {
        let weight = atol[j] + rtol * y[j].abs();
        let dyj = sqrt_eps * y[j].abs().max(weight);
        yp[j] = y[j] + dyj;
        let dyj = yp[j] - y[j];
        rhs(t, &yp, &mut fp)?;
        for i in 0..n {
            jac[(i, j)] = (fp[i] - f0[i]) / dyj;
        }
        yp[j] = y[j];
    }
    Ok(jac)
}

/// Step-size rescaling matrix of Shampine and Reichelt.
fn compute_r(order: usize, factor: f64) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(order + 1, order + 1);
    for j in 0..=order {
        m[(0, j)] = 1.0;
    }
    for i in 1..=order {
        for j in 1..=order {
            m[(i, j)] = (i as f64 - 1.0 - factor * j as f64) / i as f64;
        }
    }
    let mut r = m.clone();
    for i in 1..=order {
        for j in 0..=order {
            r[(i, j)] = m[(i, j)] * r[(i - 1, j)];
        }
    }
    r
}

/// Startup step size from the scaled magnitudes of y, f and an estimated
/// second derivative.
fn select_initial_step(
    rhs: &mut RhsFn<'_>,
    t0: f64,
    y0: &DVector<f64>,
    f0: &DVector<f64>,
    scale: &DVector<f64>,
    horizon: f64,
    max_step: f64,
) -> Result<f64, SolverError> {
    let interval = (horizon - t0).abs();
    let interval = if interval > 0.0 {
        interval
    } else {
        f64::INFINITY
    };

    let d0 = rms_norm(&y0.component_div(scale));
    let d1 = rms_norm(&f0.component_div(scale));
    let mut h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    h0 = h0.min(interval);

    let y1 = y0 + f0 * h0;
    let mut f1 = DVector::zeros(y0.len());
    rhs(t0 + h0, &y1, &mut f1)?;
    let h1 = if f1.iter().all(|v| v.is_finite()) {
        let d2 = rms_norm(&(&f1 - f0).component_div(scale)) / h0;
        if d1 <= 1e-15 && d2 <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / 2.0)
        }
    } else {
        (h0 * 1e-3).max(1e-6)
    };

    Ok((100.0 * h0).min(h1).min(interval).min(max_step))
}

fn rms_norm(v: &DVector<f64>) -> f64 {
    (v.norm_squared() / v.len() as f64).sqrt()
}

fn check_finite(v: &DVector<f64>, t: f64) -> Result<(), SolverError> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(SolverError::RhsNotFinite(t))
    }
}
