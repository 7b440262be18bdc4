//! Forward sensitivity runs against the analytic solution of the decay
//! model: `a(t) = a0 exp(-k t)`, so
//!
//! ```text
//! da/dk     = -t a0 exp(-k t)
//! da/da0    = exp(-k t)
//! dflux/dk  = a0 exp(-k t) (1 - k t)
//! dflux/da0 = k exp(-k t)
//! ```

mod common;

use approx::assert_relative_eq;
use cardiosim::sim::{RunArgs, Simulator};
use cardiosim::sinks::{FloatSink, MatrixLog, Series, SharedMatrix};

use common::DECAY;

const K: f64 = 0.5;
const A0: f64 = 1.0;

fn sensitivity_run(tmax: f64, log_interval: f64) -> (RunArgs, Series, MatrixLog) {
    let time = Series::new();
    let matrices = MatrixLog::new();
    let mut args = RunArgs::new(0.0, tmax);
    args.parameters = vec![K];
    args.s_state = SharedMatrix::new(vec![vec![0.0, 0.0], vec![1.0, 0.0]]);
    args.sensitivities = Some(Box::new(matrices.clone()));
    args.log_interval = log_interval;
    args.log.push((
        "engine.time".to_string(),
        Box::new(time.clone()) as Box<dyn FloatSink>,
    ));
    (args, time, matrices)
}

#[test]
fn test_sensitivity_matrices_match_analytic_solution() {
    let mut sim = Simulator::new(&DECAY);
    sim.set_tolerance(1e-9, 1e-7);
    let (args, time, matrices) = sensitivity_run(2.0, 0.5);
    sim.init(args).unwrap().run().unwrap();

    let times = time.values();
    let mats = matrices.matrices();
    assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5]);
    assert_eq!(mats.len(), times.len());

    for (t, m) in times.iter().zip(&mats) {
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 2);
        let decay = (-K * t).exp();
        let da_dk = -t * A0 * decay;
        let da_da0 = decay;
        let dflux_dk = A0 * decay * (1.0 - K * t);
        let dflux_da0 = K * decay;
        assert_relative_eq!(m[(0, 0)], da_dk, epsilon = 1e-3, max_relative = 1e-2);
        assert_relative_eq!(m[(0, 1)], da_da0, epsilon = 1e-3, max_relative = 1e-2);
        assert_relative_eq!(m[(1, 0)], dflux_dk, epsilon = 1e-3, max_relative = 1e-2);
        assert_relative_eq!(m[(1, 1)], dflux_da0, epsilon = 1e-3, max_relative = 1e-2);
    }
}

#[test]
fn test_first_matrix_reflects_initial_sensitivities() {
    let mut sim = Simulator::new(&DECAY);
    let (args, _time, matrices) = sensitivity_run(1.0, 0.25);
    sim.init(args).unwrap().run().unwrap();

    // At t=0 the state rows are the caller-provided initial sensitivities
    // and the flux row follows from them directly.
    let first = &matrices.matrices()[0];
    assert_relative_eq!(first[(0, 0)], 0.0, epsilon = 1e-12);
    assert_relative_eq!(first[(0, 1)], 1.0, epsilon = 1e-12);
    assert_relative_eq!(first[(1, 0)], A0, epsilon = 1e-12); // dflux/dk = a0
    assert_relative_eq!(first[(1, 1)], K, epsilon = 1e-12); // k * da/da0
}

#[test]
fn test_final_state_sensitivities_are_written_back() {
    let mut sim = Simulator::new(&DECAY);
    sim.set_tolerance(1e-9, 1e-7);
    let (args, _time, _matrices) = sensitivity_run(2.0, 0.5);
    let state = args.state.clone();
    let s_state = args.s_state.clone();
    sim.init(args).unwrap().run().unwrap();

    let decay = (-K * 2.0f64).exp();
    assert_relative_eq!(state.snapshot()[0], A0 * decay, max_relative = 1e-4);

    let rows = s_state.snapshot();
    assert_eq!(rows.len(), 2);
    // Row per independent: first k, then the initial value of a.
    assert_relative_eq!(rows[0][0], -2.0 * A0 * decay, epsilon = 1e-3, max_relative = 1e-2);
    assert_relative_eq!(rows[1][0], decay, epsilon = 1e-3, max_relative = 1e-2);
}

#[test]
fn test_sensitivities_with_dynamic_logging() {
    let mut sim = Simulator::new(&DECAY);
    let (mut args, time, matrices) = sensitivity_run(1.0, 0.0);
    args.log_interval = 0.0;
    sim.init(args).unwrap().run().unwrap();

    // One matrix per visited point, appended in time order.
    assert_eq!(matrices.len(), time.len());
    let times = time.values();
    assert_eq!(times[0], 0.0);
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0]);
    }
}
