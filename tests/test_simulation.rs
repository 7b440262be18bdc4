//! Whole-engine runs of the Luo-Rudy 1991 model under different pacing and
//! logging configurations.

use cardiosim::model::LUO_RUDY_1991;
use cardiosim::pacing::{PacingEvent, Protocol};
use cardiosim::sim::{RootFinding, RunArgs, SimulationError, Simulator};
use cardiosim::sinks::{CrossingLog, FloatSink, Series};

const V_REST: f64 = -84.5286;

fn stimulus(start: f64, period: f64, multiplier: u32) -> Protocol {
    Protocol::Event(vec![PacingEvent {
        level: 1.0,
        start,
        duration: 2.0,
        period,
        multiplier,
    }])
}

struct LoggedRun {
    time: Series,
    vm: Series,
    args: RunArgs,
}

fn periodic_run(tmax: f64, protocol: Protocol) -> LoggedRun {
    let time = Series::new();
    let vm = Series::new();
    let mut args = RunArgs::new(0.0, tmax);
    args.protocols.push(protocol);
    args.log_interval = 1.0;
    args.log.push((
        "engine.time".to_string(),
        Box::new(time.clone()) as Box<dyn FloatSink>,
    ));
    args.log.push((
        "membrane.V".to_string(),
        Box::new(vm.clone()) as Box<dyn FloatSink>,
    ));
    LoggedRun { time, vm, args }
}

fn assert_strictly_increasing(times: &[f64]) {
    for pair in times.windows(2) {
        assert!(pair[1] > pair[0], "times not increasing: {:?}", pair);
    }
}

#[test]
fn test_unstimulated_cell_stays_at_rest() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let run = periodic_run(1000.0, Protocol::Event(Vec::new()));
    sim.init(run.args).unwrap().run().unwrap();

    let times = run.time.values();
    let vm = run.vm.values();
    assert_eq!(times.len(), 1000);
    assert_eq!(vm.len(), 1000);
    assert_eq!(times[0], 0.0);
    assert_strictly_increasing(&times);
    assert!(*times.last().unwrap() < 1000.0);

    for (t, v) in times.iter().zip(&vm) {
        assert!(
            (v - V_REST).abs() < 1.0,
            "resting cell moved to {} mV at t={}",
            v,
            t
        );
    }
}

#[test]
fn test_single_stimulus_fires_one_action_potential() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let run = periodic_run(500.0, stimulus(10.0, 0.0, 0));
    sim.init(run.args).unwrap().run().unwrap();

    let times = run.time.values();
    let vm = run.vm.values();
    assert_eq!(times.len(), 500);
    assert_strictly_increasing(&times);

    // The upstroke carries V above 0 mV shortly after the stimulus.
    let peak = vm.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    assert!(peak > 0.0, "no action potential, peak was {}", peak);
    let upstroke = times
        .iter()
        .zip(&vm)
        .find(|(_, v)| **v > 0.0)
        .map(|(t, _)| *t)
        .unwrap();
    assert!(
        (10.0..16.0).contains(&upstroke),
        "upstroke at unexpected time {}",
        upstroke
    );

    // And the cell repolarizes well before the end of the run.
    assert!(
        *vm.last().unwrap() < -60.0,
        "cell still depolarized at the end: {}",
        vm.last().unwrap()
    );
}

#[test]
fn test_periodic_stimulus_fires_two_action_potentials() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let run = periodic_run(1200.0, stimulus(10.0, 500.0, 2));
    sim.init(run.args).unwrap().run().unwrap();

    let times = run.time.values();
    let vm = run.vm.values();

    // Count upward zero crossings of the membrane potential.
    let mut upstrokes = Vec::new();
    for i in 1..vm.len() {
        if vm[i - 1] <= 0.0 && vm[i] > 0.0 {
            upstrokes.push(times[i]);
        }
    }
    assert_eq!(
        upstrokes.len(),
        2,
        "expected two upstrokes, found {:?}",
        upstrokes
    );
    assert!((10.0..20.0).contains(&upstrokes[0]));
    assert!((510.0..520.0).contains(&upstrokes[1]));
}

#[test]
fn test_root_finding_reports_threshold_crossings() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let roots = CrossingLog::new();
    let mut run = periodic_run(500.0, stimulus(10.0, 0.0, 0));
    run.args.root_finding = Some(RootFinding {
        index: 0,
        threshold: -40.0,
        sink: Box::new(roots.clone()),
    });
    sim.init(run.args).unwrap().run().unwrap();

    let entries = roots.entries();
    assert!(
        entries.len() >= 2,
        "expected an up and a down crossing, got {:?}",
        entries
    );
    for (t, direction) in &entries {
        assert!(*direction == 1 || *direction == -1);
        assert!(*t > 10.0 && *t < 400.0, "crossing at unexpected time {}", t);
    }
    assert_eq!(entries[0].1, 1, "first crossing should be the upstroke");
    assert!(
        entries.iter().any(|(_, d)| *d == -1),
        "no repolarization crossing found"
    );
    for pair in entries.windows(2) {
        assert!(pair[1].0 >= pair[0].0, "crossing times must not decrease");
    }
}

#[test]
fn test_point_list_logging() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let mut run = periodic_run(500.0, stimulus(10.0, 0.0, 0));
    run.args.log_interval = 0.0;
    run.args.log_times = Some(vec![0.0, 10.0, 12.0, 20.0, 100.0]);
    sim.init(run.args).unwrap().run().unwrap();

    assert_eq!(run.time.values(), vec![0.0, 10.0, 12.0, 20.0, 100.0]);
    assert_eq!(run.vm.len(), 5);
}

#[test]
fn test_non_monotonic_point_list_fails_at_step_time() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let mut run = periodic_run(100.0, Protocol::Event(Vec::new()));
    run.args.log_interval = 0.0;
    run.args.log_times = Some(vec![0.0, 5.0, 3.0]);

    let mut armed = sim.init(run.args).unwrap();
    let err = armed.run().unwrap_err();
    assert!(
        matches!(err, SimulationError::NonMonotonicLogTimes),
        "unexpected error: {:?}",
        err
    );
}

#[test]
fn test_final_state_and_bound_variables_are_written() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let run = periodic_run(500.0, stimulus(10.0, 0.0, 0));
    let state = run.args.state.clone();
    let bound = run.args.bound_out.clone();
    sim.init(run.args).unwrap().run().unwrap();

    let final_state = state.snapshot();
    assert_eq!(final_state.len(), 8);
    assert!(final_state[0] < -60.0, "final V was {}", final_state[0]);

    let bound = bound.snapshot();
    assert_eq!(bound.len(), 4); // t, realtime, evaluations, one pace value
    assert_eq!(bound[0], 500.0);
    assert!(bound[2] > 0.0, "no evaluations recorded");
}

#[test]
fn test_interpolated_log_times_stay_below_solver_time() {
    // Periodic logging in a paced run: every logged time is strictly below
    // tmax and the series is strictly increasing even across the pacing
    // discontinuities.
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let run = periodic_run(50.0, stimulus(10.0, 0.0, 0));
    sim.init(run.args).unwrap().run().unwrap();

    let times = run.time.values();
    assert_eq!(times.len(), 50);
    assert_strictly_increasing(&times);
    assert!(*times.last().unwrap() < 50.0);
}

#[test]
fn test_log_interval_precision_check() {
    let mut sim = Simulator::new(&LUO_RUDY_1991);
    let mut run = periodic_run(1e18, Protocol::Event(Vec::new()));
    run.args.log_interval = 1e-3;
    let err = match sim.init(run.args) {
        Err(err) => err,
        Ok(_) => panic!("expected a precision failure"),
    };
    assert!(matches!(err, SimulationError::LogIntervalPrecision));
}
