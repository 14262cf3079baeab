//! Scripted end-to-end scenarios run through [`sim::SimHarness`], the
//! in-process stand-in for a microcontroller: a real `TrajectoryPlanner`,
//! segment generator, and `MotorPulseEngine` wired together and driven
//! tick-by-tick.

use motion::{DispatchOutcome, MachineConfig, PathControlMode, Status, MAX_MOTORS};
use sim::{SimHarness, TraceEvent};

fn harness() -> SimHarness<8, { MAX_MOTORS }> {
    SimHarness::new(MachineConfig::default())
}

fn target(x: f64) -> [f64; 6] {
    [x, 0.0, 0.0, 0.0, 0.0, 0.0]
}

#[test]
fn single_straight_line_drains_and_conserves_steps() {
    let mut sim = harness();
    assert_eq!(sim.line(target(50.0), 1.0), Status::Ok);
    assert!(sim.run_to_completion(50_000), "move never drained");
    let expected = (50.0 * sim.config().axes[0].steps_per_mm).round() as i64;
    assert_eq!(sim.motor_position(0), expected);
    assert!(sim.trace().contains(&TraceEvent::RingDrained));
}

#[test]
fn two_collinear_moves_do_not_stall_at_the_junction() {
    let mut sim = harness();
    sim.line(target(20.0), 0.5);
    sim.line(target(40.0), 0.5);
    assert!(sim.run_to_completion(50_000));
    let expected = (40.0 * sim.config().axes[0].steps_per_mm).round() as i64;
    assert_eq!(sim.motor_position(0), expected);
}

#[test]
fn dwell_between_two_moves_completes_the_whole_chain() {
    let mut sim = harness();
    sim.line(target(10.0), 0.5);
    assert_eq!(sim.dwell(0.02), Status::Ok);
    sim.line(target(30.0), 0.5);
    assert!(sim.run_to_completion(50_000));
    let expected = (30.0 * sim.config().axes[0].steps_per_mm).round() as i64;
    assert_eq!(sim.motor_position(0), expected);
}

#[test]
fn ninety_degree_corner_respects_the_configured_junction_deviation() {
    let mut cfg = MachineConfig::default();
    cfg.path_control_mode = PathControlMode::Continuous;
    let mut sim: SimHarness<8, { MAX_MOTORS }> = SimHarness::new(cfg);
    assert_eq!(sim.line([20.0, 0.0, 0.0, 0.0, 0.0, 0.0], 0.5), Status::Ok);
    assert_eq!(sim.line([20.0, 20.0, 0.0, 0.0, 0.0, 0.0], 0.5), Status::Ok);
    assert!(sim.run_to_completion(50_000));
    let steps_x = sim.config().axes[0].steps_per_mm;
    let steps_y = sim.config().axes[1].steps_per_mm;
    assert_eq!(sim.motor_position(0), (20.0 * steps_x).round() as i64);
    assert_eq!(sim.motor_position(1), (20.0 * steps_y).round() as i64);
}

#[test]
fn arc_tessellates_into_a_chain_of_short_lines() {
    let mut sim = harness();
    let status = sim.arc(
        [10.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [5.0, 0.0],
        0.0,
        5.0,
        std::f64::consts::PI,
        0.0,
        0,
        1,
        2,
        1.0,
    );
    assert_eq!(status, Status::Ok);
    assert!(sim.run_to_completion(200_000), "arc never finished");
    assert!(!sim.busy());
}

#[test]
fn queue_full_backpressure_is_reported_and_recoverable() {
    let mut sim: SimHarness<2, { MAX_MOTORS }> = SimHarness::new(MachineConfig::default());
    assert_eq!(sim.line(target(5.0), 0.5), Status::Ok);
    assert_eq!(sim.line(target(10.0), 0.5), Status::Ok);
    let rejected = sim.line(target(15.0), 0.5);
    assert!(matches!(
        rejected,
        Status::BufferFullNonFatal | Status::BufferFullFatal
    ));
    assert!(sim.run_to_completion(50_000));
}

#[test]
fn async_stop_aborts_mid_move_and_next_move_still_works() {
    let mut sim = harness();
    sim.line([1000.0, 0.0, 0.0, 0.0, 0.0, 0.0], 0.01);
    sim.tick();
    sim.async_stop();
    let outcome = sim.tick();
    assert_eq!(outcome, DispatchOutcome::Reset);
    assert!(!sim.busy());

    assert_eq!(sim.line(target(5.0), 0.5), Status::Ok);
    assert!(sim.run_to_completion(50_000));
    let expected = (5.0 * sim.config().axes[0].steps_per_mm).round() as i64;
    assert_eq!(sim.motor_position(0), expected);
}
