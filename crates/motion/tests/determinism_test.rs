//! Drives a single jerk-limited line straight through the dispatcher and
//! checks the emitted segment stream is deterministic and shaped like an
//! S-curve: DDA period falls through acceleration, holds flat through
//! cruise, and rises through deceleration, with every motor's step count
//! accounted for. The dispatcher and the segment ring are drained in
//! lockstep, the way a real pulse engine would drain it far faster than
//! the foreground loop refills it.

use heapless::spsc::Queue;
use motion::kinematics::build_kinematics;
use motion::{DispatchOutcome, Dispatcher, MachineConfig, TrajectoryPlanner, MAX_MOTORS};
use step_engine::{IdentityKinematics, MotorSegment, SegmentKind, SegmentQueue};

fn drive_to_completion<const N: usize>(
    dispatcher: &mut Dispatcher<N, { MAX_MOTORS }, IdentityKinematics<{ MAX_MOTORS }>>,
    producer: &mut step_engine::SegmentProducer<'static>,
    consumer: &mut step_engine::SegmentConsumer<'static>,
) -> Vec<MotorSegment> {
    let mut segments = Vec::new();
    let mut guard = 0;
    loop {
        guard += 1;
        assert!(guard < 1_000_000, "dispatcher never drained the move");
        let outcome = dispatcher.tick(producer, |_: &mut TrajectoryPlanner<N>| false);
        while let Some(seg) = consumer.dequeue() {
            segments.push(seg);
        }
        match outcome {
            DispatchOutcome::Reset => panic!("unexpected reset"),
            DispatchOutcome::Again | DispatchOutcome::Progressed => continue,
            DispatchOutcome::Idle => {
                if !dispatcher.busy(false) {
                    break;
                }
            }
        }
    }
    segments
}

#[test]
fn straight_line_emits_a_well_formed_s_curve() {
    static mut Q: SegmentQueue = Queue::new();
    #[allow(static_mut_refs)]
    let (mut producer, mut consumer) = unsafe { Q.split() };

    let cfg = MachineConfig::default();
    let kinematics = build_kinematics(&cfg);
    let mut dispatcher: Dispatcher<8, { MAX_MOTORS }, IdentityKinematics<{ MAX_MOTORS }>> =
        Dispatcher::new(cfg, kinematics);

    assert_eq!(
        dispatcher
            .planner_mut()
            .enqueue_line([40.0, 0.0, 0.0, 0.0, 0.0, 0.0], 1.0),
        motion::Status::Ok
    );

    let segments = drive_to_completion(&mut dispatcher, &mut producer, &mut consumer);

    let mut periods = Vec::new();
    let mut total_steps_x: u64 = 0;
    for seg in &segments {
        assert_eq!(seg.kind, SegmentKind::Line);
        assert_ne!(seg.timer_period, 0, "DDA period must never be zero");
        assert_ne!(seg.timer_ticks, 0, "segment must have at least one tick");
        total_steps_x += seg.steps[0] as u64;
        periods.push(seg.timer_period);
    }

    assert!(!periods.is_empty(), "line produced no segments");
    let expected_steps = (40.0 * cfg.axes[0].steps_per_mm).round() as u64;
    assert_eq!(total_steps_x, expected_steps);

    // Periods fall (speeding up) then, after the minimum, rise again
    // (slowing down). A pure monotonic run in either direction alone
    // would mean cruise or decel never ran.
    let min_period = *periods.iter().min().unwrap();
    let min_pos = periods.iter().position(|p| *p == min_period).unwrap();
    assert!(min_pos > 0, "move never accelerated before cruise/decel");
    if periods.len() > 1 {
        assert!(
            min_pos < periods.len() - 1 || periods[0] > min_period,
            "move never decelerated back down"
        );
    }
}

#[test]
fn replanning_the_same_move_twice_yields_identical_segments() {
    fn plan_once() -> Vec<(u32, u32, [u32; MAX_MOTORS])> {
        static mut Q: SegmentQueue = Queue::new();
        #[allow(static_mut_refs)]
        let (mut producer, mut consumer) = unsafe { Q.split() };

        let cfg = MachineConfig::default();
        let kinematics = build_kinematics(&cfg);
        let mut dispatcher: Dispatcher<8, { MAX_MOTORS }, IdentityKinematics<{ MAX_MOTORS }>> =
            Dispatcher::new(cfg, kinematics);
        dispatcher
            .planner_mut()
            .enqueue_line([25.0, 10.0, 0.0, 0.0, 0.0, 0.0], 0.3);

        let segments = drive_to_completion(&mut dispatcher, &mut producer, &mut consumer);
        segments
            .into_iter()
            .map(|seg| (seg.timer_period, seg.timer_ticks, seg.steps))
            .collect()
    }

    assert_eq!(plan_once(), plan_once());
}
