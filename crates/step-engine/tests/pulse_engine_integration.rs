//! Drives [`MotorPulseEngine`] across a chain of several segments pushed
//! through the SG -> MPE ring one at a time, the way the segment generator
//! would feed it move after move, and checks step counts are conserved
//! and direction reversals are honored across the boundary.

use heapless::spsc::Queue;
use step_engine::{
    DdaTimer, DirectionPort, MotorEnable, MotorPulseEngine, MotorSegment, SegmentKind,
    SegmentQueue, StepPort, TickOutcome,
};

const MOTORS: usize = 2;

#[derive(Default)]
struct RecordingSteps {
    pulses: heapless::Vec<u8, 4096>,
}
impl StepPort for RecordingSteps {
    fn pulse(&mut self, mask: u8) {
        self.pulses.push(mask).ok();
    }
}

#[derive(Default)]
struct RecordingDirection {
    mask: u8,
}
impl DirectionPort for RecordingDirection {
    fn write(&mut self, mask: u8) {
        self.mask = mask;
    }
}

#[derive(Default)]
struct RecordingEnable {
    enabled: [bool; MOTORS],
}
impl MotorEnable for RecordingEnable {
    fn enable(&mut self, motor: usize) {
        self.enabled[motor] = true;
    }
    fn disable(&mut self, motor: usize) {
        self.enabled[motor] = false;
    }
}

#[derive(Default)]
struct RecordingTimer {
    running: bool,
    load_requests: u32,
}
impl DdaTimer for RecordingTimer {
    fn set_period(&mut self, _ticks: u32) {}
    fn start(&mut self) {
        self.running = true;
    }
    fn stop(&mut self) {
        self.running = false;
    }
    fn request_segment_load(&mut self) {
        self.load_requests += 1;
    }
}

#[derive(Default)]
struct Rig {
    step: RecordingSteps,
    direction: RecordingDirection,
    enable: RecordingEnable,
    timer: RecordingTimer,
}

fn line(steps: [u32; MOTORS], direction_mask: u8, ticks: u32) -> MotorSegment {
    MotorSegment {
        kind: SegmentKind::Line,
        steps,
        direction_mask,
        timer_period: 200,
        timer_ticks: ticks,
        timer_ticks_scaled: ticks,
        counter_reset_flag: true,
    }
}

fn run_all(engine: &mut MotorPulseEngine<MOTORS>, rig: &mut Rig) {
    let mut guard = 0;
    loop {
        guard += 1;
        assert!(guard < 1_000_000, "engine never drained the ring");
        if rig.timer.running {
            let outcome = engine.on_dda_tick(&mut rig.step);
            if outcome == TickOutcome::SegmentComplete {
                engine.on_segment_load(&mut rig.direction, &mut rig.enable, &mut rig.timer);
            }
        } else if engine.is_busy() {
            engine.on_segment_load(&mut rig.direction, &mut rig.enable, &mut rig.timer);
        } else {
            break;
        }
    }
}

#[test]
fn many_segments_conserve_steps_and_track_direction_reversal() {
    static mut Q: SegmentQueue = Queue::new();
    #[allow(static_mut_refs)]
    let (mut producer, consumer) = unsafe { Q.split() };

    // Segment 1: both motors forward, 50 steps each.
    producer.enqueue(line([50, 50], 0b11, 50)).unwrap();
    // Segment 2: motor 0 reverses, motor 1 continues forward.
    producer.enqueue(line([20, 30], 0b10, 30)).unwrap();
    // Segment 3: both motors reverse.
    producer.enqueue(line([15, 15], 0b00, 15)).unwrap();

    let mut engine = MotorPulseEngine::<MOTORS>::new(consumer);
    let mut rig = Rig::default();
    engine.start(&mut rig.direction, &mut rig.enable, &mut rig.timer);
    run_all(&mut engine, &mut rig);

    // motor0: +50 -20 -15 = 15; motor1: +50 +30 -15 = 65
    assert_eq!(engine.position(0), 15);
    assert_eq!(engine.position(1), 65);
    assert!(!engine.is_busy());
}

#[test]
fn start_then_line_then_stop_sequence_toggles_enable_around_motion() {
    static mut Q: SegmentQueue = Queue::new();
    #[allow(static_mut_refs)]
    let (mut producer, consumer) = unsafe { Q.split() };

    producer
        .enqueue(MotorSegment { kind: SegmentKind::Start, ..Default::default() })
        .unwrap();
    producer.enqueue(line([10, 10], 0b11, 10)).unwrap();
    producer
        .enqueue(MotorSegment { kind: SegmentKind::Stop, ..Default::default() })
        .unwrap();

    let mut engine = MotorPulseEngine::<MOTORS>::new(consumer);
    let mut rig = Rig::default();
    engine.start(&mut rig.direction, &mut rig.enable, &mut rig.timer);
    assert!(rig.enable.enabled[0] && rig.enable.enabled[1]);

    run_all(&mut engine, &mut rig);

    assert!(!rig.enable.enabled[0] && !rig.enable.enabled[1]);
    assert_eq!(engine.position(0), 10);
    assert_eq!(engine.position(1), 10);
}
