//! Scripted in-process scenario runner over a real `motion` + `step-engine`
//! pair. Each [`SimHarness::tick`] call drives exactly one dispatcher pass
//! and then synchronously drains whatever
//! the segment generator queued into the pulse engine, the way an external
//! scope would observe the DDA ISR firing far faster than the foreground
//! loop that feeds it. `step_engine`'s own `MotorPulseEngine::position`
//! gives per-motor step conservation for free, so this harness does not
//! duplicate that bookkeeping.

use heapless::spsc::Queue;
use motion::kinematics::build_kinematics;
use motion::{DispatchOutcome, MachineConfig, MotionCore, TrajectoryPlanner, MAX_AXES, MAX_MOTORS};
use step_engine::{
    DdaTimer, DirectionPort, IdentityKinematics, MotorEnable, MotorPulseEngine, SegmentQueue,
    StepPort, TickOutcome,
};

/// A recorded event from one [`SimHarness::tick`] pass, enough to assert on
/// concrete end-to-end scenarios without re-deriving DDA internals in
/// every test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// The pulse engine drained its ring and went idle this pass (it had
    /// been busy the pass before).
    RingDrained,
    /// `kill()`/`async_stop()` reset core state this pass.
    Reset,
}

/// Host-side mock of the step-pulse hardware port (`emit_step`).
/// Records a count only; no pin ever actually toggles.
#[derive(Debug, Default)]
pub struct StepRecorder {
    pulse_count: u32,
}

impl StepRecorder {
    pub fn pulse_count(&self) -> u32 {
        self.pulse_count
    }
}

impl StepPort for StepRecorder {
    fn pulse(&mut self, _stepper_mask: u8) {
        self.pulse_count += 1;
    }
}

/// Host-side mock of the direction port (`set_direction`).
#[derive(Debug, Default)]
pub struct DirectionRecorder {
    pub mask: u8,
}

impl DirectionPort for DirectionRecorder {
    fn write(&mut self, direction_mask: u8) {
        self.mask = direction_mask;
    }
}

/// Host-side mock of the enable/disable port (`enable_motor`/
/// `disable_motor`).
#[derive(Debug)]
pub struct EnableRecorder {
    pub enabled: [bool; MAX_MOTORS],
}

impl Default for EnableRecorder {
    fn default() -> Self {
        Self {
            enabled: [false; MAX_MOTORS],
        }
    }
}

impl MotorEnable for EnableRecorder {
    fn enable(&mut self, motor: usize) {
        self.enabled[motor] = true;
    }
    fn disable(&mut self, motor: usize) {
        self.enabled[motor] = false;
    }
}

/// Host-side mock of the DDA timer facade (`set_dda_period`/
/// `start_dda_timer`/`stop_dda_timer`/`request_segment_load_interrupt`). No
/// wall-clock time passes; [`SimHarness::drain_mpe`] calls
/// `on_dda_tick`/`on_segment_load` synchronously instead.
#[derive(Debug, Default)]
pub struct TimerRecorder {
    pub running: bool,
    pub period: u32,
    pub load_requests: u32,
}

impl DdaTimer for TimerRecorder {
    fn set_period(&mut self, ticks: u32) {
        self.period = ticks;
    }
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

/// Bundles the four hardware-facing mocks as distinct named fields so the
/// borrow checker can hand the pulse engine disjoint mutable borrows of
/// each at once, the way four distinct GPIO peripherals would on real
/// hardware.
#[derive(Debug, Default)]
pub struct MotorPorts {
    pub step: StepRecorder,
    pub direction: DirectionRecorder,
    pub enable: EnableRecorder,
    pub timer: TimerRecorder,
}

/// Drives a [`motion::MotionCore`] and [`step_engine::MotorPulseEngine`]
/// together, single-threaded, as the real foreground/ISR/ISR contexts
/// would if every ISR fired back-to-back between foreground passes.
pub struct SimHarness<const N: usize, const MOTORS: usize> {
    core: MotionCore<N, MOTORS, IdentityKinematics<MOTORS>>,
    engine: MotorPulseEngine<MOTORS>,
    ports: MotorPorts,
    primed: bool,
    was_busy: bool,
    trace: heapless::Vec<TraceEvent, 256>,
}

impl<const N: usize, const MOTORS: usize> SimHarness<N, MOTORS> {
    pub fn new(config: MachineConfig) -> Self {
        let kinematics = build_kinematics(&config);
        let queue: &'static mut SegmentQueue = Box::leak(Box::new(Queue::new()));
        let (producer, consumer) = queue.split();
        Self {
            core: MotionCore::new(config, kinematics, producer),
            engine: MotorPulseEngine::new(consumer),
            ports: MotorPorts::default(),
            primed: false,
            was_busy: false,
            trace: heapless::Vec::new(),
        }
    }

    pub fn config(&self) -> &MachineConfig {
        self.core.config()
    }

    pub fn ports(&self) -> &MotorPorts {
        &self.ports
    }

    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    pub fn motor_position(&self, motor: usize) -> i64 {
        self.engine.position(motor)
    }

    pub fn line(&mut self, target: [f64; MAX_AXES], duration_minutes: f64) -> motion::Status {
        self.core.line(target, duration_minutes)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn arc(
        &mut self,
        target: [f64; MAX_AXES],
        center_offsets: [f64; 2],
        theta: f64,
        radius: f64,
        angular_travel: f64,
        linear_travel: f64,
        axis_1: usize,
        axis_2: usize,
        axis_linear: usize,
        duration_minutes: f64,
    ) -> motion::Status {
        self.core.arc(
            target,
            center_offsets,
            theta,
            radius,
            angular_travel,
            linear_travel,
            axis_1,
            axis_2,
            axis_linear,
            duration_minutes,
        )
    }

    pub fn dwell(&mut self, seconds: f64) -> motion::Status {
        self.core.dwell(seconds)
    }

    pub fn async_stop(&mut self) {
        self.core.async_stop();
    }

    pub fn busy(&self) -> bool {
        self.core.busy(self.engine.is_busy())
    }

    /// One dispatcher pass followed by a full drain of whatever landed in
    /// the SG -> MPE ring, mirroring how fast the DDA ISR runs relative to
    /// the foreground loop. Returns the [`DispatchOutcome`] of the
    /// dispatcher pass itself.
    pub fn tick(&mut self) -> DispatchOutcome {
        let outcome = self.core.dispatch_tick(|_: &mut TrajectoryPlanner<N>| false);
        if outcome == DispatchOutcome::Reset {
            tracing::debug!("dispatcher reset; hard-stopping pulse engine");
            self.engine.hard_stop(&mut self.ports.timer);
            self.primed = false;
            self.was_busy = false;
            let _ = self.trace.push(TraceEvent::Reset);
            return outcome;
        }
        self.drain_mpe();
        outcome
    }

    /// Runs [`Self::tick`] until neither the planner nor the pulse engine
    /// has anything left to do, or `max_ticks` is exceeded.
    pub fn run_to_completion(&mut self, max_ticks: u32) -> bool {
        for _ in 0..max_ticks {
            self.tick();
            if !self.busy() {
                return true;
            }
        }
        false
    }

    /// Enqueues a line and drives it to completion, turning a rejected
    /// enqueue or a move that never drains into an error instead of a
    /// `Status`/`bool` pair the caller has to check by hand. The ergonomic
    /// entry point scripted scenarios should reach for; `line` and
    /// `run_to_completion` stay available for tests that need to inspect
    /// the raw outcome of each step.
    pub fn run_line(
        &mut self,
        target: [f64; MAX_AXES],
        duration_minutes: f64,
        max_ticks: u32,
    ) -> anyhow::Result<()> {
        match self.line(target, duration_minutes) {
            motion::Status::Ok => {}
            other => anyhow::bail!("line to {target:?} rejected: {other:?}"),
        }
        if !self.run_to_completion(max_ticks) {
            anyhow::bail!("move to {target:?} did not complete within {max_ticks} ticks");
        }
        Ok(())
    }

    fn drain_mpe(&mut self) {
        if !self.primed {
            self.engine
                .start(&mut self.ports.direction, &mut self.ports.enable, &mut self.ports.timer);
            self.primed = true;
        }
        loop {
            if self.ports.timer.running {
                loop {
                    let outcome = self.engine.on_dda_tick(&mut self.ports.step);
                    if outcome == TickOutcome::SegmentComplete {
                        self.engine.on_segment_load(
                            &mut self.ports.direction,
                            &mut self.ports.enable,
                            &mut self.ports.timer,
                        );
                        break;
                    }
                }
            } else if self.engine.is_busy() {
                // A marker segment requested an immediate reload; real
                // hardware fires the segment-load ISR again right away.
                self.engine.on_segment_load(
                    &mut self.ports.direction,
                    &mut self.ports.enable,
                    &mut self.ports.timer,
                );
            } else {
                break;
            }
        }
        let busy_now = self.engine.is_busy();
        if self.was_busy && !busy_now {
            let _ = self.trace.push(TraceEvent::RingDrained);
        }
        self.was_busy = busy_now;
    }
}
