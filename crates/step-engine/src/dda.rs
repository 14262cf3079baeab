//! Interrupt-driven multi-axis DDA step pulse engine.
//!
//! Rather than a per-step `StepCommand{stepper_mask, direction_mask,
//! interval_ticks}` queued once per motor step, this is a segment-granular
//! Bresenham/DDA accumulator: one hardware timer runs at a fixed period for
//! the whole segment, and every motor's fractional step rate is resolved
//! against that single period by an error accumulator (`counter[m]`),
//! exactly the way grbl/TinyG-class firmware multiplexes several step rates
//! onto one timer.
//!
//! Two ISR contexts call into this engine: [`MotorPulseEngine::on_dda_tick`]
//! runs at the highest priority on
//! every timer tick, and [`MotorPulseEngine::on_segment_load`] runs at
//! medium priority, software-triggered at end-of-segment (or to jump-start
//! a stopped engine). Neither ever blocks or allocates.

use core::sync::atomic::{AtomicBool, Ordering};
use heapless::spsc::{Consumer, Producer, Queue};

/// Upper bound on simultaneously driven motors. Matches the planner side's
/// `motion::MAX_AXES` so a `MotorSegment` can address every configured motor.
pub const MAX_MOTORS: usize = 8;

/// Depth of the ring between the segment generator and the pulse engine.
/// Spec design target is 3-8 slots; 8 gives headroom without growing the
/// struct meaningfully (each `MotorSegment` is small).
pub const SEGMENT_QUEUE_CAPACITY: usize = 8;

pub type SegmentQueue = Queue<MotorSegment, SEGMENT_QUEUE_CAPACITY>;
pub type SegmentProducer<'a> = Producer<'a, MotorSegment, SEGMENT_QUEUE_CAPACITY>;
pub type SegmentConsumer<'a> = Consumer<'a, MotorSegment, SEGMENT_QUEUE_CAPACITY>;

/// Discriminator for a motor-queue segment. Closed set of 5, matched on the
/// ISR hot path rather than dispatched through function pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentKind {
    #[default]
    Line,
    Dwell,
    Start,
    Stop,
    End,
}

/// A single motion segment as handed from the segment generator to the
/// pulse engine: a fixed-period run of DDA ticks and, per motor, the
/// Bresenham step count to resolve across those ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotorSegment {
    pub kind: SegmentKind,
    /// Per-motor integer step count for this segment (always >= 0; the sign
    /// of travel is carried by `direction_mask`, not by this field).
    pub steps: [u32; MAX_MOTORS],
    /// Direction bit per motor; 1 = the polarity-corrected "positive" sense.
    pub direction_mask: u8,
    /// Ticks per DDA increment (the hardware timer reload value).
    pub timer_period: u32,
    /// Total DDA increments to execute this segment.
    pub timer_ticks: u32,
    /// `timer_ticks * dda_substeps` -- the Bresenham denominator.
    pub timer_ticks_scaled: u32,
    /// Re-phase the error counters at segment start instead of carrying
    /// over the previous segment's residual phase.
    pub counter_reset_flag: bool,
}

/// Atomically pulses a set of step outputs. Implementations should map this
/// to a single BSRR-style set+clear write where the target MCU supports it.
pub trait StepPort {
    fn pulse(&mut self, stepper_mask: u8);
}

/// Writes the full direction bitmask for all motors sharing this port.
pub trait DirectionPort {
    fn write(&mut self, direction_mask: u8);
}

/// Enables/disables individual motor drivers (coil current).
pub trait MotorEnable {
    fn enable(&mut self, motor: usize);
    fn disable(&mut self, motor: usize);
}

/// Timer facade: `set_period`/`start`/`stop` drive the DDA tick source;
/// `request_segment_load` raises the medium-priority segment-load
/// interrupt (software-triggered).
pub trait DdaTimer {
    fn set_period(&mut self, ticks: u32);
    fn start(&mut self);
    fn stop(&mut self);
    fn request_segment_load(&mut self);
}

/// Outcome of a single DDA tick, reported back to the ISR glue so it can
/// decide whether to request the next segment load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The segment has ticks remaining; nothing further to do this tick.
    Continue,
    /// `ticks_remaining` reached zero. The timer has been stopped and the
    /// caller must call `on_segment_load` (directly, or via the SW
    /// interrupt it requested) to install the next segment.
    SegmentComplete,
}

/// The multi-axis Bresenham/DDA step pulse engine.
pub struct MotorPulseEngine<const N: usize> {
    consumer: SegmentConsumer<'static>,
    counters: [i32; N],
    current: Option<MotorSegment>,
    ticks_remaining: u32,
    /// Per-motor absolute step position, maintained for diagnostics and the
    /// step-conservation invariant; never consulted by the DDA loop itself.
    positions: [i64; N],
    /// Per-motor flag: power the driver down once this segment completes
    /// and the queue goes idle.
    power_down_on_idle: [bool; N],
    busy: AtomicBool,
}

impl<const N: usize> MotorPulseEngine<N> {
    pub fn new(consumer: SegmentConsumer<'static>) -> Self {
        assert!(N <= MAX_MOTORS, "MotorPulseEngine supports at most {MAX_MOTORS} motors");
        Self {
            consumer,
            counters: [0; N],
            current: None,
            ticks_remaining: 0,
            positions: [0; N],
            power_down_on_idle: [false; N],
            busy: AtomicBool::new(false),
        }
    }

    pub fn set_power_down_on_idle(&mut self, motor: usize, enabled: bool) {
        self.power_down_on_idle[motor] = enabled;
    }

    /// TRUE while a segment is loaded or the ring is non-empty. Read from
    /// any context; never mutated outside this module.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn position(&self, motor: usize) -> i64 {
        self.positions[motor]
    }

    /// Primes the pipeline (loads the first segment, if any) and, if one
    /// was loaded, starts the DDA timer. Call once after enqueuing the
    /// initial segments.
    pub fn start<DP, ME, TM>(&mut self, direction_port: &mut DP, enable: &mut ME, timer: &mut TM)
    where
        DP: DirectionPort,
        ME: MotorEnable,
        TM: DdaTimer,
    {
        self.on_segment_load(direction_port, enable, timer);
    }

    /// The DDA ISR body. Highest priority; must complete within one timer
    /// period at the configured DDA rate. Contains nothing but the
    /// Bresenham accumulator loop and a tick countdown.
    #[inline(always)]
    pub fn on_dda_tick<SP: StepPort>(&mut self, step_port: &mut SP) -> TickOutcome {
        let Some(seg) = self.current else {
            // Spurious tick with nothing loaded: stop generating pulses.
            return TickOutcome::SegmentComplete;
        };

        let mut mask = 0u8;
        for m in 0..N {
            self.counters[m] += seg.steps[m] as i32;
            if self.counters[m] > 0 {
                mask |= 1 << m;
                self.counters[m] -= seg.timer_ticks_scaled as i32;
            }
        }
        if mask != 0 {
            step_port.pulse(mask);
            self.update_positions(mask, seg.direction_mask);
        }

        self.ticks_remaining -= 1;
        if self.ticks_remaining == 0 {
            TickOutcome::SegmentComplete
        } else {
            TickOutcome::Continue
        }
    }

    /// The segment-load ISR body (medium priority, software-triggered).
    /// Pops the next segment from the ring and installs it; handles marker
    /// segments (START/STOP/END) inline since they carry no DDA ticks.
    pub fn on_segment_load<DP, ME, TM>(
        &mut self,
        direction_port: &mut DP,
        enable: &mut ME,
        timer: &mut TM,
    ) where
        DP: DirectionPort,
        ME: MotorEnable,
        TM: DdaTimer,
    {
        timer.stop();
        self.end_of_segment(enable);

        let Some(seg) = self.consumer.dequeue() else {
            self.current = None;
            self.busy.store(false, Ordering::Release);
            return;
        };

        self.busy.store(true, Ordering::Release);
        direction_port.write(seg.direction_mask);

        match seg.kind {
            SegmentKind::Start => {
                for m in 0..N {
                    enable.enable(m);
                }
                self.current = None;
                timer.request_segment_load();
            }
            SegmentKind::Stop | SegmentKind::End => {
                for m in 0..N {
                    enable.disable(m);
                }
                self.current = None;
                timer.request_segment_load();
            }
            SegmentKind::Line | SegmentKind::Dwell => {
                for m in 0..N {
                    self.counters[m] = if seg.counter_reset_flag {
                        -(seg.timer_ticks_scaled as i32)
                    } else {
                        0
                    };
                }
                self.ticks_remaining = seg.timer_ticks.max(1);
                self.current = Some(seg);
                timer.set_period(seg.timer_period);
                timer.start();
            }
        }
    }

    fn end_of_segment<ME: MotorEnable>(&mut self, enable: &mut ME) {
        if let Some(seg) = self.current.take() {
            if matches!(seg.kind, SegmentKind::Line | SegmentKind::Dwell) {
                for m in 0..N {
                    if self.power_down_on_idle[m] {
                        enable.disable(m);
                    }
                }
            }
        }
    }

    #[inline]
    fn update_positions(&mut self, stepper_mask: u8, direction_mask: u8) {
        for m in 0..N {
            if (stepper_mask >> m) & 1 != 0 {
                if (direction_mask >> m) & 1 != 0 {
                    self.positions[m] = self.positions[m].wrapping_add(1);
                } else {
                    self.positions[m] = self.positions[m].wrapping_sub(1);
                }
            }
        }
    }

    /// Kill: drop the in-flight segment and stop pulsing without touching
    /// the ring (the dispatcher is responsible for flushing it). Used by
    /// the async `kill()` path, which must never block waiting on the ISR.
    pub fn hard_stop<TM: DdaTimer>(&mut self, timer: &mut TM) {
        timer.stop();
        self.current = None;
        self.ticks_remaining = 0;
        self.busy.store(false, Ordering::Release);
    }
}
