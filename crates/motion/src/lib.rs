//! # Motion
//!
//! A deterministic, jerk-limited motion planning core for CNC and 3D
//! printer motion control: a trajectory planner (TP) with junction-
//! velocity back-planning, a jerk-limited S-curve segment generator
//! (SG), and a cooperative single-threaded dispatcher tying them to the
//! `step-engine` pulse engine (MPE).
//!
//! `no_std` by default, matching the `step-engine` leaf it drives; the
//! `std` feature unlocks the TOML configuration loader and `tracing`
//! diagnostics.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod kinematics;
pub mod planner;
pub mod queue;
pub mod runtime;
pub mod segment_gen;
pub mod segment_math;

pub use config::{AxisConfig, MachineConfig, MotorConfig, PathControlMode, MAX_AXES, MAX_MOTORS};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{SegmentError, Status};
pub use planner::TrajectoryPlanner;
pub use queue::{ArcRecord, BufferState, MoveType, PlannerBuffer};

use step_engine::{Kinematics, SegmentProducer};

/// The foreground façade over the planner and dispatcher: the one type a
/// parser/G-code front end talks to. Deliberately does not own the
/// [`step_engine::MotorPulseEngine`] or any hardware port — those are
/// dual-context (ISR + foreground) and belong to the integrator's
/// top-level wiring, which also owns the `'static` backing storage for
/// the SG -> MPE segment ring.
pub struct MotionCore<const N: usize, const MOTORS: usize, K>
where
    K: Kinematics<MAX_AXES, MOTORS>,
{
    dispatcher: Dispatcher<N, MOTORS, K>,
    producer: SegmentProducer<'static>,
}

impl<const N: usize, const MOTORS: usize, K> MotionCore<N, MOTORS, K>
where
    K: Kinematics<MAX_AXES, MOTORS>,
{
    /// Builds a new core. `producer` is the SG -> MPE segment ring
    /// handle; the matching [`step_engine::SegmentConsumer`] half is
    /// handed to the integrator's `MotorPulseEngine`, built from the same
    /// `'static` queue.
    pub fn new(config: MachineConfig, kinematics: K, producer: SegmentProducer<'static>) -> Self {
        Self {
            dispatcher: Dispatcher::new(config, kinematics),
            producer,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        self.dispatcher.planner().config()
    }

    /// Enqueues a planned linear (jerk-controlled) move to `target`.
    pub fn line(&mut self, target: [f64; MAX_AXES], duration_minutes: f64) -> Status {
        self.dispatcher.planner_mut().enqueue_line(target, duration_minutes)
    }

    /// `arc(target[A], center_offsets[3], theta, radius, angular_travel,
    /// linear_travel, axis_1, axis_2, axis_linear, duration_minutes)`
    /// Enqueues a helical/planar arc. `center_offsets` carries only the
    /// plane-axis pair (`axis_1`, `axis_2`); the plane-normal component
    /// is always zero for the helical arcs this core supports (see
    /// DESIGN.md).
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
    ) -> Status {
        self.dispatcher.planner_mut().enqueue_arc(
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

    /// Enqueues a timed idle.
    pub fn dwell(&mut self, seconds: f64) -> Status {
        self.dispatcher.planner_mut().enqueue_dwell(seconds)
    }

    /// In-stream start marker.
    pub fn queued_start(&mut self) -> Status {
        self.dispatcher.planner_mut().enqueue_start()
    }

    /// In-stream stop marker.
    pub fn queued_stop(&mut self) -> Status {
        self.dispatcher.planner_mut().enqueue_stop()
    }

    /// In-stream end marker.
    pub fn queued_end(&mut self) -> Status {
        self.dispatcher.planner_mut().enqueue_end()
    }

    /// Immediate kill, bypassing the queue.
    /// Safe to call from signal/interrupt context; the reset itself
    /// happens on the next [`Self::dispatch_tick`].
    pub fn async_stop(&self) {
        self.dispatcher.request_kill();
    }

    /// Immediate terminate, letting the in-flight segment finish before
    /// the reset happens.
    pub fn async_end(&self) {
        self.dispatcher.request_terminate();
    }

    /// Immediately lifts a prior pause, bypassing the queue. Open
    /// Question resolution (DESIGN.md): this core treats `async_start`
    /// as the pause/resume counterpart to the queue-bypassing
    /// `async_stop`/`async_end` pair.
    pub fn async_start(&self) {
        self.dispatcher.resume();
    }

    /// Establishes a new position without generating motion.
    pub fn set_position(&mut self, position: [f64; MAX_AXES]) {
        self.dispatcher.set_position(position);
    }

    /// Reports whether the core is busy. `mpe_busy` is supplied by the
    /// integrator, who alone has visibility into the pulse engine.
    pub fn busy(&self, mpe_busy: bool) -> bool {
        self.dispatcher.busy(mpe_busy)
    }

    /// Drives one dispatcher pass. `parser_poll` is invoked
    /// at most once, only once the free-buffer throttle clears; it
    /// should pull and apply at most one new canonical motion command
    /// from the parser, returning whether it did.
    pub fn dispatch_tick(
        &mut self,
        parser_poll: impl FnOnce(&mut TrajectoryPlanner<N>) -> bool,
    ) -> DispatchOutcome {
        self.dispatcher.tick(&mut self.producer, parser_poll)
    }
}
