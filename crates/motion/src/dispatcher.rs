//! The dispatcher: single-threaded cooperative scheduler driving the
//! planner, segment generator, and arc tessellation in priority order on
//! each foreground pass. One tick services ISR flags first, then homing
//! (external, not modeled here), then `move_dispatch()`, then a throttled
//! parser poll.

#[cfg(not(feature = "std"))]
use libm::{atan2, cos, sin};
#[cfg(feature = "std")]
fn atan2(y: f64, x: f64) -> f64 {
    y.atan2(x)
}
#[cfg(feature = "std")]
fn sin(x: f64) -> f64 {
    x.sin()
}
#[cfg(feature = "std")]
fn cos(x: f64) -> f64 {
    x.cos()
}

use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{MachineConfig, MAX_AXES};
use crate::error::SegmentError;
use crate::planner::TrajectoryPlanner;
use crate::queue::{ArcRecord, MoveType};
use crate::runtime::{RunSubState, RuntimeCursor};
use crate::segment_gen::{self, SgOutcome};
use step_engine::{Kinematics, SegmentProducer};

/// Outcome of one [`Dispatcher::tick`] pass, reported to the caller so it
/// can decide whether to keep polling the parser, back off, or react to
/// an asynchronous reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No RUNNING or runnable buffer; nothing to do this pass.
    Idle,
    /// At least one segment was enqueued, or a buffer/arc-sub-move
    /// completed, this pass.
    Progressed,
    /// The MPE ring had no free slot; resume next tick with state intact.
    Again,
    /// A kill or completed terminate reset core state this pass. The
    /// caller owns the MPE and hardware ports and must flush the segment
    /// ring and hard-stop the pulse engine in response (the MPE ring is
    /// not foreground-owned, so the dispatcher cannot drain it itself).
    Reset,
}

/// Drives a [`TrajectoryPlanner<N>`] and [`RuntimeCursor`] through the
/// priority-ordered foreground pass. Owns only foreground-exclusive
/// state; the MPE, timer, and step/direction/enable ports live in the
/// caller (`MotionCore`).
pub struct Dispatcher<const N: usize, const MOTORS: usize, K>
where
    K: Kinematics<MAX_AXES, MOTORS>,
{
    planner: TrajectoryPlanner<N>,
    cursor: RuntimeCursor,
    kinematics: K,
    kill_requested: AtomicBool,
    terminate_requested: AtomicBool,
    terminating: bool,
    paused: AtomicBool,
    /// Minimum free planner buffers required before a new parser line is
    /// accepted (typically K=3).
    parser_free_threshold: usize,
}

impl<const N: usize, const MOTORS: usize, K> Dispatcher<N, MOTORS, K>
where
    K: Kinematics<MAX_AXES, MOTORS>,
{
    pub fn new(config: MachineConfig, kinematics: K) -> Self {
        Self {
            planner: TrajectoryPlanner::new(config),
            cursor: RuntimeCursor::new(),
            kinematics,
            kill_requested: AtomicBool::new(false),
            terminate_requested: AtomicBool::new(false),
            terminating: false,
            paused: AtomicBool::new(false),
            parser_free_threshold: 3,
        }
    }

    pub fn planner(&self) -> &TrajectoryPlanner<N> {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut TrajectoryPlanner<N> {
        &mut self.planner
    }

    pub fn cursor(&self) -> &RuntimeCursor {
        &self.cursor
    }

    /// Establishes a new planner and runtime position without generating
    /// motion. Keeps the
    /// dispatcher's two position-tracking fields (the planner's lookahead
    /// position and the SG cursor's real position) in lockstep, since
    /// callers only see one logical position.
    pub fn set_position(&mut self, position: [f64; MAX_AXES]) {
        self.planner.set_position(position);
        self.cursor.position = position;
    }

    /// Reports whether the core is busy, combined with the caller's MPE status.
    pub fn busy(&self, mpe_busy: bool) -> bool {
        self.planner.busy(mpe_busy)
    }

    /// Kill, callable from signal context. Sets a flag serviced on the
    /// next `tick()`; never blocks or touches planner/cursor state
    /// directly.
    pub fn request_kill(&self) {
        self.kill_requested.store(true, Ordering::Release);
    }

    /// Terminate: like kill, but the in-flight segment is allowed to
    /// finish before the reset happens.
    pub fn request_terminate(&self) {
        self.terminate_requested.store(true, Ordering::Release);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// One dispatcher pass, in priority order. `producer` is the SG ->
    /// MPE segment ring handle; `parser_poll` is invoked at most once,
    /// only once the free-buffer throttle clears, and should return
    /// `true` if it actually enqueued something (used only to decide
    /// whether this pass counts as having made progress).
    pub fn tick(
        &mut self,
        producer: &mut SegmentProducer<'_>,
        parser_poll: impl FnOnce(&mut TrajectoryPlanner<N>) -> bool,
    ) -> DispatchOutcome {
        // 1. ISR-set flags, highest priority.
        if self.kill_requested.swap(false, Ordering::AcqRel) {
            self.reset_core();
            return DispatchOutcome::Reset;
        }
        if self.terminate_requested.swap(false, Ordering::AcqRel) {
            self.terminating = true;
        }

        // 2. Homing cycle continuation: an external collaborator this
        // core does not model.

        if self.paused.load(Ordering::Acquire) {
            return DispatchOutcome::Idle;
        }

        // 3. move_dispatch(): greedily drain completed buffers within
        // this pass, stopping on the first in-progress segment emission,
        // ring-full, or empty queue.
        let mut progressed = false;
        loop {
            match self.move_dispatch(producer) {
                MoveStep::Done => {
                    progressed = true;
                    continue;
                }
                MoveStep::Progressed => {
                    progressed = true;
                    break;
                }
                MoveStep::Again => return DispatchOutcome::Again,
                MoveStep::Idle => break,
                MoveStep::Fault => {
                    self.reset_core();
                    return DispatchOutcome::Reset;
                }
            }
        }

        if self.terminating && self.cursor.buffer_index.is_none() && !self.planner.queue().busy() {
            self.reset_core();
            self.terminating = false;
            return DispatchOutcome::Reset;
        }

        // 4. Throttled parser poll, lowest priority.
        if !self.terminating && self.planner.queue().free_count() >= self.parser_free_threshold {
            parser_poll(&mut self.planner);
        }

        if progressed {
            DispatchOutcome::Progressed
        } else {
            DispatchOutcome::Idle
        }
    }

    /// Kill/terminate reset: flush the planner queue, clear the runtime
    /// cursor, and restore the default position. Feed mode, motion mode,
    /// and spindle state are G-code parser state this core does not hold
    /// and so are not modeled here.
    fn reset_core(&mut self) {
        self.planner.queue_mut().reset();
        self.planner.set_position([0.0; MAX_AXES]);
        self.cursor.clear();
        self.terminating = false;
    }

    /// One step of move_dispatch: bind a RUNNING buffer if none is
    /// bound, dispatch to the right handler by `move_type`, and report
    /// what happened so `tick()` can decide whether to keep looping
    /// within this pass.
    fn move_dispatch(&mut self, producer: &mut SegmentProducer<'_>) -> MoveStep {
        if self.cursor.buffer_index.is_none() {
            if self.terminating {
                return MoveStep::Idle;
            }
            match self.planner.queue_mut().start_running() {
                Some(idx) => {
                    let position = self.cursor.position;
                    self.cursor.start_buffer(idx, position);
                }
                None => return MoveStep::Idle,
            }
        }

        let idx = match self.cursor.buffer_index {
            Some(idx) => idx,
            None => return MoveStep::Idle,
        };
        let move_type = self.planner.queue().get(idx).move_type;

        if move_type == MoveType::Arc {
            return match self.tessellate_arc(idx) {
                Ok(SgOutcome::Again) => MoveStep::Again,
                Ok(SgOutcome::InProgress) => MoveStep::Progressed,
                Ok(SgOutcome::Done) => {
                    self.planner.queue_mut().finish_running();
                    self.cursor.buffer_index = None;
                    MoveStep::Done
                }
                Err(_) => MoveStep::Fault,
            };
        }

        let buf = *self.planner.queue().get(idx);
        let cfg = *self.planner.config();
        let outcome =
            segment_gen::generate::<K, MOTORS>(&buf, &mut self.cursor, &cfg, &self.kinematics, producer);
        match outcome {
            Ok(SgOutcome::Again) => MoveStep::Again,
            Ok(SgOutcome::InProgress) => MoveStep::Progressed,
            Ok(SgOutcome::Done) => {
                self.planner.queue_mut().finish_running();
                self.cursor.buffer_index = None;
                MoveStep::Done
            }
            Err(_) => MoveStep::Fault,
        }
    }

    /// Arc tessellation continuation: on first entry, derive the circle
    /// center and per-sub-move angular/linear increments from the
    /// cursor's current (real) position and the arc record; on each
    /// later entry, enqueue one short line to the next point on the arc.
    fn tessellate_arc(&mut self, idx: usize) -> Result<SgOutcome, SegmentError> {
        let buf = *self.planner.queue().get(idx);
        let arc = buf.arc.ok_or(SegmentError::InvalidBuffer)?;

        if self.cursor.state == RunSubState::New {
            self.begin_arc(&arc);
            self.cursor.state = RunSubState::RunningArc;
            return Ok(SgOutcome::InProgress);
        }

        if self.cursor.arc_segments_remaining == 0 {
            return Ok(SgOutcome::Done);
        }

        let is_last = self.cursor.arc_segments_remaining == 1;
        let target = if is_last {
            buf.target
        } else {
            self.next_arc_point(&arc)
        };

        let duration_minutes = self.chord_duration_minutes(buf.cruise_velocity_set, &target);
        let status = self.planner.enqueue_line(target, duration_minutes);
        match status {
            crate::error::Status::BufferFullNonFatal => Ok(SgOutcome::Again),
            crate::error::Status::ZeroLength => {
                self.cursor.arc_segments_remaining -= 1;
                self.cursor.arc_angle += self.cursor.arc_angle_increment;
                if self.cursor.arc_segments_remaining == 0 {
                    Ok(SgOutcome::Done)
                } else {
                    Ok(SgOutcome::InProgress)
                }
            }
            _ => {
                self.cursor.arc_segments_remaining -= 1;
                self.cursor.arc_angle += self.cursor.arc_angle_increment;
                self.cursor.position = target;
                if self.cursor.arc_segments_remaining == 0 {
                    Ok(SgOutcome::Done)
                } else {
                    Ok(SgOutcome::InProgress)
                }
            }
        }
    }

    fn begin_arc(&mut self, arc: &ArcRecord) {
        let start = self.cursor.position;
        let cx = start[arc.axis_1] + arc.center_offset[0];
        let cy = start[arc.axis_2] + arc.center_offset[1];
        let start_angle = atan2(-arc.center_offset[1], -arc.center_offset[0]);

        let min_segment_length_mm = self.planner.config().min_segment_length_mm;
        let segment_count = Self::arc_segment_count(arc, min_segment_length_mm);

        self.cursor.arc_center = [cx, cy];
        self.cursor.arc_angle = start_angle;
        self.cursor.arc_angle_increment = arc.angular_travel / segment_count as f64;
        self.cursor.arc_linear_increment = arc.linear_travel / segment_count as f64;
        self.cursor.arc_segments_remaining = segment_count;
    }

    fn arc_segment_count(arc: &ArcRecord, min_segment_length_mm: f64) -> u32 {
        let chord_basis = arc.radius * arc.angular_travel.abs();
        let length = sqrt_f64(chord_basis * chord_basis + arc.linear_travel * arc.linear_travel);
        if min_segment_length_mm <= 0.0 {
            return 1;
        }
        ((length / min_segment_length_mm).ceil() as u32).max(1)
    }

    /// Duration for one tessellated chord that preserves the arc's own
    /// commanded path velocity (`cruise_velocity_set`), rather than
    /// letting `enqueue_line`'s `duration <= epsilon` fallback substitute
    /// the per-axis velocity cap for every sub-move.
    fn chord_duration_minutes(&self, arc_velocity: f64, target: &[f64; MAX_AXES]) -> f64 {
        if arc_velocity <= self.planner.config().epsilon {
            return 0.0;
        }
        let from = self.cursor.position;
        let mut len_sq = 0.0;
        for i in 0..MAX_AXES {
            let d = target[i] - from[i];
            len_sq += d * d;
        }
        sqrt_f64(len_sq) / (arc_velocity * 60.0)
    }

    fn next_arc_point(&self, arc: &ArcRecord) -> [f64; MAX_AXES] {
        let next_angle = self.cursor.arc_angle + self.cursor.arc_angle_increment;
        let mut target = self.cursor.position;
        target[arc.axis_1] = self.cursor.arc_center[0] + arc.radius * cos(next_angle);
        target[arc.axis_2] = self.cursor.arc_center[1] + arc.radius * sin(next_angle);
        target[arc.axis_linear] += self.cursor.arc_linear_increment;
        target
    }
}

#[cfg(not(feature = "std"))]
fn sqrt_f64(x: f64) -> f64 {
    libm::sqrt(x)
}
#[cfg(feature = "std")]
fn sqrt_f64(x: f64) -> f64 {
    x.sqrt()
}

/// Internal outcome of one [`Dispatcher::move_dispatch`] call, richer
/// than [`SgOutcome`] so the pass loop can distinguish "buffer finished,
/// try the next one" from "one segment emitted, stop for this pass".
enum MoveStep {
    Idle,
    Progressed,
    Done,
    Again,
    Fault,
}
